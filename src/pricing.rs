// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Order pricing: authoritative line totals and the distance-based delivery fee.
//!
//! ```text
//! fee = baseFee + max(0, distance - baseDistance) * perKmFee * surge      (clamped at 0)
//! ```

use crate::config::PricingConfig;
use crate::directory::{Catalog, Restaurant};
use crate::geo::GeoPoint;
use crate::order::{OrderItem, OrderLine};
use crate::DeliveryError;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

const MONEY_DP: u32 = 2;
const DISTANCE_DP: u32 = 3;
const MAX_QUANTITY: u32 = 99;

pub(crate) fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// A fully priced cart.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub lines: Vec<OrderLine>,
    pub subtotal: Decimal,
    pub distance_km: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,
}

/// Delivery fee for a trip of `distance_km` under a demand `surge`.
pub fn delivery_fee(config: &PricingConfig, distance_km: Decimal, surge: Decimal) -> Decimal {
    let extra_km = (distance_km - config.base_distance_km).max(Decimal::ZERO);
    let fee = config.base_fee + extra_km * config.per_km_fee * surge;
    round_money(fee.max(Decimal::ZERO))
}

/// Prices each requested line from the catalog.
///
/// # Errors
///
/// - [`DeliveryError::Validation`] - Empty cart, bad quantity, unavailable
///   dish or a dish from another restaurant.
/// - [`DeliveryError::NotFound`] - Dish does not exist.
pub fn price_lines(
    catalog: &dyn Catalog,
    restaurant: &Restaurant,
    items: &[OrderItem],
) -> Result<Vec<OrderLine>, DeliveryError> {
    if items.is_empty() {
        return Err(DeliveryError::validation("cart is empty"));
    }

    items
        .iter()
        .map(|item| {
            if item.quantity == 0 || item.quantity > MAX_QUANTITY {
                return Err(DeliveryError::validation(format!(
                    "quantity for dish {} must be between 1 and {MAX_QUANTITY}",
                    item.dish
                )));
            }
            let dish = catalog
                .dish(item.dish)
                .ok_or_else(|| DeliveryError::not_found(format!("dish {}", item.dish)))?;
            if dish.restaurant != restaurant.id {
                return Err(DeliveryError::validation(format!(
                    "dish {} is not served by restaurant {}",
                    dish.id, restaurant.id
                )));
            }
            if !dish.available {
                return Err(DeliveryError::validation(format!(
                    "dish {} is unavailable",
                    dish.id
                )));
            }
            Ok(OrderLine {
                dish: dish.id,
                line_total: round_money(dish.price * Decimal::from(item.quantity)),
                name: dish.name,
                unit_price: dish.price,
                quantity: item.quantity,
            })
        })
        .collect()
}

/// Prices a cart and its delivery to `destination`.
pub fn quote(
    catalog: &dyn Catalog,
    config: &PricingConfig,
    restaurant: &Restaurant,
    items: &[OrderItem],
    destination: &GeoPoint,
    surge: Decimal,
) -> Result<Quote, DeliveryError> {
    let lines = price_lines(catalog, restaurant, items)?;
    let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();

    let distance = restaurant.location.distance_km(destination);
    let distance_km = Decimal::from_f64(distance)
        .ok_or_else(|| DeliveryError::validation(format!("unusable distance {distance}")))?
        .round_dp(DISTANCE_DP);
    let delivery_fee = delivery_fee(config, distance_km, surge);

    Ok(Quote {
        lines,
        subtotal,
        distance_km,
        delivery_fee,
        total: subtotal + delivery_fee,
    })
}
