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

//! Commission split between platform, restaurant and driver.

use crate::config::CommissionConfig;
use crate::order::Order;
use crate::pricing::round_money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionSplit {
    pub platform_commission: Decimal,
    pub restaurant_payout: Decimal,
    pub driver_payout: Decimal,
}

impl CommissionSplit {
    /// Sum of all shares; equals the order total.
    pub fn total(&self) -> Decimal {
        self.platform_commission + self.restaurant_payout + self.driver_payout
    }

    pub fn is_non_negative(&self) -> bool {
        self.platform_commission >= Decimal::ZERO
            && self.restaurant_payout >= Decimal::ZERO
            && self.driver_payout >= Decimal::ZERO
    }
}

/// Splits an order's amounts. Pure: no ledger access.
///
/// The platform keeps `subtotal * rate`, the restaurant the rest of the
/// subtotal, and the driver the whole delivery fee.
pub fn split(subtotal: Decimal, delivery_fee: Decimal, rate: Decimal) -> CommissionSplit {
    let platform_commission = round_money(subtotal * rate);
    CommissionSplit {
        platform_commission,
        restaurant_payout: subtotal - platform_commission,
        driver_payout: delivery_fee,
    }
}

pub fn calculate_commissions(order: &Order, config: &CommissionConfig) -> CommissionSplit {
    split(order.subtotal, order.delivery_fee, config.rate)
}
