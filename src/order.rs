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

//! Order aggregate and its status chain.
//!
//! ```text
//! CREATED ─► DRIVER_ASSIGNED ─► TO_RESTAURANT ─► ARRIVED_RESTAURANT ─► PICKED_UP
//!    │              │                 │                  │                 │
//!    │              │                 │                  │                 ▼
//!    │              │                 │                  │            DELIVERING ─► ARRIVED_DELIVERY ─► DELIVERED
//!    └──────────────┴─────────────────┴──────────────────┴─────── any non-terminal ──► CANCELLED
//! ```

use crate::base::{DishId, OrderId, RestaurantId, TransactionId, UserId};
use crate::geo::GeoPoint;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    DriverAssigned,
    ToRestaurant,
    ArrivedRestaurant,
    PickedUp,
    Delivering,
    ArrivedDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// The forward chain, in order.
    pub const CHAIN: [OrderStatus; 8] = [
        OrderStatus::Created,
        OrderStatus::DriverAssigned,
        OrderStatus::ToRestaurant,
        OrderStatus::ArrivedRestaurant,
        OrderStatus::PickedUp,
        OrderStatus::Delivering,
        OrderStatus::ArrivedDelivery,
        OrderStatus::Delivered,
    ];

    /// Successor along the forward chain, if any.
    pub fn next(self) -> Option<OrderStatus> {
        use OrderStatus::*;
        match self {
            Created => Some(DriverAssigned),
            DriverAssigned => Some(ToRestaurant),
            ToRestaurant => Some(ArrivedRestaurant),
            ArrivedRestaurant => Some(PickedUp),
            PickedUp => Some(Delivering),
            Delivering => Some(ArrivedDelivery),
            ArrivedDelivery => Some(Delivered),
            Delivered | Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Non-terminal statuses receive live location.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Statuses during which the order must reference a driver.
    pub fn requires_driver(self) -> bool {
        self >= OrderStatus::DriverAssigned && self <= OrderStatus::Delivered
    }

    pub fn as_str(self) -> &'static str {
        use OrderStatus::*;
        match self {
            Created => "CREATED",
            DriverAssigned => "DRIVER_ASSIGNED",
            ToRestaurant => "TO_RESTAURANT",
            ArrivedRestaurant => "ARRIVED_RESTAURANT",
            PickedUp => "PICKED_UP",
            Delivering => "DELIVERING",
            ArrivedDelivery => "ARRIVED_DELIVERY",
            Delivered => "DELIVERED",
            Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Wallet,
    Cod,
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    /// Captured funds were returned after cancellation.
    Refunded,
}

/// Outcome of the compensating refund on a cancelled, paid order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Refunded,
    Failed { reason: String },
}

/// A requested line: dish and quantity only; prices come from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub dish: DishId,
    pub quantity: u32,
}

/// A priced line, snapshotting the catalog at placement time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub dish: DishId,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub street: String,
    pub location: GeoPoint,
}

/// Receipt of a completed settlement, kept so repeat calls can return it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub order: OrderId,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub transactions: Vec<TransactionId>,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer: UserId,
    pub restaurant: RestaurantId,
    pub driver: Option<UserId>,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    pub address: DeliveryAddress,
    pub distance_km: Decimal,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub settlement: Option<Settlement>,
    /// Restaurant and driver shares paid out after delivery.
    pub payout: Option<Settlement>,
    pub refund: Option<RefundStatus>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub preparing_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub(crate) fn assert_invariants(&self) {
        debug_assert_eq!(
            self.total,
            self.subtotal + self.delivery_fee,
            "Invariant violated: total != subtotal + delivery fee"
        );
        debug_assert_eq!(
            self.driver.is_some(),
            self.status.requires_driver(),
            "Invariant violated: driver reference does not match status {}",
            self.status
        );
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }
}
