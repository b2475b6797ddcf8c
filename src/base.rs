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

//! Core identifier types for users, restaurants, orders and wallets.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Unique identifier for a user (customer, driver, restaurant owner or platform).
    UserId(u32)
);

id_type!(
    /// Unique identifier for a restaurant in the catalog.
    RestaurantId(u32)
);

id_type!(
    /// Unique identifier for a dish in the catalog.
    DishId(u32)
);

id_type!(
    /// Unique identifier for an order.
    ///
    /// Allocated by the order book; doubles as the gateway transaction reference.
    OrderId(u64)
);

id_type!(
    /// Unique identifier for a wallet. Each user owns at most one wallet.
    WalletId(u32)
);

id_type!(
    /// Unique identifier for a wallet transaction.
    ///
    /// Transaction IDs are globally unique across all wallets.
    TransactionId(u64)
);
