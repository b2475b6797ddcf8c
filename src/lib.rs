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

//! # Delivery Core
//!
//! Order lifecycle, wallet ledger, payment settlement and live tracking for a
//! food-delivery platform.
//!
//! ## Core Components
//!
//! - [`OrderBook`]: the order state machine (placement, driver assignment,
//!   forward status chain, cancellation with refund)
//! - [`PaymentDispatcher`]: settlement routed by payment method (wallet, cash
//!   on delivery, external gateway) and the commission split
//! - [`Ledger`]: wallets with atomic, per-wallet serialized postings and an
//!   append-only transaction log
//! - [`GeoStore`]: last-known driver positions with a TTL
//! - [`RealtimeHub`]: per-order event channels gated by the order's two parties
//! - [`ChatStore`] / [`ChatPersister`]: chat history with a recent-message
//!   window, written in the background
//! - [`Platform`]: wires everything together behind identity-aware operations
//!
//! ## Example
//!
//! ```
//! use delivery_core_rs::{Ledger, UserId};
//! use rust_decimal_macros::dec;
//!
//! let ledger = Ledger::default();
//! ledger.deposit(UserId(1), dec!(30.00)).unwrap();
//!
//! let wallet = ledger.wallet_for(UserId(1)).unwrap();
//! assert!(ledger.debit(wallet, dec!(50.00)).is_err());
//! assert_eq!(ledger.balance(wallet).unwrap(), dec!(30.00));
//! ```
//!
//! ## Thread Safety
//!
//! Orders and wallets each sit behind their own lock inside concurrent maps,
//! so independent orders and wallets never contend. A lock on an order may be
//! held while wallets are posted to, never the other way round.

pub mod auth;
mod base;
pub mod chat;
pub mod clock;
pub mod commission;
pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod geo;
mod ledger;
pub mod logging;
pub mod order;
mod order_book;
pub mod payment;
pub mod platform;
pub mod pricing;
pub mod realtime;
pub mod tracking;
mod transaction;
mod wallet;

pub use auth::{Identity, Parties, authorize};
pub use base::{DishId, OrderId, RestaurantId, TransactionId, UserId, WalletId};
pub use chat::{ChatLog, ChatMessage, ChatPersister, ChatRole, ChatStore, HistoryPage, InMemoryChatLog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::DeliveryError;
pub use geo::GeoPoint;
pub use ledger::Ledger;
pub use order::{
    DeliveryAddress, Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, RefundStatus,
};
pub use order_book::{NewOrder, OrderBook};
pub use payment::{CallbackOutcome, PaymentDispatcher, SettlementOutcome};
pub use platform::{Collaborators, Platform};
pub use realtime::{DropReason, PushOutcome, RealtimeEvent, RealtimeHub};
pub use tracking::{DriverLocation, GeoStore, NearbyDriver};
pub use transaction::{Direction, Posting, TransactionKind, TransactionStatus, WalletTransaction};
pub use wallet::Wallet;
