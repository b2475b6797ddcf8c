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

//! Error types shared by the order, payment, ledger and realtime components.

use crate::order::OrderStatus;
use rust_decimal::Decimal;
use thiserror::Error;

/// Delivery platform errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Input has the wrong shape or out-of-range values
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation is not legal in the entity's current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Status change skips or regresses along the order chain
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Debit would take a wallet balance below zero
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Gateway callback signature does not match its parameters
    #[error("gateway signature is invalid")]
    SignatureInvalid,

    /// Caller is not a party to the order
    #[error("not authorized")]
    Unauthorized,

    /// External dependency exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),
}

impl DeliveryError {
    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        DeliveryError::NotFound(what.to_string())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        DeliveryError::Validation(msg.into())
    }
}
