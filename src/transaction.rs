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

//! Wallet transaction log entries and the postings that produce them.

use crate::base::{OrderId, TransactionId, WalletId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    Payment,
    Refund,
}

/// Entries are appended only once committed, so every logged entry is complete.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Credit,
    Debit,
}

/// A requested balance mutation, before it is committed to a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub direction: Direction,
    pub kind: TransactionKind,
    /// Unsigned magnitude; must be positive.
    pub amount: Decimal,
    pub order: Option<OrderId>,
}

impl Posting {
    pub fn deposit(amount: Decimal) -> Self {
        Self {
            direction: Direction::Credit,
            kind: TransactionKind::Deposit,
            amount,
            order: None,
        }
    }

    pub fn withdraw(amount: Decimal) -> Self {
        Self {
            direction: Direction::Debit,
            kind: TransactionKind::Withdraw,
            amount,
            order: None,
        }
    }

    /// Customer pays for an order out of their wallet.
    pub fn charge(amount: Decimal, order: OrderId) -> Self {
        Self {
            direction: Direction::Debit,
            kind: TransactionKind::Payment,
            amount,
            order: Some(order),
        }
    }

    /// Earnings from an order land in a payee wallet.
    pub fn payout(amount: Decimal, order: OrderId) -> Self {
        Self {
            direction: Direction::Credit,
            kind: TransactionKind::Payment,
            amount,
            order: Some(order),
        }
    }

    /// Captured funds leave the platform wallet for the order's payees.
    pub fn disbursement(amount: Decimal, order: OrderId) -> Self {
        Self {
            direction: Direction::Debit,
            kind: TransactionKind::Payment,
            amount,
            order: Some(order),
        }
    }

    pub fn refund(amount: Decimal, order: OrderId) -> Self {
        Self {
            direction: Direction::Credit,
            kind: TransactionKind::Refund,
            amount,
            order: Some(order),
        }
    }

    /// Funds leave the wallet that originally captured a refunded payment.
    pub fn refund_reversal(amount: Decimal, order: OrderId) -> Self {
        Self {
            direction: Direction::Debit,
            kind: TransactionKind::Refund,
            amount,
            order: Some(order),
        }
    }

    /// Signed amount as recorded in the log.
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }
}

/// Append-only audit record of a committed posting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletTransaction {
    pub id: TransactionId,
    pub wallet: WalletId,
    pub order: Option<OrderId>,
    /// Positive for credits, negative for debits.
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    /// Wallet balance immediately after this entry committed.
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn debits_are_signed_negative() {
        assert_eq!(Posting::withdraw(dec!(5)).signed_amount(), dec!(-5));
        assert_eq!(Posting::charge(dec!(5), OrderId(1)).signed_amount(), dec!(-5));
        assert_eq!(
            Posting::refund_reversal(dec!(5), OrderId(1)).signed_amount(),
            dec!(-5)
        );
    }

    #[test]
    fn credits_are_signed_positive() {
        assert_eq!(Posting::deposit(dec!(5)).signed_amount(), dec!(5));
        assert_eq!(Posting::payout(dec!(5), OrderId(1)).signed_amount(), dec!(5));
        assert_eq!(Posting::refund(dec!(5), OrderId(1)).signed_amount(), dec!(5));
    }

    #[test]
    fn kinds_serialize_upper_case() {
        assert_eq!(
            serde_json::to_string(&TransactionKind::Refund).unwrap(),
            "\"REFUND\""
        );
    }
}
