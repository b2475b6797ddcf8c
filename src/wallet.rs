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

//! Wallet balance and transaction log.
//!
//! A wallet owns its balance and its log behind a single lock, so a balance
//! mutation and the log entry describing it commit together or not at all.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use delivery_core_rs::{UserId, Wallet, WalletId};
//!
//! let wallet = Wallet::new(WalletId(1), UserId(1));
//! assert_eq!(wallet.balance(), dec!(0));
//! ```

use crate::base::{TransactionId, UserId, WalletId};
use crate::pricing::round_money;
use crate::transaction::{Direction, Posting, TransactionStatus, WalletTransaction};
use crate::DeliveryError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};

#[derive(Debug)]
struct WalletData {
    id: WalletId,
    owner: UserId,
    balance: Decimal,
    /// Committed entries in commit order.
    log: Vec<WalletTransaction>,
}

impl WalletData {
    fn new(id: WalletId, owner: UserId) -> Self {
        Self {
            id,
            owner,
            balance: Decimal::ZERO,
            log: Vec::new(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: wallet balance went negative: {}",
            self.balance
        );
        debug_assert!(
            self.log
                .last()
                .is_none_or(|last| last.balance_after == self.balance),
            "Invariant violated: last balance_after does not match balance"
        );
    }

    /// Computes the balance a posting would leave, without applying it.
    fn projected(&self, posting: &Posting) -> Result<Decimal, DeliveryError> {
        if posting.amount <= Decimal::ZERO {
            return Err(DeliveryError::InvalidAmount);
        }
        match posting.direction {
            Direction::Credit => Ok(self.balance + posting.amount),
            Direction::Debit => {
                if self.balance < posting.amount {
                    return Err(DeliveryError::InsufficientFunds {
                        available: self.balance,
                        requested: posting.amount,
                    });
                }
                Ok(self.balance - posting.amount)
            }
        }
    }
}

/// Ledger wallet.
#[derive(Debug)]
pub struct Wallet {
    inner: Mutex<WalletData>,
}

impl Wallet {
    const DECIMAL_PRECISION: u32 = 2;

    pub fn new(id: WalletId, owner: UserId) -> Self {
        Self {
            inner: Mutex::new(WalletData::new(id, owner)),
        }
    }

    pub fn id(&self) -> WalletId {
        self.inner.lock().id
    }

    pub fn owner(&self) -> UserId {
        self.inner.lock().owner
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().balance
    }

    /// Snapshot of the log in commit order.
    pub fn transactions(&self) -> Vec<WalletTransaction> {
        self.inner.lock().log.clone()
    }

    pub fn transaction_count(&self) -> usize {
        self.inner.lock().log.len()
    }

    /// Validates and commits a posting, rounding its amount to cents.
    ///
    /// `next_id` is only invoked once the posting is known to succeed, so
    /// rejected postings never consume a transaction ID.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::InvalidAmount`] - Amount is zero or negative.
    /// - [`DeliveryError::InsufficientFunds`] - Debit exceeds the balance.
    pub fn apply<F>(
        &self,
        posting: Posting,
        next_id: F,
        at: DateTime<Utc>,
    ) -> Result<WalletTransaction, DeliveryError>
    where
        F: FnOnce() -> TransactionId,
    {
        let posting = Posting {
            amount: round_money(posting.amount),
            ..posting
        };
        let mut data = self.inner.lock();
        let balance_after = data.projected(&posting)?;

        let entry = WalletTransaction {
            id: next_id(),
            wallet: data.id,
            order: posting.order,
            amount: posting.signed_amount(),
            kind: posting.kind,
            status: TransactionStatus::Completed,
            balance_after,
            created_at: at,
        };
        data.log.push(entry.clone());
        data.balance = balance_after;
        data.assert_invariants();
        Ok(entry)
    }
}

impl Serialize for Wallet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Wallet", 4)?;
        state.serialize_field("wallet", &data.id)?;
        state.serialize_field("owner", &data.owner)?;
        state.serialize_field(
            "balance",
            &data.balance.round_dp(Wallet::DECIMAL_PRECISION),
        )?;
        state.serialize_field("transactions", &data.log.len())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::OrderId;
    use crate::transaction::TransactionKind;
    use rust_decimal_macros::dec;

    fn ids() -> impl FnMut() -> TransactionId {
        let mut next = 0u64;
        move || {
            next += 1;
            TransactionId(next)
        }
    }

    #[test]
    fn credit_then_debit_updates_balance_and_log() {
        let wallet = Wallet::new(WalletId(1), UserId(1));
        let mut next = ids();
        wallet
            .apply(Posting::deposit(dec!(100.00)), &mut next, Utc::now())
            .unwrap();
        let tx = wallet
            .apply(Posting::charge(dec!(40.00), OrderId(9)), &mut next, Utc::now())
            .unwrap();

        assert_eq!(wallet.balance(), dec!(60.00));
        assert_eq!(tx.amount, dec!(-40.00));
        assert_eq!(tx.kind, TransactionKind::Payment);
        assert_eq!(tx.order, Some(OrderId(9)));
        assert_eq!(tx.balance_after, dec!(60.00));
        assert_eq!(wallet.transaction_count(), 2);
    }

    #[test]
    fn overdraft_is_rejected_without_side_effects() {
        let wallet = Wallet::new(WalletId(1), UserId(1));
        let mut next = ids();
        wallet
            .apply(Posting::deposit(dec!(30)), &mut next, Utc::now())
            .unwrap();

        let mut consumed = false;
        let result = wallet.apply(
            Posting::withdraw(dec!(50)),
            || {
                consumed = true;
                TransactionId(99)
            },
            Utc::now(),
        );

        assert_eq!(
            result,
            Err(DeliveryError::InsufficientFunds {
                available: dec!(30),
                requested: dec!(50),
            })
        );
        assert!(!consumed, "rejected posting must not allocate an id");
        assert_eq!(wallet.balance(), dec!(30));
        assert_eq!(wallet.transaction_count(), 1);
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let wallet = Wallet::new(WalletId(1), UserId(1));
        let mut next = ids();
        assert_eq!(
            wallet.apply(Posting::deposit(dec!(0)), &mut next, Utc::now()),
            Err(DeliveryError::InvalidAmount)
        );
        assert_eq!(
            wallet.apply(Posting::withdraw(dec!(-1)), &mut next, Utc::now()),
            Err(DeliveryError::InvalidAmount)
        );
        assert!(wallet.transactions().is_empty());
    }

    #[test]
    fn debit_to_exactly_zero_is_allowed() {
        let wallet = Wallet::new(WalletId(1), UserId(1));
        let mut next = ids();
        wallet
            .apply(Posting::deposit(dec!(12.5)), &mut next, Utc::now())
            .unwrap();
        wallet
            .apply(Posting::withdraw(dec!(12.5)), &mut next, Utc::now())
            .unwrap();
        assert_eq!(wallet.balance(), Decimal::ZERO);
    }

    // === Serialization Tests ===

    #[test]
    fn serializer_rounds_to_two_decimal_places() {
        let wallet = Wallet::new(WalletId(3), UserId(8));
        {
            let mut data = wallet.inner.lock();
            data.balance = dec!(123.456);
        }

        let json = serde_json::to_string(&wallet).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["wallet"], 3);
        assert_eq!(parsed["owner"], 8);
        assert_eq!(parsed["balance"].as_str().unwrap(), "123.46");
        assert_eq!(parsed["transactions"], 0);
    }

    #[test]
    fn serializer_precision_constant_is_two() {
        assert_eq!(Wallet::DECIMAL_PRECISION, 2);
    }
}
