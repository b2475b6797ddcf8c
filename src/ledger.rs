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

//! Wallet store and atomic balance mutation.
//!
//! Wallets live in a [`DashMap`], each behind its own lock: postings against
//! one wallet serialize, postings against different wallets proceed in
//! parallel.

use crate::base::{TransactionId, UserId, WalletId};
use crate::clock::Clock;
use crate::transaction::{Posting, WalletTransaction};
use crate::wallet::Wallet;
use crate::DeliveryError;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct Ledger {
    /// Wallets indexed by wallet ID.
    wallets: DashMap<WalletId, Arc<Wallet>>,
    /// One wallet per owner.
    owners: DashMap<UserId, WalletId>,
    next_wallet: AtomicU32,
    next_transaction: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    /// Creates a ledger with no wallets.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Ledger {
            wallets: DashMap::new(),
            owners: DashMap::new(),
            next_wallet: AtomicU32::new(1),
            next_transaction: AtomicU64::new(1),
            clock,
        }
    }

    /// Returns the owner's wallet, creating an empty one on first use.
    pub fn open_wallet(&self, owner: UserId) -> WalletId {
        *self.owners.entry(owner).or_insert_with(|| {
            let id = WalletId(self.next_wallet.fetch_add(1, Ordering::SeqCst));
            self.wallets.insert(id, Arc::new(Wallet::new(id, owner)));
            debug!(wallet = %id, owner = %owner, "opened wallet");
            id
        })
    }

    pub fn wallet_for(&self, owner: UserId) -> Option<WalletId> {
        self.owners.get(&owner).map(|id| *id)
    }

    pub fn wallet(&self, wallet_id: WalletId) -> Result<Arc<Wallet>, DeliveryError> {
        self.wallets
            .get(&wallet_id)
            .map(|w| Arc::clone(&w))
            .ok_or_else(|| DeliveryError::not_found(format!("wallet {wallet_id}")))
    }

    /// Commits a posting against a wallet.
    ///
    /// The balance change and its log entry are applied together under the
    /// wallet's lock; on error neither is observable.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::NotFound`] - Wallet does not exist.
    /// - [`DeliveryError::InvalidAmount`] - Amount is zero or negative.
    /// - [`DeliveryError::InsufficientFunds`] - Debit exceeds the balance.
    pub fn post(
        &self,
        wallet_id: WalletId,
        posting: Posting,
    ) -> Result<WalletTransaction, DeliveryError> {
        // Clone the Arc out so the map shard is not held while the wallet is locked.
        let wallet = self.wallet(wallet_id)?;
        let entry = wallet.apply(
            posting,
            || TransactionId(self.next_transaction.fetch_add(1, Ordering::SeqCst)),
            self.clock.now(),
        )?;
        debug!(
            wallet = %wallet_id,
            tx = %entry.id,
            kind = ?entry.kind,
            amount = %entry.amount,
            balance_after = %entry.balance_after,
            "posted"
        );
        Ok(entry)
    }

    pub fn credit(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
    ) -> Result<WalletTransaction, DeliveryError> {
        self.post(wallet_id, Posting::deposit(amount))
    }

    pub fn debit(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
    ) -> Result<WalletTransaction, DeliveryError> {
        self.post(wallet_id, Posting::withdraw(amount))
    }

    /// Tops up the owner's wallet, opening it if needed.
    pub fn deposit(
        &self,
        owner: UserId,
        amount: Decimal,
    ) -> Result<WalletTransaction, DeliveryError> {
        let wallet_id = self.open_wallet(owner);
        self.credit(wallet_id, amount)
    }

    /// Cash-out from the owner's wallet.
    pub fn withdraw(
        &self,
        owner: UserId,
        amount: Decimal,
    ) -> Result<WalletTransaction, DeliveryError> {
        let wallet_id = self
            .wallet_for(owner)
            .ok_or_else(|| DeliveryError::not_found(format!("wallet of user {owner}")))?;
        self.debit(wallet_id, amount)
    }

    pub fn balance(&self, wallet_id: WalletId) -> Result<Decimal, DeliveryError> {
        Ok(self.wallet(wallet_id)?.balance())
    }

    pub fn transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<WalletTransaction>, DeliveryError> {
        Ok(self.wallet(wallet_id)?.transactions())
    }

    /// All wallets ordered by ID, for reporting.
    pub fn wallets(&self) -> Vec<Arc<Wallet>> {
        let mut wallets: Vec<_> = self.wallets.iter().map(|w| Arc::clone(&w)).collect();
        wallets.sort_by_key(|w| w.id());
        wallets
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(Arc::new(crate::clock::SystemClock))
    }
}
