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

//! Payment dispatcher: routes an order's settlement by payment method.
//!
//! | Method | Settlement |
//! |--------|------------|
//! | Wallet | Move the order total from the customer's wallet to the platform wallet |
//! | Cod | Nothing until delivery; then credit restaurant, platform and driver shares |
//! | Gateway | Nothing until a verified callback; then credit the platform wallet |
//!
//! Wallet and gateway funds wait in the platform wallet until the order is
//! delivered, when the restaurant and driver shares are paid out of it and
//! the commission stays behind. Until then a refund reverses the capture.
//!
//! The dispatcher operates on an order the caller has already locked, so it
//! never looks orders up itself. It only ever writes the order's payment
//! fields; status changes belong to the order book.

use crate::base::{OrderId, TransactionId, UserId, WalletId};
use crate::clock::Clock;
use crate::commission::{self, CommissionSplit};
use crate::config::Config;
use crate::directory::Catalog;
use crate::gateway::{
    GatewayCallback, GatewayParams, GatewaySigner, PaymentGateway, PaymentRequest, SECURE_HASH,
    to_minor_units,
};
use crate::ledger::Ledger;
use crate::order::{Order, OrderStatus, PaymentMethod, PaymentStatus, RefundStatus, Settlement};
use crate::pricing::round_money;
use crate::transaction::Posting;
use crate::DeliveryError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementOutcome {
    /// Funds moved (now or on an earlier call); the receipt is returned.
    Settled(Settlement),
    /// Nothing to capture yet for this method.
    Deferred { reason: String },
}

impl SettlementOutcome {
    pub fn settlement(&self) -> Option<&Settlement> {
        match self {
            SettlementOutcome::Settled(s) => Some(s),
            SettlementOutcome::Deferred { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackOutcome {
    pub order: OrderId,
    pub payment_status: PaymentStatus,
    /// True when the order was already settled and the callback changed nothing.
    pub duplicate: bool,
}

pub struct PaymentDispatcher {
    ledger: Arc<Ledger>,
    catalog: Arc<dyn Catalog>,
    gateway: Arc<dyn PaymentGateway>,
    signer: GatewaySigner,
    config: Arc<Config>,
    platform_wallet: WalletId,
    clock: Arc<dyn Clock>,
}

impl PaymentDispatcher {
    pub fn new(
        ledger: Arc<Ledger>,
        catalog: Arc<dyn Catalog>,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<Config>,
        platform_owner: UserId,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let platform_wallet = ledger.open_wallet(platform_owner);
        Self {
            signer: GatewaySigner::new(config.gateway.hash_secret.clone()),
            ledger,
            catalog,
            gateway,
            config,
            platform_wallet,
            clock,
        }
    }

    pub fn platform_wallet(&self) -> WalletId {
        self.platform_wallet
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Settles an order by its payment method.
    ///
    /// Idempotent: a paid order returns its stored receipt and posts nothing
    /// beyond a payout still owed for a delivered order. On error the order
    /// is left untouched.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::InsufficientFunds`] - Wallet balance below the total.
    /// - [`DeliveryError::InvalidState`] - Payment was already refunded.
    pub fn settle(&self, order: &mut Order) -> Result<SettlementOutcome, DeliveryError> {
        if let (PaymentStatus::Paid, Some(prior)) = (order.payment_status, order.settlement.clone()) {
            self.pay_out_if_delivered(order);
            return Ok(SettlementOutcome::Settled(prior));
        }
        if order.payment_status == PaymentStatus::Refunded {
            return Err(DeliveryError::InvalidState(format!(
                "order {} was refunded",
                order.id
            )));
        }

        match order.payment_method {
            PaymentMethod::Wallet => {
                let settlement = self.charge_wallet(order)?;
                self.pay_out_if_delivered(order);
                Ok(SettlementOutcome::Settled(settlement))
            }
            PaymentMethod::Cod if order.status == OrderStatus::Delivered => self
                .process_cod_payment_on_delivery(order)
                .map(SettlementOutcome::Settled),
            PaymentMethod::Cod => Ok(SettlementOutcome::Deferred {
                reason: "cash is collected on delivery".into(),
            }),
            PaymentMethod::Gateway => Ok(SettlementOutcome::Deferred {
                reason: "awaiting gateway callback".into(),
            }),
        }
    }

    fn charge_wallet(&self, order: &mut Order) -> Result<Settlement, DeliveryError> {
        let wallet = self.ledger.wallet_for(order.customer).ok_or(
            DeliveryError::InsufficientFunds {
                available: Decimal::ZERO,
                requested: order.total,
            },
        )?;

        let charge = self
            .ledger
            .post(wallet, Posting::charge(order.total, order.id))
            .inspect_err(|e| {
                warn!(order = %order.id, customer = %order.customer, error = %e, "wallet charge rejected")
            })?;
        let capture = self
            .ledger
            .post(self.platform_wallet, Posting::payout(order.total, order.id))?;

        info!(order = %order.id, amount = %order.total, tx = %charge.id, "wallet charged");
        Ok(self.record_paid(order, vec![charge.id, capture.id]))
    }

    fn record_paid(&self, order: &mut Order, transactions: Vec<TransactionId>) -> Settlement {
        let settlement = Settlement {
            order: order.id,
            method: order.payment_method,
            amount: order.total,
            transactions,
            settled_at: self.clock.now(),
        };
        order.payment_status = PaymentStatus::Paid;
        order.settlement = Some(settlement.clone());
        settlement
    }

    /// Checks a COD order against the driver's cash ceiling.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::InvalidState`] - Order is not COD.
    /// - [`DeliveryError::Validation`] - Total exceeds the driver's ceiling.
    pub fn validate_cod(&self, order: &Order, driver: UserId) -> Result<(), DeliveryError> {
        if order.payment_method != PaymentMethod::Cod {
            return Err(DeliveryError::InvalidState(format!(
                "order {} is not cash on delivery",
                order.id
            )));
        }
        let ceiling = self.config.cod.ceiling_for(driver);
        if order.total > ceiling {
            return Err(DeliveryError::validation(format!(
                "COD amount {} exceeds driver {driver} ceiling {ceiling}",
                order.total
            )));
        }
        Ok(())
    }

    /// Records a delivered COD order's commission split in the ledger.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::InvalidState`] - Not COD, not delivered, or no driver.
    /// - [`DeliveryError::Validation`] - Configured rate yields a negative share.
    /// - [`DeliveryError::NotFound`] - Restaurant is missing from the catalog.
    pub fn process_cod_payment_on_delivery(
        &self,
        order: &mut Order,
    ) -> Result<Settlement, DeliveryError> {
        if order.payment_method != PaymentMethod::Cod {
            return Err(DeliveryError::InvalidState(format!(
                "order {} is not cash on delivery",
                order.id
            )));
        }
        if order.status != OrderStatus::Delivered {
            return Err(DeliveryError::InvalidState(format!(
                "order {} is {}, COD settles only when DELIVERED",
                order.id, order.status
            )));
        }
        if let (PaymentStatus::Paid, Some(prior)) = (order.payment_status, &order.settlement) {
            return Ok(prior.clone());
        }

        // Everything that can refuse the split is checked before the first credit.
        let (split, [restaurant, platform, driver]) = self.payees(order)?;
        let transactions = self.credit_payees(order.id, &[restaurant, platform, driver])?;

        info!(
            order = %order.id,
            restaurant = %split.restaurant_payout,
            platform = %split.platform_commission,
            driver = %split.driver_payout,
            "COD settled"
        );
        let settlement = self.record_paid(order, transactions);
        order.payout = Some(settlement.clone());
        Ok(settlement)
    }

    /// Resolves the restaurant, platform and driver shares of an order.
    ///
    /// Every share comes back rounded to cents and non-negative, and every
    /// payee wallet is already open, so crediting them cannot be rejected.
    fn payees(
        &self,
        order: &Order,
    ) -> Result<(CommissionSplit, [(WalletId, Decimal); 3]), DeliveryError> {
        let split = self.calculate_commissions(order);
        if !split.is_non_negative() {
            return Err(DeliveryError::validation(format!(
                "commission rate {} produces a negative payout",
                self.config.commission.rate
            )));
        }
        let restaurant = self
            .catalog
            .restaurant(order.restaurant)
            .ok_or_else(|| DeliveryError::not_found(format!("restaurant {}", order.restaurant)))?;
        let driver = order
            .driver
            .ok_or_else(|| DeliveryError::InvalidState(format!("order {} has no driver", order.id)))?;

        Ok((
            split,
            [
                (
                    self.ledger.open_wallet(restaurant.owner),
                    round_money(split.restaurant_payout),
                ),
                (self.platform_wallet, round_money(split.platform_commission)),
                (self.ledger.open_wallet(driver), round_money(split.driver_payout)),
            ],
        ))
    }

    /// Credits each non-zero share. Shares from [`Self::payees`] never fail here.
    fn credit_payees(
        &self,
        order: OrderId,
        payees: &[(WalletId, Decimal)],
    ) -> Result<Vec<TransactionId>, DeliveryError> {
        payees
            .iter()
            .filter(|(_, amount)| !amount.is_zero())
            .map(|&(wallet, amount)| {
                self.ledger
                    .post(wallet, Posting::payout(amount, order))
                    .map(|entry| entry.id)
            })
            .collect()
    }

    /// Pays the restaurant and driver out of funds captured in the platform
    /// wallet. The single debit runs first; the credits after it cannot fail.
    fn pay_out(&self, order: &Order) -> Result<Settlement, DeliveryError> {
        let (split, [restaurant, _, driver]) = self.payees(order)?;
        let outgoing = restaurant.1 + driver.1;

        let mut transactions = Vec::with_capacity(3);
        if !outgoing.is_zero() {
            let debit = self
                .ledger
                .post(self.platform_wallet, Posting::disbursement(outgoing, order.id))?;
            transactions.push(debit.id);
        }
        transactions.extend(self.credit_payees(order.id, &[restaurant, driver])?);

        info!(
            order = %order.id,
            restaurant = %split.restaurant_payout,
            platform = %split.platform_commission,
            driver = %split.driver_payout,
            "captured payment paid out"
        );
        Ok(Settlement {
            order: order.id,
            method: order.payment_method,
            amount: outgoing,
            transactions,
            settled_at: self.clock.now(),
        })
    }

    /// Pays out a delivered, paid order once. A failure is logged and left
    /// for the next settlement attempt.
    fn pay_out_if_delivered(&self, order: &mut Order) {
        if order.status != OrderStatus::Delivered || !order.is_paid() || order.payout.is_some() {
            return;
        }
        match self.pay_out(order) {
            Ok(payout) => order.payout = Some(payout),
            Err(e) => error!(order = %order.id, error = %e, "payout after delivery failed"),
        }
    }

    /// Returns captured funds to the customer's wallet, reversing the
    /// capture out of the platform wallet first.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::InvalidState`] - Order is not paid, already paid out, or COD.
    /// - [`DeliveryError::InsufficientFunds`] - Platform wallet cannot cover the refund.
    pub fn refund(&self, order: &mut Order) -> Result<Settlement, DeliveryError> {
        if order.payment_status != PaymentStatus::Paid {
            return Err(DeliveryError::InvalidState(format!(
                "order {} has no captured payment to refund",
                order.id
            )));
        }
        if order.payment_method == PaymentMethod::Cod {
            return Err(DeliveryError::InvalidState(format!(
                "order {} was paid in cash; refund it out of band",
                order.id
            )));
        }
        if order.payout.is_some() {
            return Err(DeliveryError::InvalidState(format!(
                "order {} was already paid out to its payees",
                order.id
            )));
        }

        let reversal = self
            .ledger
            .post(self.platform_wallet, Posting::refund_reversal(order.total, order.id))?;
        let mut transactions = vec![reversal.id];
        let customer_wallet = self.ledger.open_wallet(order.customer);
        let credit = self
            .ledger
            .post(customer_wallet, Posting::refund(order.total, order.id))?;
        transactions.push(credit.id);

        order.payment_status = PaymentStatus::Refunded;
        info!(order = %order.id, amount = %order.total, "refunded to customer wallet");
        Ok(Settlement {
            order: order.id,
            method: order.payment_method,
            amount: order.total,
            transactions,
            settled_at: self.clock.now(),
        })
    }

    /// Builds the signed redirect URL for a gateway payment and opens the
    /// gateway session within the configured deadline.
    ///
    /// Works on a snapshot: callers must not hold the order lock across this call.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::InvalidState`] - Not a gateway order, already paid, or cancelled.
    /// - [`DeliveryError::Validation`] - Missing client IP.
    /// - [`DeliveryError::Timeout`] - Gateway did not answer in time; payment stays pending.
    pub async fn create_payment_url(
        &self,
        order: &Order,
        client_ip: &str,
        base_url: &str,
    ) -> Result<PaymentRequest, DeliveryError> {
        if order.payment_method != PaymentMethod::Gateway {
            return Err(DeliveryError::InvalidState(format!(
                "order {} does not pay through the gateway",
                order.id
            )));
        }
        if !matches!(
            order.payment_status,
            PaymentStatus::Pending | PaymentStatus::Failed
        ) || order.status == OrderStatus::Cancelled
        {
            return Err(DeliveryError::InvalidState(format!(
                "order {} cannot start a gateway payment ({}, {:?})",
                order.id, order.status, order.payment_status
            )));
        }
        if client_ip.trim().is_empty() {
            return Err(DeliveryError::validation("client ip is required"));
        }

        let gw = &self.config.gateway;
        let mut params = GatewayParams::new();
        params.insert("amount".into(), to_minor_units(order.total).to_string());
        params.insert("command".into(), gw.command.clone());
        params.insert(
            "create_date".into(),
            self.clock.now().format("%Y%m%d%H%M%S").to_string(),
        );
        params.insert("currency".into(), gw.currency.clone());
        params.insert("ip_addr".into(), client_ip.trim().to_string());
        params.insert("locale".into(), gw.locale.clone());
        params.insert("merchant".into(), gw.merchant_code.clone());
        params.insert("order_info".into(), format!("Payment for order {}", order.id));
        params.insert("order_type".into(), gw.order_type.clone());
        params.insert(
            "return_url".into(),
            format!("{}{}", base_url.trim_end_matches('/'), gw.return_path),
        );
        params.insert("txn_ref".into(), order.id.to_string());
        params.insert("version".into(), gw.version.clone());

        let signature = self.signer.sign(&params)?;
        let url = format!(
            "{}?{}&{SECURE_HASH}={signature}",
            gw.pay_url,
            GatewaySigner::canonical(&params)?
        );
        params.insert(SECURE_HASH.into(), signature);

        let request = PaymentRequest {
            order: order.id,
            amount: order.total,
            params,
            url,
        };

        match tokio::time::timeout(gw.timeout, self.gateway.open_session(&request)).await {
            Ok(Ok(())) => Ok(request),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(order = %order.id, timeout = ?gw.timeout, "gateway session timed out");
                Err(DeliveryError::Timeout(format!(
                    "gateway session for order {}",
                    order.id
                )))
            }
        }
    }

    /// Verifies a callback's signature before any of its fields are trusted.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::SignatureInvalid`] - Signature missing or mismatched.
    /// - [`DeliveryError::Validation`] - Signed but malformed fields.
    pub fn verify_callback(&self, params: &GatewayParams) -> Result<GatewayCallback, DeliveryError> {
        self.signer.verify(params).inspect_err(|_| {
            warn!(txn_ref = ?params.get("txn_ref"), "rejected gateway callback with bad signature")
        })?;
        GatewayCallback::from_params(params)
    }

    /// Applies a verified callback to its (locked) order.
    ///
    /// A callback for an already-paid order returns the current status and
    /// posts nothing. A capture that arrives after the order was cancelled is
    /// booked and refunded straight away; the outcome is kept in `refund`.
    pub fn apply_callback(
        &self,
        order: &mut Order,
        callback: &GatewayCallback,
    ) -> Result<CallbackOutcome, DeliveryError> {
        if order.payment_method != PaymentMethod::Gateway {
            return Err(DeliveryError::InvalidState(format!(
                "order {} does not pay through the gateway",
                order.id
            )));
        }
        if matches!(
            order.payment_status,
            PaymentStatus::Paid | PaymentStatus::Refunded
        ) {
            info!(order = %order.id, "duplicate gateway callback ignored");
            return Ok(CallbackOutcome {
                order: order.id,
                payment_status: order.payment_status,
                duplicate: true,
            });
        }
        if callback.amount != order.total {
            return Err(DeliveryError::validation(format!(
                "callback amount {} does not match order total {}",
                callback.amount, order.total
            )));
        }

        if callback.is_success() {
            let entry = self
                .ledger
                .post(self.platform_wallet, Posting::payout(order.total, order.id))?;
            self.record_paid(order, vec![entry.id]);
            info!(order = %order.id, gateway_tx = ?callback.transaction_no, "gateway payment captured");

            if order.status == OrderStatus::Cancelled {
                warn!(order = %order.id, "payment captured for a cancelled order, refunding");
                order.refund = Some(match self.refund(order) {
                    Ok(_) => RefundStatus::Refunded,
                    Err(e) => {
                        error!(order = %order.id, error = %e, "refund of late capture failed");
                        RefundStatus::Failed {
                            reason: e.to_string(),
                        }
                    }
                });
            } else {
                self.pay_out_if_delivered(order);
            }
        } else {
            order.payment_status = PaymentStatus::Failed;
            warn!(order = %order.id, code = %callback.response_code, "gateway payment failed");
        }

        Ok(CallbackOutcome {
            order: order.id,
            payment_status: order.payment_status,
            duplicate: false,
        })
    }

    /// Pure split of the order's amounts under the configured rate.
    pub fn calculate_commissions(&self, order: &Order) -> CommissionSplit {
        commission::calculate_commissions(order, &self.config.commission)
    }
}
