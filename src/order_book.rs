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

//! Order state machine.
//!
//! Orders are held in a [`DashMap`], each behind its own lock, so transitions
//! on one order are totally ordered while different orders progress in
//! parallel. Lock order is always order → wallet; the ledger never reaches
//! back into the order book.

use crate::auth::Parties;
use crate::base::{OrderId, RestaurantId, UserId};
use crate::clock::Clock;
use crate::config::Config;
use crate::directory::{Catalog, Role, UserDirectory};
use crate::gateway::{GatewayParams, PaymentRequest};
use crate::order::{
    DeliveryAddress, Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, RefundStatus,
};
use crate::payment::{CallbackOutcome, PaymentDispatcher, SettlementOutcome};
use crate::pricing;
use crate::DeliveryError;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Request to place an order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer: UserId,
    pub restaurant: RestaurantId,
    pub items: Vec<OrderItem>,
    pub address: DeliveryAddress,
    pub payment_method: PaymentMethod,
    /// Demand signal; the configured default applies when absent.
    pub surge: Option<Decimal>,
}

pub struct OrderBook {
    orders: DashMap<OrderId, Arc<Mutex<Order>>>,
    /// Driver → the one order they are currently carrying.
    by_driver: DashMap<UserId, OrderId>,
    next_order: AtomicU64,
    catalog: Arc<dyn Catalog>,
    directory: Arc<dyn UserDirectory>,
    payments: Arc<PaymentDispatcher>,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
}

impl OrderBook {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        directory: Arc<dyn UserDirectory>,
        payments: Arc<PaymentDispatcher>,
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders: DashMap::new(),
            by_driver: DashMap::new(),
            next_order: AtomicU64::new(1),
            catalog,
            directory,
            payments,
            config,
            clock,
        }
    }

    pub fn payments(&self) -> &Arc<PaymentDispatcher> {
        &self.payments
    }

    fn entry(&self, order_id: OrderId) -> Result<Arc<Mutex<Order>>, DeliveryError> {
        self.orders
            .get(&order_id)
            .map(|o| Arc::clone(&o))
            .ok_or_else(|| DeliveryError::not_found(format!("order {order_id}")))
    }

    /// Prices and records a new order in `CREATED` with payment `PENDING`.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::Validation`] - Empty cart or invalid line.
    /// - [`DeliveryError::NotFound`] - Unknown customer, restaurant or dish.
    pub fn create_order(&self, request: NewOrder) -> Result<Order, DeliveryError> {
        self.directory
            .user(request.customer)
            .ok_or_else(|| DeliveryError::not_found(format!("customer {}", request.customer)))?;
        let restaurant = self
            .catalog
            .restaurant(request.restaurant)
            .ok_or_else(|| DeliveryError::not_found(format!("restaurant {}", request.restaurant)))?;
        let quote = pricing::quote(
            self.catalog.as_ref(),
            &self.config.pricing,
            &restaurant,
            &request.items,
            &request.address.location,
            request.surge.unwrap_or(self.config.pricing.default_surge),
        )?;

        let order = Order {
            id: OrderId(self.next_order.fetch_add(1, Ordering::SeqCst)),
            customer: request.customer,
            restaurant: restaurant.id,
            driver: None,
            status: OrderStatus::Created,
            lines: quote.lines,
            address: request.address,
            distance_km: quote.distance_km,
            subtotal: quote.subtotal,
            delivery_fee: quote.delivery_fee,
            total: quote.total,
            payment_method: request.payment_method,
            payment_status: PaymentStatus::Pending,
            settlement: None,
            payout: None,
            refund: None,
            cancellation_reason: None,
            created_at: self.clock.now(),
            preparing_at: None,
            delivered_at: None,
            cancelled_at: None,
        };
        order.assert_invariants();

        info!(
            order = %order.id,
            customer = %order.customer,
            restaurant = %order.restaurant,
            total = %order.total,
            method = ?order.payment_method,
            "order created"
        );
        self.orders
            .insert(order.id, Arc::new(Mutex::new(order.clone())));
        Ok(order)
    }

    /// Snapshot of an order.
    pub fn get(&self, order_id: OrderId) -> Result<Order, DeliveryError> {
        Ok(self.entry(order_id)?.lock().clone())
    }

    /// Assigns an available driver to a `CREATED` order.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::InvalidState`] - Order is past `CREATED`.
    /// - [`DeliveryError::NotFound`] - Unknown order, or driver unknown/unavailable.
    pub fn assign_driver(&self, order_id: OrderId, driver: UserId) -> Result<Order, DeliveryError> {
        let entry = self.entry(order_id)?;
        let mut order = entry.lock();

        if order.status != OrderStatus::Created {
            return Err(DeliveryError::InvalidState(format!(
                "order {order_id} is {}, drivers are assigned only in CREATED",
                order.status
            )));
        }
        match self.directory.user(driver) {
            Some(profile) if profile.role == Role::Driver => {}
            _ => return Err(DeliveryError::not_found(format!("driver {driver}"))),
        }
        self.directory.reserve_driver(driver)?;

        order.driver = Some(driver);
        order.status = OrderStatus::DriverAssigned;
        order.preparing_at = Some(self.clock.now());
        order.assert_invariants();
        self.by_driver.insert(driver, order_id);

        info!(order = %order_id, driver = %driver, "driver assigned");
        Ok(order.clone())
    }

    /// Moves an order one step along the forward chain.
    ///
    /// Reaching `DELIVERED` settles the payment once. Repeating `DELIVERED` on
    /// a delivered order is a no-op unless payment is still pending or the
    /// payout to restaurant and driver is still owed, in which case
    /// settlement is attempted again.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::InvalidTransition`] - Skip, regression, or a move that
    ///   has its own operation (`DRIVER_ASSIGNED`, `CANCELLED`).
    /// - [`DeliveryError::Validation`] - COD total over the driver's ceiling at pickup.
    pub fn update_status(
        &self,
        order_id: OrderId,
        next: OrderStatus,
    ) -> Result<Order, DeliveryError> {
        let entry = self.entry(order_id)?;
        let mut order = entry.lock();
        let current = order.status;

        if current == OrderStatus::Delivered && next == OrderStatus::Delivered {
            if order.payment_status == PaymentStatus::Pending
                || (order.is_paid() && order.payout.is_none())
            {
                self.settle_on_delivery(&mut order);
            }
            return Ok(order.clone());
        }

        let illegal = DeliveryError::InvalidTransition {
            from: current,
            to: next,
        };
        if matches!(next, OrderStatus::DriverAssigned | OrderStatus::Cancelled)
            || current.next() != Some(next)
        {
            return Err(illegal);
        }
        let driver = order.driver.ok_or(illegal)?;

        if next == OrderStatus::PickedUp && order.payment_method == PaymentMethod::Cod {
            self.payments.validate_cod(&order, driver)?;
        }

        order.status = next;
        info!(order = %order_id, from = %current, to = %next, "status updated");

        if next == OrderStatus::Delivered {
            order.delivered_at = Some(self.clock.now());
            self.by_driver.remove(&driver);
            self.directory.release_driver(driver);
            self.settle_on_delivery(&mut order);
        }
        order.assert_invariants();
        Ok(order.clone())
    }

    fn settle_on_delivery(&self, order: &mut Order) {
        match self.payments.settle(order) {
            Ok(SettlementOutcome::Settled(s)) => {
                info!(order = %order.id, transactions = s.transactions.len(), "settled on delivery")
            }
            Ok(SettlementOutcome::Deferred { reason }) => {
                warn!(order = %order.id, %reason, "delivered with payment still pending")
            }
            Err(e) => {
                order.payment_status = PaymentStatus::Failed;
                error!(order = %order.id, error = %e, "settlement on delivery failed");
            }
        }
    }

    /// Cancels a non-terminal order, refunding any captured payment first.
    ///
    /// A failed refund does not block cancellation; it is recorded on the
    /// order as [`RefundStatus::Failed`] and logged.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::InvalidTransition`] - Order is already terminal.
    /// - [`DeliveryError::Validation`] - Blank reason.
    pub fn cancel_order(&self, order_id: OrderId, reason: &str) -> Result<Order, DeliveryError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DeliveryError::validation("cancellation reason is required"));
        }

        let entry = self.entry(order_id)?;
        let mut order = entry.lock();
        if order.status.is_terminal() {
            return Err(DeliveryError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }

        if order.payment_status == PaymentStatus::Paid {
            match self.payments.refund(&mut order) {
                Ok(_) => order.refund = Some(RefundStatus::Refunded),
                Err(e) => {
                    error!(order = %order_id, error = %e, "refund on cancellation failed");
                    order.refund = Some(RefundStatus::Failed {
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(driver) = order.driver.take() {
            self.by_driver.remove(&driver);
            self.directory.release_driver(driver);
        }
        let from = order.status;
        order.status = OrderStatus::Cancelled;
        order.cancellation_reason = Some(reason.to_string());
        order.cancelled_at = Some(self.clock.now());
        order.assert_invariants();

        info!(order = %order_id, %from, reason, refund = ?order.refund, "order cancelled");
        Ok(order.clone())
    }

    /// Explicit settlement trigger. Failure leaves the order's payment status unchanged.
    pub fn settle(&self, order_id: OrderId) -> Result<SettlementOutcome, DeliveryError> {
        let entry = self.entry(order_id)?;
        let mut order = entry.lock();
        self.payments.settle(&mut order)
    }

    /// Switches payment method on an unpaid order and settles again.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::InvalidState`] - Order cancelled, already paid, or
    ///   switching to COD after pickup.
    pub fn retry_payment(
        &self,
        order_id: OrderId,
        method: PaymentMethod,
    ) -> Result<SettlementOutcome, DeliveryError> {
        let entry = self.entry(order_id)?;
        let mut order = entry.lock();

        if order.status == OrderStatus::Cancelled
            || !matches!(
                order.payment_status,
                PaymentStatus::Pending | PaymentStatus::Failed
            )
        {
            return Err(DeliveryError::InvalidState(format!(
                "order {order_id} payment cannot be retried ({}, {:?})",
                order.status, order.payment_status
            )));
        }
        if method == PaymentMethod::Cod && order.status >= OrderStatus::PickedUp {
            return Err(DeliveryError::InvalidState(format!(
                "order {order_id} is already picked up; COD must be chosen before pickup"
            )));
        }

        let previous = order.payment_status;
        order.payment_method = method;
        order.payment_status = PaymentStatus::Pending;
        let result = self.payments.settle(&mut order);
        if result.is_err() && previous == PaymentStatus::Failed {
            order.payment_status = PaymentStatus::Failed;
        }
        result
    }

    /// Builds the gateway redirect for an order without holding its lock.
    pub async fn create_payment_url(
        &self,
        order_id: OrderId,
        client_ip: &str,
        base_url: &str,
    ) -> Result<PaymentRequest, DeliveryError> {
        let snapshot = self.get(order_id)?;
        self.payments
            .create_payment_url(&snapshot, client_ip, base_url)
            .await
    }

    /// Verifies and applies a gateway callback.
    pub fn process_gateway_callback(
        &self,
        params: &GatewayParams,
    ) -> Result<CallbackOutcome, DeliveryError> {
        let callback = self.payments.verify_callback(params)?;
        let entry = self.entry(callback.order)?;
        let mut order = entry.lock();
        self.payments.apply_callback(&mut order, &callback)
    }

    /// Resolves the customer and driver entitled to see an order's live data.
    pub fn parties(&self, order_id: OrderId) -> Result<Parties, DeliveryError> {
        let (customer, driver, status) = {
            let entry = self.entry(order_id)?;
            let order = entry.lock();
            (order.customer, order.driver, order.status)
        };
        let email_of = |id: UserId| self.directory.user(id).map(|u| u.email);

        Ok(Parties {
            order: order_id,
            customer,
            customer_email: email_of(customer)
                .ok_or_else(|| DeliveryError::not_found(format!("customer {customer}")))?,
            driver,
            driver_email: driver.and_then(email_of),
            status,
        })
    }

    pub fn active_order_for_driver(&self, driver: UserId) -> Option<Order> {
        let order_id = *self.by_driver.get(&driver)?;
        self.get(order_id).ok()
    }

    /// All orders placed by a customer, oldest first.
    pub fn orders_for_customer(&self, customer: UserId) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter_map(|entry| {
                let order = entry.lock();
                (order.customer == customer).then(|| order.clone())
            })
            .collect();
        orders.sort_by_key(|o| o.id);
        orders
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
