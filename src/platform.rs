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

//! Composition root: wires the components together and exposes the
//! identity-aware operations used by the binaries and the demo server.

use crate::auth::{Identity, Parties};
use crate::base::{OrderId, UserId};
use crate::chat::{ChatLog, ChatPersister, ChatStore, HistoryPage};
use crate::clock::Clock;
use crate::config::Config;
use crate::directory::{Catalog, Role, UserDirectory, UserProfile};
use crate::gateway::{GatewayParams, PaymentGateway, PaymentRequest};
use crate::ledger::Ledger;
use crate::order::{Order, OrderStatus, PaymentMethod};
use crate::order_book::{NewOrder, OrderBook};
use crate::payment::{CallbackOutcome, PaymentDispatcher, SettlementOutcome};
use crate::realtime::{PushOutcome, RealtimeEvent, RealtimeHub};
use crate::tracking::{GeoStore, NearbyDriver};
use crate::DeliveryError;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// External collaborators the platform runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn UserDirectory>,
    pub catalog: Arc<dyn Catalog>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub chat_log: Arc<dyn ChatLog>,
    pub clock: Arc<dyn Clock>,
    /// Owner of the platform's commission wallet.
    pub platform_owner: UserId,
}

pub struct Platform {
    config: Arc<Config>,
    directory: Arc<dyn UserDirectory>,
    ledger: Arc<Ledger>,
    orders: Arc<OrderBook>,
    geo: Arc<GeoStore>,
    hub: RealtimeHub,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Platform {
    /// Builds every component and starts the background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config, deps: Collaborators) -> Self {
        let config = Arc::new(config);
        let ledger = Arc::new(Ledger::new(deps.clock.clone()));
        let payments = Arc::new(PaymentDispatcher::new(
            ledger.clone(),
            deps.catalog.clone(),
            deps.gateway,
            config.clone(),
            deps.platform_owner,
            deps.clock.clone(),
        ));
        let orders = Arc::new(OrderBook::new(
            deps.catalog,
            deps.directory.clone(),
            payments,
            config.clone(),
            deps.clock.clone(),
        ));
        let geo = Arc::new(GeoStore::new(config.geo.location_ttl, deps.clock.clone()));
        let chat = Arc::new(ChatStore::new(
            deps.chat_log,
            config.realtime.chat_cache_window,
            config.realtime.max_history_page,
        ));
        let persister = ChatPersister::spawn(chat.clone(), config.realtime.channel_capacity);
        let hub = RealtimeHub::new(
            orders.clone(),
            geo.clone(),
            chat,
            persister,
            config.realtime.channel_capacity,
            config.realtime.max_chat_length,
            deps.clock,
        );
        let sweeper = geo.spawn_sweeper(config.geo.sweep_interval);

        Self {
            config,
            directory: deps.directory,
            ledger,
            orders,
            geo,
            hub,
            sweeper: parking_lot::Mutex::new(Some(sweeper)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn orders(&self) -> &Arc<OrderBook> {
        &self.orders
    }

    pub fn geo(&self) -> &Arc<GeoStore> {
        &self.geo
    }

    pub fn hub(&self) -> &RealtimeHub {
        &self.hub
    }

    pub fn payments(&self) -> &Arc<PaymentDispatcher> {
        self.orders.payments()
    }

    /// Resolves an identity to its directory profile.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::Unauthorized`] for anonymous callers, unknown users,
    /// or an email that does not match the profile.
    pub fn authenticate(&self, identity: &Identity) -> Result<UserProfile, DeliveryError> {
        let (Some(id), Some(email)) = (identity.id(), identity.email()) else {
            return Err(DeliveryError::Unauthorized);
        };
        self.directory
            .user(id)
            .filter(|u| u.email.eq_ignore_ascii_case(email))
            .ok_or(DeliveryError::Unauthorized)
    }

    fn party(&self, identity: &Identity, order_id: OrderId) -> Result<Parties, DeliveryError> {
        let parties = self.orders.parties(order_id)?;
        if parties.authorize(identity) {
            Ok(parties)
        } else {
            warn!(order = %order_id, caller = ?identity.id(), "non-party operation rejected");
            Err(DeliveryError::Unauthorized)
        }
    }

    /// Places an order on behalf of the calling customer.
    pub fn place_order(
        &self,
        identity: &Identity,
        mut request: NewOrder,
    ) -> Result<Order, DeliveryError> {
        let profile = self.authenticate(identity)?;
        if profile.role != Role::Customer {
            return Err(DeliveryError::Unauthorized);
        }
        request.customer = profile.id;
        let order = self.orders.create_order(request)?;
        self.hub.publish_status(&order);
        Ok(order)
    }

    /// Dispatch-side driver assignment.
    pub fn assign_driver(&self, order_id: OrderId, driver: UserId) -> Result<Order, DeliveryError> {
        let order = self.orders.assign_driver(order_id, driver)?;
        self.hub.publish_status(&order);
        Ok(order)
    }

    /// Advances the order one step; only its driver may do so.
    pub fn advance(
        &self,
        identity: &Identity,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, DeliveryError> {
        if !self.party(identity, order_id)?.is_driver(identity) {
            return Err(DeliveryError::Unauthorized);
        }
        let order = self.orders.update_status(order_id, status)?;
        self.hub.publish_status(&order);
        Ok(order)
    }

    pub fn cancel(
        &self,
        identity: &Identity,
        order_id: OrderId,
        reason: &str,
    ) -> Result<Order, DeliveryError> {
        self.party(identity, order_id)?;
        let order = self.orders.cancel_order(order_id, reason)?;
        self.hub.publish_status(&order);
        Ok(order)
    }

    pub fn retry_payment(
        &self,
        identity: &Identity,
        order_id: OrderId,
        method: PaymentMethod,
    ) -> Result<SettlementOutcome, DeliveryError> {
        let parties = self.party(identity, order_id)?;
        if identity.id() != Some(parties.customer) {
            return Err(DeliveryError::Unauthorized);
        }
        self.orders.retry_payment(order_id, method)
    }

    pub async fn payment_url(
        &self,
        identity: &Identity,
        order_id: OrderId,
        client_ip: &str,
        base_url: &str,
    ) -> Result<PaymentRequest, DeliveryError> {
        let parties = self.party(identity, order_id)?;
        if identity.id() != Some(parties.customer) {
            return Err(DeliveryError::Unauthorized);
        }
        self.orders
            .create_payment_url(order_id, client_ip, base_url)
            .await
    }

    /// Gateway callbacks authenticate by signature, not identity.
    pub fn gateway_callback(
        &self,
        params: &GatewayParams,
    ) -> Result<CallbackOutcome, DeliveryError> {
        self.orders.process_gateway_callback(params)
    }

    pub fn report_location(
        &self,
        identity: &Identity,
        order_id: OrderId,
        lat: f64,
        lng: f64,
    ) -> Result<PushOutcome, DeliveryError> {
        self.hub.broadcast_location(identity, order_id, lat, lng)
    }

    pub fn send_chat(
        &self,
        identity: &Identity,
        order_id: OrderId,
        text: &str,
    ) -> Result<PushOutcome, DeliveryError> {
        self.hub.broadcast_chat(identity, order_id, text)
    }

    pub fn subscribe(
        &self,
        identity: &Identity,
        order_id: OrderId,
    ) -> Result<broadcast::Receiver<RealtimeEvent>, DeliveryError> {
        self.hub.subscribe_order(identity, order_id)
    }

    pub fn subscribe_inbox(
        &self,
        identity: &Identity,
    ) -> Result<broadcast::Receiver<RealtimeEvent>, DeliveryError> {
        self.hub.subscribe_inbox(identity)
    }

    pub async fn chat_history(
        &self,
        identity: &Identity,
        order_id: OrderId,
        page: usize,
        size: usize,
    ) -> Result<HistoryPage, DeliveryError> {
        self.hub.chat_history(identity, order_id, page, size).await
    }

    pub fn nearby_drivers(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
    ) -> Result<Vec<NearbyDriver>, DeliveryError> {
        self.geo.find_nearby(lat, lng, radius_km)
    }

    /// Stops the sweeper and drains pending chat persistence.
    pub async fn shutdown(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        self.hub.shutdown().await;
        info!(
            orders = self.orders.len(),
            wallets = self.ledger.wallets().len(),
            "platform stopped"
        );
    }
}
