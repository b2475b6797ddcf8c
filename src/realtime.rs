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

//! Authorization-gated fan-out of live order events.
//!
//! Every order gets its own broadcast channel, created on first subscribe and
//! torn down once the order is terminal, so only subscribers that passed the
//! party check for that order ever hold a receiver for it. Location updates
//! also go to the customer's personal inbox.
//!
//! Pushes are at-most-once: a lagging or disconnected subscriber misses
//! events and catches up through history or a location read. Inboxes with no
//! receivers left are pruned, and a finished order's chat window is retired.

use crate::auth::{Identity, Parties};
use crate::base::{OrderId, UserId};
use crate::chat::{self, ChatMessage, ChatPersister, ChatRole, ChatStore, HistoryPage};
use crate::clock::Clock;
use crate::geo::GeoPoint;
use crate::order::{Order, OrderStatus};
use crate::order_book::OrderBook;
use crate::tracking::GeoStore;
use crate::DeliveryError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    Location {
        order: OrderId,
        driver: UserId,
        position: GeoPoint,
        recorded_at: DateTime<Utc>,
    },
    Chat {
        message: ChatMessage,
    },
    Status {
        order: OrderId,
        status: OrderStatus,
        at: DateTime<Utc>,
    },
}

impl RealtimeEvent {
    pub fn order(&self) -> OrderId {
        match self {
            RealtimeEvent::Location { order, .. } | RealtimeEvent::Status { order, .. } => *order,
            RealtimeEvent::Chat { message } => message.order,
        }
    }

    /// JSON text frame for the wire.
    pub fn to_frame(&self) -> Result<String, DeliveryError> {
        serde_json::to_string(self)
            .map_err(|e| DeliveryError::validation(format!("cannot encode event: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Unauthorized,
    OrderInactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    /// Handed to this many live receivers (possibly none).
    Delivered(usize),
    Dropped(DropReason),
}

pub struct RealtimeHub {
    topics: DashMap<OrderId, broadcast::Sender<RealtimeEvent>>,
    inboxes: DashMap<UserId, broadcast::Sender<RealtimeEvent>>,
    capacity: usize,
    max_chat_length: usize,
    orders: Arc<OrderBook>,
    geo: Arc<GeoStore>,
    chat: Arc<ChatStore>,
    persister: ChatPersister,
    clock: Arc<dyn Clock>,
}

impl RealtimeHub {
    pub fn new(
        orders: Arc<OrderBook>,
        geo: Arc<GeoStore>,
        chat: Arc<ChatStore>,
        persister: ChatPersister,
        capacity: usize,
        max_chat_length: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            topics: DashMap::new(),
            inboxes: DashMap::new(),
            capacity: capacity.max(1),
            max_chat_length,
            orders,
            geo,
            chat,
            persister,
            clock,
        }
    }

    pub fn persister(&self) -> &ChatPersister {
        &self.persister
    }

    pub fn chat(&self) -> &Arc<ChatStore> {
        &self.chat
    }

    pub fn inbox_count(&self) -> usize {
        self.inboxes.len()
    }

    fn authorized_parties(
        &self,
        identity: &Identity,
        order_id: OrderId,
    ) -> Result<Option<Parties>, DeliveryError> {
        let parties = self.orders.parties(order_id)?;
        if parties.authorize(identity) {
            Ok(Some(parties))
        } else {
            warn!(order = %order_id, caller = ?identity.id(), "non-party access to order rejected");
            Ok(None)
        }
    }

    /// Subscribes a party to an order's event stream.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::Unauthorized`] - Caller is not the customer or driver.
    /// - [`DeliveryError::InvalidState`] - Order is already terminal.
    pub fn subscribe_order(
        &self,
        identity: &Identity,
        order_id: OrderId,
    ) -> Result<broadcast::Receiver<RealtimeEvent>, DeliveryError> {
        let parties = self
            .authorized_parties(identity, order_id)?
            .ok_or(DeliveryError::Unauthorized)?;
        let closed = || {
            DeliveryError::InvalidState(format!("order {order_id} is no longer live"))
        };
        if parties.status.is_terminal() {
            return Err(closed());
        }

        let rx = self
            .topics
            .entry(order_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        // The order may have finished while the topic was being created.
        if self.orders.get(order_id)?.status.is_terminal() {
            self.close_order(order_id);
            return Err(closed());
        }
        debug!(order = %order_id, caller = ?identity.id(), "subscribed to order");
        Ok(rx)
    }

    /// Subscribes a signed-in user to their personal inbox.
    pub fn subscribe_inbox(
        &self,
        identity: &Identity,
    ) -> Result<broadcast::Receiver<RealtimeEvent>, DeliveryError> {
        let user = match (identity.id(), identity.email()) {
            (Some(id), Some(_)) => id,
            _ => return Err(DeliveryError::Unauthorized),
        };
        Ok(self
            .inboxes
            .entry(user)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe())
    }

    fn send_topic(&self, order_id: OrderId, event: RealtimeEvent) -> usize {
        self.topics
            .get(&order_id)
            .and_then(|tx| tx.send(event).ok())
            .unwrap_or(0)
    }

    fn send_inbox(&self, user: UserId, event: RealtimeEvent) -> usize {
        let sent = self.inboxes.get(&user).map(|tx| tx.send(event));
        match sent {
            Some(Ok(n)) => n,
            Some(Err(_)) => {
                self.prune_inbox(user);
                0
            }
            None => 0,
        }
    }

    /// Drops a user's inbox once nobody is listening on it.
    fn prune_inbox(&self, user: UserId) {
        if self
            .inboxes
            .remove_if(&user, |_, tx| tx.receiver_count() == 0)
            .is_some()
        {
            debug!(user = %user, "idle inbox pruned");
        }
    }

    /// Records the driver's position and pushes it to the order's customer.
    ///
    /// Pushes for terminal orders are dropped as inactive whoever sends them;
    /// otherwise pushes from anyone but the assigned driver are dropped as
    /// unauthorized.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::NotFound`] - Unknown order.
    /// - [`DeliveryError::Validation`] - Out-of-range coordinates.
    pub fn broadcast_location(
        &self,
        identity: &Identity,
        order_id: OrderId,
        lat: f64,
        lng: f64,
    ) -> Result<PushOutcome, DeliveryError> {
        let parties = self.orders.parties(order_id)?;
        let driver = parties.driver.filter(|_| parties.is_driver(identity));
        if parties.status.is_terminal() {
            // A delivered order still names its driver; keep their position fresh.
            if let Some(driver) = driver {
                self.geo.update_location(driver, lat, lng)?;
            }
            debug!(order = %order_id, status = %parties.status, "stale location push suppressed");
            return Ok(PushOutcome::Dropped(DropReason::OrderInactive));
        }
        let Some(driver) = driver else {
            warn!(order = %order_id, caller = ?identity.id(), "location push from non-driver dropped");
            return Ok(PushOutcome::Dropped(DropReason::Unauthorized));
        };

        let record = self.geo.update_location(driver, lat, lng)?;

        let event = RealtimeEvent::Location {
            order: order_id,
            driver,
            position: record.position,
            recorded_at: record.recorded_at,
        };
        let delivered =
            self.send_inbox(parties.customer, event.clone()) + self.send_topic(order_id, event);
        Ok(PushOutcome::Delivered(delivered))
    }

    /// Pushes a chat message to the order topic, then queues it for storage.
    ///
    /// Storage happens in the background; its failure never affects the push.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::Validation`] - Empty or oversized text.
    /// - [`DeliveryError::InvalidState`] - Order is terminal.
    pub fn broadcast_chat(
        &self,
        identity: &Identity,
        order_id: OrderId,
        text: &str,
    ) -> Result<PushOutcome, DeliveryError> {
        let Some(parties) = self.authorized_parties(identity, order_id)? else {
            return Ok(PushOutcome::Dropped(DropReason::Unauthorized));
        };
        if parties.status.is_terminal() {
            return Err(DeliveryError::InvalidState(format!(
                "order {order_id} is {}, chat is closed",
                parties.status
            )));
        }
        let text = chat::normalize_text(text, self.max_chat_length)?;

        let (sender, role) = if parties.is_driver(identity) {
            (parties.driver.unwrap_or(parties.customer), ChatRole::Driver)
        } else {
            (parties.customer, ChatRole::Customer)
        };
        let message = ChatMessage {
            order: order_id,
            sender,
            role,
            text,
            sent_at: self.clock.now(),
        };

        let delivered = self.send_topic(
            order_id,
            RealtimeEvent::Chat {
                message: message.clone(),
            },
        );
        self.persister.enqueue(message);

        // The order may have finished after the check above; retire again
        // behind this message so the window does not outlive the order.
        if self.orders.get(order_id)?.status.is_terminal() {
            self.persister.retire(order_id);
        }
        Ok(PushOutcome::Delivered(delivered))
    }

    /// Announces an order's new status. Terminal statuses also tear the topic
    /// down, retire the chat window and prune the parties' idle inboxes.
    pub fn publish_status(&self, order: &Order) -> PushOutcome {
        let event = RealtimeEvent::Status {
            order: order.id,
            status: order.status,
            at: self.clock.now(),
        };
        let delivered =
            self.send_inbox(order.customer, event.clone()) + self.send_topic(order.id, event);
        if order.status.is_terminal() {
            self.close_order(order.id);
            self.prune_inbox(order.customer);
            if let Some(driver) = order.driver {
                self.prune_inbox(driver);
            }
        }
        PushOutcome::Delivered(delivered)
    }

    /// Drops an order's channel and chat window. Receivers see the stream end
    /// after draining.
    pub fn close_order(&self, order_id: OrderId) {
        if self.topics.remove(&order_id).is_some() {
            debug!(order = %order_id, "order topic closed");
        }
        self.persister.retire(order_id);
    }

    pub fn has_topic(&self, order_id: OrderId) -> bool {
        self.topics.contains_key(&order_id)
    }

    /// Paged chat history for a party of the order.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::Unauthorized`] for non-parties, unlike pushes which drop silently.
    pub async fn chat_history(
        &self,
        identity: &Identity,
        order_id: OrderId,
        page: usize,
        size: usize,
    ) -> Result<HistoryPage, DeliveryError> {
        let parties = self
            .authorized_parties(identity, order_id)?
            .ok_or(DeliveryError::Unauthorized)?;
        if parties.status.is_terminal() {
            return self.chat.archived_history(order_id, page, size).await;
        }
        self.chat.history(order_id, page, size).await
    }

    pub async fn shutdown(&self) {
        self.persister.shutdown().await;
    }
}
