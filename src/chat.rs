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

//! In-order chat persistence.
//!
//! Two tiers: the durable [`ChatLog`] is the source of truth, and a bounded
//! per-order window of the most recent messages serves the common "latest
//! page" read. The window always holds a contiguous suffix of the log; saves
//! and window fills for one order are serialised so they cannot interleave.
//!
//! Broadcasting never waits on persistence: messages are handed to a
//! [`ChatPersister`] worker, and anything it fails to store is kept in a
//! failure log for operators. Windows only live while an order is active;
//! the persister drops them once the order's queued messages are stored.

use crate::base::{OrderId, UserId};
use crate::DeliveryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatRole {
    Customer,
    Driver,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub order: OrderId,
    pub sender: UserId,
    pub role: ChatRole,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Trims chat text and enforces `1..=max_len` characters.
pub fn normalize_text(text: &str, max_len: usize) -> Result<String, DeliveryError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(DeliveryError::validation("chat message is empty"));
    }
    let len = text.chars().count();
    if len > max_len {
        return Err(DeliveryError::validation(format!(
            "chat message is {len} characters, limit is {max_len}"
        )));
    }
    Ok(text.to_string())
}

/// Durable, append-only chat storage.
#[async_trait]
pub trait ChatLog: Send + Sync {
    async fn append(&self, message: &ChatMessage) -> Result<(), DeliveryError>;

    async fn count(&self, order: OrderId) -> Result<usize, DeliveryError>;

    /// Up to `limit` messages starting at chronological position `offset`.
    async fn range(
        &self,
        order: OrderId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, DeliveryError>;
}

#[derive(Debug, Default)]
pub struct InMemoryChatLog {
    messages: DashMap<OrderId, Vec<ChatMessage>>,
}

impl InMemoryChatLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatLog for InMemoryChatLog {
    async fn append(&self, message: &ChatMessage) -> Result<(), DeliveryError> {
        self.messages
            .entry(message.order)
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn count(&self, order: OrderId) -> Result<usize, DeliveryError> {
        Ok(self.messages.get(&order).map_or(0, |m| m.len()))
    }

    async fn range(
        &self,
        order: OrderId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, DeliveryError> {
        Ok(self
            .messages
            .get(&order)
            .map(|m| m.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// One page of history. `messages` are oldest-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub order: OrderId,
    pub page: usize,
    pub size: usize,
    pub total: usize,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Default)]
struct RecentWindow {
    messages: VecDeque<ChatMessage>,
    /// Durable count as of the last fill or save; `None` until first filled.
    total: Option<usize>,
}

pub struct ChatStore {
    log: Arc<dyn ChatLog>,
    windows: DashMap<OrderId, Arc<tokio::sync::Mutex<RecentWindow>>>,
    window: usize,
    max_page: usize,
}

impl ChatStore {
    pub fn new(log: Arc<dyn ChatLog>, window: usize, max_page: usize) -> Self {
        Self {
            log,
            windows: DashMap::new(),
            window,
            max_page,
        }
    }

    fn slot(&self, order: OrderId) -> Arc<tokio::sync::Mutex<RecentWindow>> {
        Arc::clone(&self.windows.entry(order).or_default())
    }

    /// Appends to the durable log, then to the recent window if it is warm.
    pub async fn save(&self, message: &ChatMessage) -> Result<(), DeliveryError> {
        let slot = self.slot(message.order);
        let mut guard = slot.lock().await;
        let recent = &mut *guard;

        self.log.append(message).await?;
        if let Some(total) = recent.total.as_mut() {
            *total += 1;
            recent.messages.push_back(message.clone());
            while recent.messages.len() > self.window {
                recent.messages.pop_front();
            }
        }
        Ok(())
    }

    /// Page `page` counted back from the newest messages.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::Validation`] unless `1 <= size <= max_page`.
    pub async fn history(
        &self,
        order: OrderId,
        page: usize,
        size: usize,
    ) -> Result<HistoryPage, DeliveryError> {
        self.check_page_size(size)?;

        let slot = self.slot(order);
        let mut recent = slot.lock().await;
        let total = match recent.total {
            Some(total) => total,
            None => {
                let total = self.log.count(order).await?;
                let offset = total.saturating_sub(self.window);
                recent.messages = self.log.range(order, offset, self.window).await?.into();
                recent.total = Some(total);
                debug!(order = %order, total, cached = recent.messages.len(), "chat window filled");
                total
            }
        };

        let (start, end) = page_bounds(total, page, size);
        let cached_from = total - recent.messages.len();

        let messages = if start >= cached_from {
            recent
                .messages
                .range(start - cached_from..end - cached_from)
                .cloned()
                .collect()
        } else {
            drop(recent);
            self.log.range(order, start, end - start).await?
        };

        Ok(HistoryPage {
            order,
            page,
            size,
            total,
            messages,
        })
    }

    /// Same paging as [`Self::history`], read from the durable log only.
    /// Finished orders are served this way so they never warm a window again.
    pub async fn archived_history(
        &self,
        order: OrderId,
        page: usize,
        size: usize,
    ) -> Result<HistoryPage, DeliveryError> {
        self.check_page_size(size)?;
        let total = self.log.count(order).await?;
        let (start, end) = page_bounds(total, page, size);
        let messages = self.log.range(order, start, end - start).await?;
        Ok(HistoryPage {
            order,
            page,
            size,
            total,
            messages,
        })
    }

    fn check_page_size(&self, size: usize) -> Result<(), DeliveryError> {
        if size == 0 || size > self.max_page {
            return Err(DeliveryError::validation(format!(
                "page size must be between 1 and {}",
                self.max_page
            )));
        }
        Ok(())
    }

    /// Total messages for an order, read from the durable log.
    pub async fn count(&self, order: OrderId) -> Result<usize, DeliveryError> {
        self.log.count(order).await
    }

    /// Forgets an order's recent window.
    pub fn evict(&self, order: OrderId) {
        if self.windows.remove(&order).is_some() {
            debug!(order = %order, "chat window evicted");
        }
    }

    pub fn is_cached(&self, order: OrderId) -> bool {
        self.windows.contains_key(&order)
    }

    pub fn cached_orders(&self) -> usize {
        self.windows.len()
    }
}

/// Chronological `[start, end)` of page `page`, counted back from the newest.
fn page_bounds(total: usize, page: usize, size: usize) -> (usize, usize) {
    let end = total.saturating_sub(page.saturating_mul(size));
    (end.saturating_sub(size), end)
}

/// A message the persister could not store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistFailure {
    pub message: ChatMessage,
    pub error: String,
}

enum Job {
    Save(ChatMessage),
    /// The order is finished; drop its window after everything queued before.
    Retire(OrderId),
}

/// Background worker that stores broadcast chat messages.
pub struct ChatPersister {
    store: Arc<ChatStore>,
    sender: parking_lot::Mutex<Option<mpsc::Sender<Job>>>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
    failures: Arc<SegQueue<PersistFailure>>,
}

impl ChatPersister {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(store: Arc<ChatStore>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let failures = Arc::new(SegQueue::new());

        let worker_store = Arc::clone(&store);
        let worker_failures = Arc::clone(&failures);
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Save(message) => {
                        if let Err(e) = worker_store.save(&message).await {
                            error!(order = %message.order, sender = %message.sender, error = %e, "chat message not persisted");
                            worker_failures.push(PersistFailure {
                                message,
                                error: e.to_string(),
                            });
                        }
                    }
                    Job::Retire(order) => worker_store.evict(order),
                }
            }
            debug!("chat persister stopped");
        });

        Self {
            store,
            sender: parking_lot::Mutex::new(Some(tx)),
            worker: parking_lot::Mutex::new(Some(worker)),
            failures,
        }
    }

    fn send(&self, job: Job) -> Result<(), (Job, &'static str)> {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.try_send(job).map_err(|e| match e {
                mpsc::error::TrySendError::Full(job) => (job, "persistence queue is full"),
                mpsc::error::TrySendError::Closed(job) => (job, "persister has stopped"),
            }),
            None => Err((job, "persister has stopped")),
        }
    }

    /// Queues a message without waiting. A full queue or stopped worker is
    /// recorded as a failure and returns `false`.
    pub fn enqueue(&self, message: ChatMessage) -> bool {
        match self.send(Job::Save(message)) {
            Ok(()) => true,
            Err((job, reason)) => {
                if let Job::Save(message) = job {
                    warn!(order = %message.order, reason, "chat message dropped before persistence");
                    self.failures.push(PersistFailure {
                        message,
                        error: reason.to_string(),
                    });
                }
                false
            }
        }
    }

    /// Drops a finished order's window once its queued messages are stored.
    /// With the queue unavailable the window is dropped right away.
    pub fn retire(&self, order: OrderId) {
        if let Err((_, reason)) = self.send(Job::Retire(order)) {
            debug!(order = %order, reason, "chat window retired inline");
            self.store.evict(order);
        }
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn drain_failures(&self) -> Vec<PersistFailure> {
        std::iter::from_fn(|| self.failures.pop()).collect()
    }

    /// Stops accepting messages and waits for the queue to drain.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "chat persister panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn message(order: u64, n: usize) -> ChatMessage {
        ChatMessage {
            order: OrderId(order),
            sender: UserId(1),
            role: ChatRole::Customer,
            text: format!("m{n}"),
            sent_at: DateTime::UNIX_EPOCH + TimeDelta::seconds(n as i64),
        }
    }

    fn texts(page: &HistoryPage) -> Vec<&str> {
        page.messages.iter().map(|m| m.text.as_str()).collect()
    }

    #[test]
    fn text_is_trimmed_and_bounded() {
        assert_eq!(normalize_text("  hi  ", 10).unwrap(), "hi");
        assert!(normalize_text("   ", 10).is_err());
        assert!(normalize_text("ééééé", 5).is_ok());
        assert!(normalize_text("abcdef", 5).is_err());
    }

    #[tokio::test]
    async fn newest_page_comes_from_window() {
        let store = ChatStore::new(Arc::new(InMemoryChatLog::new()), 3, 10);
        for n in 0..5 {
            store.save(&message(1, n)).await.unwrap();
        }

        let page = store.history(OrderId(1), 0, 2).await.unwrap();
        assert_eq!(texts(&page), vec!["m3", "m4"]);
        assert_eq!(page.total, 5);

        store.save(&message(1, 5)).await.unwrap();
        let page = store.history(OrderId(1), 0, 3).await.unwrap();
        assert_eq!(texts(&page), vec!["m3", "m4", "m5"]);
    }

    #[tokio::test]
    async fn older_pages_fall_back_to_log() {
        let store = ChatStore::new(Arc::new(InMemoryChatLog::new()), 2, 10);
        for n in 0..7 {
            store.save(&message(1, n)).await.unwrap();
        }

        assert_eq!(texts(&store.history(OrderId(1), 1, 3).await.unwrap()), vec!["m1", "m2", "m3"]);
        assert_eq!(texts(&store.history(OrderId(1), 2, 3).await.unwrap()), vec!["m0"]);
        assert!(store.history(OrderId(1), 3, 3).await.unwrap().messages.is_empty());
        assert_eq!(store.count(OrderId(1)).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn page_size_is_validated() {
        let store = ChatStore::new(Arc::new(InMemoryChatLog::new()), 2, 10);
        assert!(store.history(OrderId(1), 0, 0).await.is_err());
        assert!(store.history(OrderId(1), 0, 11).await.is_err());
        assert_eq!(store.history(OrderId(9), 0, 5).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn retired_window_is_dropped_after_queued_saves() {
        let store = Arc::new(ChatStore::new(Arc::new(InMemoryChatLog::new()), 5, 10));
        let persister = ChatPersister::spawn(Arc::clone(&store), 16);
        store.history(OrderId(3), 0, 5).await.unwrap();
        assert!(store.is_cached(OrderId(3)));

        for n in 0..3 {
            assert!(persister.enqueue(message(3, n)));
        }
        persister.retire(OrderId(3));
        persister.shutdown().await;

        assert!(!store.is_cached(OrderId(3)));
        assert_eq!(store.count(OrderId(3)).await.unwrap(), 3);

        let page = store.archived_history(OrderId(3), 0, 2).await.unwrap();
        assert_eq!(texts(&page), vec!["m1", "m2"]);
        assert_eq!(page.total, 3);
        assert!(!store.is_cached(OrderId(3)));
        assert_eq!(store.cached_orders(), 0);

        // Once stopped, retiring evicts directly.
        store.history(OrderId(4), 0, 5).await.unwrap();
        persister.retire(OrderId(4));
        assert!(!store.is_cached(OrderId(4)));
    }

    #[tokio::test]
    async fn persister_drains_on_shutdown() {
        let store = Arc::new(ChatStore::new(Arc::new(InMemoryChatLog::new()), 5, 10));
        let persister = ChatPersister::spawn(Arc::clone(&store), 16);
        for n in 0..4 {
            assert!(persister.enqueue(message(2, n)));
        }
        persister.shutdown().await;

        assert_eq!(store.count(OrderId(2)).await.unwrap(), 4);
        assert!(!persister.enqueue(message(2, 9)));
        assert_eq!(persister.drain_failures().len(), 1);
    }
}
