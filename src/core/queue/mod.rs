//! Queues: named pending collections with their subscriptions and stats.
//!
//! A [`QueueRecord`] owns no messages itself; pending messages live in the
//! storage backend chosen at creation. The record holds what the broker needs
//! to route, gate and account for them.

pub mod registry;

pub use registry::QueueRegistry;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::core::message::Message;
use crate::core::stats::ProcessingStats;
use crate::core::storage::{priority_score, StorageBackend};
use crate::core::subscriber::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueOptions {
    /// Upper bound on pending messages, enforced at publish.
    pub max_size: usize,
    /// Keep pending messages in the durable backend when one is configured.
    pub persistent_storage: bool,
    /// Order by message priority; FIFO otherwise.
    pub priority_ordering: bool,
    /// Route overflow and exhausted retries to `<name>-dlq`.
    pub dead_letter_enabled: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_size: 1000,
            persistent_storage: true,
            priority_ordering: true,
            dead_letter_enabled: true,
        }
    }
}

impl QueueOptions {
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_dead_letter(mut self, enabled: bool) -> Self {
        self.dead_letter_enabled = enabled;
        self
    }

    pub fn with_priority_ordering(mut self, enabled: bool) -> Self {
        self.priority_ordering = enabled;
        self
    }

    pub fn with_persistent_storage(mut self, enabled: bool) -> Self {
        self.persistent_storage = enabled;
        self
    }
}

pub struct QueueRecord {
    name: String,
    options: QueueOptions,
    storage: Arc<dyn StorageBackend>,
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    stats: ProcessingStats,
    /// Serialises capacity check + insert across publishers.
    gate: Mutex<()>,
}

impl fmt::Debug for QueueRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueRecord")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("storage", &self.storage.kind())
            .field("subscriptions", &self.subscriber_count())
            .finish()
    }
}

impl QueueRecord {
    pub fn new(name: impl Into<String>, options: QueueOptions, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            name: name.into(),
            options,
            storage,
            subscriptions: RwLock::new(Vec::new()),
            stats: ProcessingStats::new(),
            gate: Mutex::new(()),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn options(&self) -> QueueOptions {
        self.options
    }

    #[inline]
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn stats(&self) -> &ProcessingStats {
        &self.stats
    }

    /// Ordering score of `message` within this queue.
    pub fn score(&self, message: &Message) -> f64 {
        priority_score(message, self.options.priority_ordering)
    }

    pub fn add_subscription(&self, subscription: Arc<Subscription>) {
        self.subscriptions.write().push(subscription);
    }

    /// Subscriptions in registration order.
    pub fn subscriptions(&self) -> Vec<Arc<Subscription>> {
        self.subscriptions.read().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscriptions.read().is_empty()
    }

    pub(crate) async fn lock_gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    pub async fn depth(&self) -> usize {
        self.storage.size(&self.name).await.unwrap_or_else(|e| {
            tracing::warn!(queue = %self.name, error = %e, "Failed to read queue depth");
            0
        })
    }
}
