//! Pluggable pending-message storage.
//!
//! Every queue keeps its pending messages in a [`StorageBackend`]:
//! - [`MemoryStorage`]: in-process ordered list, stable among equal scores
//! - [`RedisStorage`]: sorted set per queue, survives broker restarts
//! - [`FailoverStorage`]: durable backend that degrades to memory on error
//!
//! Both backends must look identical to the caller, except for the ordering
//! of equal scores which only the in-process backend keeps stable.

pub mod durable;
pub mod failover;
pub mod memory;

pub use failover::FailoverStorage;
pub use memory::MemoryStorage;
pub use durable::RedisStorage;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{StorageConfig, StorageKind};
use crate::core::error::StorageResult;
use crate::core::message::Message;

/// Common interface for all pending-message stores.
///
/// `queue` is the queue name; backends derive their own keys from it.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Inserts `message` ahead of every entry with a strictly lower `score`.
    async fn insert(&self, queue: &str, message: Message, score: f64) -> StorageResult<()>;

    /// Places `message` at the head of the queue (redelivery). `score` is the
    /// message's own ordering score; the stored score never drops below the
    /// current head's.
    async fn push_front(&self, queue: &str, message: Message, score: f64) -> StorageResult<()>;

    /// Returns a copy of the head without removing it.
    async fn peek(&self, queue: &str) -> StorageResult<Option<Message>>;

    /// Removes and returns the head.
    async fn extract_highest_priority(&self, queue: &str) -> StorageResult<Option<Message>>;

    async fn size(&self, queue: &str) -> StorageResult<usize>;

    /// Removes the pending message with the oldest timestamp.
    async fn evict_oldest(&self, queue: &str) -> StorageResult<Option<Message>>;

    /// Drops every pending message of the queue, returning how many were removed.
    async fn purge(&self, queue: &str) -> StorageResult<usize>;

    /// Up to `limit` messages in dispatch order, without removing them.
    async fn list(&self, queue: &str, limit: usize) -> StorageResult<Vec<Message>>;

    /// Releases connections held by the backend.
    async fn close(&self) -> StorageResult<()>;

    fn kind(&self) -> &'static str;
}

/// Score used to order a message inside its queue.
///
/// Priority queues order by `priority`; plain queues by negated timestamp so
/// that the oldest message always has the highest score.
pub fn priority_score(message: &Message, priority_ordering: bool) -> f64 {
    if priority_ordering {
        f64::from(message.priority)
    } else {
        -(message.timestamp as f64)
    }
}

/// The backends available to queues: in-process always, durable when configured
/// and reachable.
#[derive(Clone)]
pub struct StorageSet {
    pub memory: Arc<MemoryStorage>,
    pub durable: Option<Arc<FailoverStorage>>,
}

impl StorageSet {
    pub fn in_memory() -> Self {
        Self {
            memory: Arc::new(MemoryStorage::new()),
            durable: None,
        }
    }

    /// Connects the configured backend. An unreachable durable store is not an
    /// error: the broker keeps running on in-process storage only.
    pub async fn connect(config: &StorageConfig) -> Self {
        let mut set = Self::in_memory();
        if config.backend != StorageKind::Redis {
            return set;
        }

        let timeout = Duration::from_millis(config.connect_timeout_ms);
        match RedisStorage::connect(&config.url, &config.key_prefix, timeout).await {
            Ok(redis) => {
                info!(url = %config.url, "Connected durable storage backend");
                set.durable = Some(Arc::new(FailoverStorage::new(
                    Arc::new(redis),
                    Arc::clone(&set.memory),
                )));
            }
            Err(e) => {
                warn!(
                    url = %config.url,
                    error = %e,
                    "Durable storage unreachable; falling back to in-process storage"
                );
            }
        }
        set
    }

    /// Backend for a queue with the given `persistent_storage` flag.
    pub fn select(&self, persistent: bool) -> Arc<dyn StorageBackend> {
        match (&self.durable, persistent) {
            (Some(durable), true) => Arc::clone(durable) as Arc<dyn StorageBackend>,
            _ => Arc::clone(&self.memory) as Arc<dyn StorageBackend>,
        }
    }

    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }

    pub async fn close(&self) {
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.close().await {
                warn!(error = %e, "Failed to close durable storage backend");
            }
        }
    }
}
