use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use super::{MemoryStorage, StorageBackend};
use crate::core::error::{StorageError, StorageResult};
use crate::core::message::Message;

/// Durable backend that switches to in-process storage on its first error.
///
/// Once degraded it stays degraded: messages already in the durable store are
/// left there, new traffic is served from memory so dispatch keeps running.
pub struct FailoverStorage {
    primary: Arc<dyn StorageBackend>,
    fallback: Arc<MemoryStorage>,
    degraded: AtomicBool,
}

impl FailoverStorage {
    pub fn new(primary: Arc<dyn StorageBackend>, fallback: Arc<MemoryStorage>) -> Self {
        Self {
            primary,
            fallback,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn active(&self) -> Option<&Arc<dyn StorageBackend>> {
        (!self.is_degraded()).then_some(&self.primary)
    }

    fn degrade(&self, op: &'static str, err: &StorageError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            error!(
                op,
                backend = self.primary.kind(),
                error = %err,
                "Durable storage failed; switching to in-process storage"
            );
        } else {
            warn!(op, error = %err, "Durable storage error after failover");
        }
    }
}

/// Runs `$call` against the primary backend unless degraded, and against the
/// in-process fallback otherwise or when the primary call fails.
macro_rules! with_failover {
    ($this:ident, $op:literal, |$b:ident| $call:expr) => {{
        if let Some($b) = $this.active() {
            match $call.await {
                Ok(v) => return Ok(v),
                Err(e) => $this.degrade($op, &e),
            }
        }
        let $b = &$this.fallback;
        $call.await
    }};
}

#[async_trait]
impl StorageBackend for FailoverStorage {
    async fn insert(&self, queue: &str, message: Message, score: f64) -> StorageResult<()> {
        with_failover!(self, "insert", |b| b.insert(queue, message.clone(), score))
    }

    async fn push_front(&self, queue: &str, message: Message, score: f64) -> StorageResult<()> {
        with_failover!(self, "push_front", |b| b.push_front(queue, message.clone(), score))
    }

    async fn peek(&self, queue: &str) -> StorageResult<Option<Message>> {
        with_failover!(self, "peek", |b| b.peek(queue))
    }

    async fn extract_highest_priority(&self, queue: &str) -> StorageResult<Option<Message>> {
        with_failover!(self, "extract", |b| b.extract_highest_priority(queue))
    }

    async fn size(&self, queue: &str) -> StorageResult<usize> {
        with_failover!(self, "size", |b| b.size(queue))
    }

    async fn evict_oldest(&self, queue: &str) -> StorageResult<Option<Message>> {
        with_failover!(self, "evict_oldest", |b| b.evict_oldest(queue))
    }

    async fn purge(&self, queue: &str) -> StorageResult<usize> {
        with_failover!(self, "purge", |b| b.purge(queue))
    }

    async fn list(&self, queue: &str, limit: usize) -> StorageResult<Vec<Message>> {
        with_failover!(self, "list", |b| b.list(queue, limit))
    }

    async fn close(&self) -> StorageResult<()> {
        self.primary.close().await
    }

    fn kind(&self) -> &'static str {
        if self.is_degraded() {
            self.fallback.kind()
        } else {
            self.primary.kind()
        }
    }
}
