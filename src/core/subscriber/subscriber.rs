use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::FutureExt;
use serde::Serialize;
use uuid::Uuid;

use super::handler::{DeliveryContext, MessageHandler};
use crate::core::error::DeliveryError;
use crate::core::message::Message;
use crate::core::stats::{ProcessingStats, ProcessingStatsSnapshot};

pub type SubscriptionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubscriptionOptions {
    /// When false the handler must call [`DeliveryContext::ack`].
    pub auto_acknowledge: bool,
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            auto_acknowledge: true,
            batch_size: 1,
            concurrency: 1,
        }
    }
}

impl SubscriptionOptions {
    pub fn manual_ack() -> Self {
        Self {
            auto_acknowledge: false,
            ..Self::default()
        }
    }
}

/// A handler attached to one queue.
pub struct Subscription {
    id: SubscriptionId,
    queue: String,
    handler: Arc<dyn MessageHandler>,
    options: SubscriptionOptions,
    stats: ProcessingStats,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("queue", &self.queue)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Per-subscription view returned in queue stats.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionSnapshot {
    pub id: SubscriptionId,
    pub options: SubscriptionOptions,
    pub processed_messages: u64,
    pub failed_messages: u64,
    pub average_processing_time_ms: f64,
}

impl Subscription {
    pub fn new(
        queue: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
        options: SubscriptionOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            queue: queue.into(),
            handler,
            options,
            stats: ProcessingStats::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn options(&self) -> SubscriptionOptions {
        self.options
    }

    pub fn stats(&self) -> &ProcessingStats {
        &self.stats
    }

    pub fn snapshot(&self) -> SubscriptionSnapshot {
        let s: ProcessingStatsSnapshot = self.stats.snapshot();
        SubscriptionSnapshot {
            id: self.id.clone(),
            options: self.options,
            processed_messages: s.processed_messages,
            failed_messages: s.failed_messages,
            average_processing_time_ms: s.average_processing_time_ms,
        }
    }

    /// Runs the handler for `message` under `deadline` with panic isolation
    /// and records the outcome in this subscription's stats.
    ///
    /// Returns the processing time in milliseconds on success.
    pub async fn deliver(&self, message: &Message, deadline: Duration) -> Result<u64, DeliveryError> {
        let ctx = DeliveryContext::for_message(message, &self.id);
        let acked = ctx.clone();
        let payload: Bytes = message.payload.clone();

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            deadline,
            AssertUnwindSafe(self.handler.handle(payload, ctx)).catch_unwind(),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Err(_) => Err(DeliveryError::Timeout(deadline)),
            Ok(Err(panic)) => Err(DeliveryError::Panicked(panic_message(panic.as_ref()))),
            Ok(Ok(Err(e))) => Err(DeliveryError::Handler(e)),
            Ok(Ok(Ok(()))) if !self.options.auto_acknowledge && !acked.is_acked() => {
                Err(DeliveryError::NotAcknowledged)
            }
            Ok(Ok(Ok(()))) => Ok(elapsed_ms),
        };

        match &result {
            Ok(ms) => self.stats.record_success(*ms),
            Err(_) => self.stats.record_failure(),
        }
        result
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
