//! Dead-letter handling.
//!
//! A queue with dead-lettering enabled gets a companion `<name>-dlq` queue on
//! first use. Dead-letter queues:
//! - hold ten times the origin's capacity
//! - are FIFO and never dead-letter themselves (overflow evicts the oldest)
//! - keep the original message id, with status `DeadLettered` and provenance

use std::sync::Arc;

use tracing::{error, warn};

use crate::core::error::StorageResult;
use crate::core::message::{current_timestamp, DeadLetterInfo, Message, MessageStatus};
use crate::core::queue::{QueueOptions, QueueRecord, QueueRegistry};
use crate::core::telemetry::{Telemetry, TelemetryEvent};

pub const DLQ_SUFFIX: &str = "-dlq";
const DLQ_CAPACITY_FACTOR: usize = 10;

pub const REASON_QUEUE_FULL: &str = "queue full";
pub const REASON_MAX_RETRIES: &str = "max retries exceeded";

pub fn dlq_name(queue: &str) -> String {
    format!("{queue}{DLQ_SUFFIX}")
}

pub fn dlq_options(origin: &QueueOptions) -> QueueOptions {
    QueueOptions {
        max_size: origin.max_size.saturating_mul(DLQ_CAPACITY_FACTOR),
        persistent_storage: origin.persistent_storage,
        priority_ordering: false,
        dead_letter_enabled: false,
    }
}

pub struct DeadLetterSink {
    registry: Arc<QueueRegistry>,
    telemetry: Arc<Telemetry>,
}

impl DeadLetterSink {
    pub fn new(registry: Arc<QueueRegistry>, telemetry: Arc<Telemetry>) -> Self {
        Self {
            registry,
            telemetry,
        }
    }

    /// Moves `message` to the dead-letter queue of `origin`.
    ///
    /// Never fails: if the copy cannot be stored the message is logged and
    /// dropped. Returns whether the copy landed.
    pub async fn dead_letter(&self, origin: &QueueRecord, mut message: Message, reason: &str) -> bool {
        let dlq = self
            .registry
            .create_queue(&dlq_name(origin.name()), dlq_options(&origin.options()));

        let message_id = message.id.clone();
        message.status = MessageStatus::DeadLettered;
        message.dead_letter = Some(DeadLetterInfo {
            original_queue: origin.name().to_string(),
            failed_at: current_timestamp(),
            reason: reason.to_string(),
        });

        if let Err(e) = self.store(&dlq, message).await {
            error!(
                queue = %origin.name(),
                dlq = %dlq.name(),
                message_id = %message_id,
                error = %e,
                "Failed to dead-letter message; dropping it"
            );
            return false;
        }

        warn!(
            queue = %origin.name(),
            dlq = %dlq.name(),
            message_id = %message_id,
            reason,
            "Message moved to dead-letter queue"
        );
        self.telemetry.record(TelemetryEvent::MessageMovedToDlq {
            original_queue: origin.name().to_string(),
            message_id,
            dlq_name: dlq.name().to_string(),
            reason: reason.to_string(),
        });
        true
    }

    /// Inserts into the dead-letter queue, evicting its oldest entry when full.
    async fn store(&self, dlq: &QueueRecord, mut message: Message) -> StorageResult<()> {
        let _gate = dlq.lock_gate().await;
        let storage = dlq.storage();

        if storage.size(dlq.name()).await? >= dlq.options().max_size {
            if let Some(evicted) = storage.evict_oldest(dlq.name()).await? {
                self.telemetry.record(TelemetryEvent::MessageEvicted {
                    queue_name: dlq.name().to_string(),
                    message_id: evicted.id,
                });
            }
        }

        message.queue = dlq.name().to_string();
        let score = dlq.score(&message);
        storage.insert(dlq.name(), message, score).await?;
        dlq.stats().record_received();
        Ok(())
    }

    /// Up to `limit` dead-lettered messages of `queue`, oldest first.
    pub async fn list(&self, queue: &str, limit: usize) -> StorageResult<Vec<Message>> {
        let name = dlq_name(queue);
        match self.registry.get(&name) {
            Some(dlq) => dlq.storage().list(&name, limit).await,
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::PublishOptions;
    use crate::core::storage::StorageSet;

    fn sink() -> (DeadLetterSink, Arc<QueueRegistry>) {
        let telemetry = Arc::new(Telemetry::new(100));
        let registry = Arc::new(QueueRegistry::new(
            StorageSet::in_memory(),
            Arc::clone(&telemetry),
        ));
        (DeadLetterSink::new(Arc::clone(&registry), telemetry), registry)
    }

    #[test]
    fn dlq_is_fifo_and_ten_times_larger() {
        let opts = dlq_options(&QueueOptions::default().with_max_size(7));
        assert_eq!(opts.max_size, 70);
        assert!(!opts.priority_ordering);
        assert!(!opts.dead_letter_enabled);
    }

    #[tokio::test]
    async fn copy_keeps_id_and_gains_provenance() {
        let (sink, registry) = sink();
        let origin = registry.create_queue("alerts", QueueOptions::default());
        let message = Message::new("alerts", "x", PublishOptions::default(), 3);
        let id = message.id.clone();

        assert!(sink.dead_letter(&origin, message, REASON_MAX_RETRIES).await);

        let listed = sink.list("alerts", 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        let copy = &listed[0];
        assert_eq!(copy.id, id);
        assert_eq!(copy.queue, "alerts-dlq");
        assert_eq!(copy.status, MessageStatus::DeadLettered);
        let info = copy.dead_letter.as_ref().unwrap();
        assert_eq!(info.original_queue, "alerts");
        assert_eq!(info.reason, REASON_MAX_RETRIES);
    }

    #[tokio::test]
    async fn full_dlq_evicts_oldest() {
        let (sink, registry) = sink();
        let origin = registry.create_queue("tiny", QueueOptions::default().with_max_size(1));
        for i in 0..11u64 {
            let mut m = Message::new("tiny", format!("m{i}"), PublishOptions::default(), 3);
            m.timestamp = 1_000 + i;
            sink.dead_letter(&origin, m, REASON_QUEUE_FULL).await;
        }

        let listed = sink.list("tiny", 100).await.unwrap();
        assert_eq!(listed.len(), 10);
        assert_eq!(listed[0].payload, "m1");
    }

    #[tokio::test]
    async fn unknown_dlq_lists_nothing() {
        let (sink, _) = sink();
        assert!(sink.list("nobody", 10).await.unwrap().is_empty());
    }
}
