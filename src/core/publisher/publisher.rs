use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::core::dlq::{DeadLetterSink, REASON_QUEUE_FULL};
use crate::core::error::{BrokerError, Result};
use crate::core::message::{Message, MessageId, PublishOptions};
use crate::core::queue::QueueRegistry;
use crate::core::telemetry::{Telemetry, TelemetryEvent};

/// Where an accepted message ended up.
enum Placement {
    Queued,
    QueuedAfterEviction(Message),
    Overflow(Message),
}

/// Accepts messages for existing queues.
///
/// Capacity policy when a queue is full:
/// - dead-lettering enabled: the incoming message goes to `<name>-dlq`
/// - otherwise: the oldest pending message is dropped to make room
pub struct Publisher {
    registry: Arc<QueueRegistry>,
    dead_letters: Arc<DeadLetterSink>,
    telemetry: Arc<Telemetry>,
    wake: Arc<Notify>,
    default_max_retries: u32,
}

impl Publisher {
    pub fn new(
        registry: Arc<QueueRegistry>,
        dead_letters: Arc<DeadLetterSink>,
        telemetry: Arc<Telemetry>,
        wake: Arc<Notify>,
        default_max_retries: u32,
    ) -> Self {
        Self {
            registry,
            dead_letters,
            telemetry,
            wake,
            default_max_retries,
        }
    }

    pub async fn publish(
        &self,
        queue: &str,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<MessageId> {
        let record = self
            .registry
            .get(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;

        let message = Message::new(queue, payload, options, self.default_max_retries);
        let id = message.id.clone();

        let placement = {
            let _gate = record.lock_gate().await;
            let storage = record.storage();
            let depth = storage.size(queue).await?;

            if depth < record.options().max_size {
                let score = record.score(&message);
                storage.insert(queue, message, score).await?;
                Placement::Queued
            } else if record.options().dead_letter_enabled {
                Placement::Overflow(message)
            } else {
                let evicted = storage.evict_oldest(queue).await?;
                let score = record.score(&message);
                storage.insert(queue, message, score).await?;
                match evicted {
                    Some(old) => Placement::QueuedAfterEviction(old),
                    None => Placement::Queued,
                }
            }
        };

        record.stats().record_received();
        self.telemetry.record(TelemetryEvent::MessagePublished {
            queue_name: queue.to_string(),
            message_id: id.clone(),
        });

        match placement {
            Placement::Queued => {
                debug!(queue = %queue, message_id = %id, "Message queued");
            }
            Placement::QueuedAfterEviction(old) => {
                warn!(
                    queue = %queue,
                    evicted = %old.id,
                    "Queue full; evicted oldest pending message"
                );
                self.telemetry.record(TelemetryEvent::MessageEvicted {
                    queue_name: queue.to_string(),
                    message_id: old.id,
                });
            }
            Placement::Overflow(message) => {
                self.dead_letters
                    .dead_letter(&record, message, REASON_QUEUE_FULL)
                    .await;
            }
        }

        self.wake.notify_one();
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dlq::dlq_name;
    use crate::core::queue::QueueOptions;
    use crate::core::storage::StorageSet;

    struct Fixture {
        publisher: Publisher,
        registry: Arc<QueueRegistry>,
        telemetry: Arc<Telemetry>,
    }

    fn fixture() -> Fixture {
        let telemetry = Arc::new(Telemetry::new(1000));
        let registry = Arc::new(QueueRegistry::new(
            StorageSet::in_memory(),
            Arc::clone(&telemetry),
        ));
        let sink = Arc::new(DeadLetterSink::new(
            Arc::clone(&registry),
            Arc::clone(&telemetry),
        ));
        let publisher = Publisher::new(
            Arc::clone(&registry),
            sink,
            Arc::clone(&telemetry),
            Arc::new(Notify::new()),
            3,
        );
        Fixture {
            publisher,
            registry,
            telemetry,
        }
    }

    #[tokio::test]
    async fn unknown_queue_is_rejected() {
        let f = fixture();
        let err = f
            .publisher
            .publish("ghost", "x", PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::QueueNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn overflow_goes_to_dead_letter_queue() {
        let f = fixture();
        let q = f.registry.create_queue("q", QueueOptions::default().with_max_size(2));
        for i in 0..3 {
            f.publisher
                .publish("q", format!("m{i}"), PublishOptions::default())
                .await
                .unwrap();
        }

        assert_eq!(q.depth().await, 2);
        let dlq = f.registry.get(&dlq_name("q")).unwrap();
        let parked = dlq.storage().list(dlq.name(), 10).await.unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].payload, "m2");
        assert_eq!(
            parked[0].dead_letter.as_ref().unwrap().reason,
            REASON_QUEUE_FULL
        );
        assert_eq!(q.stats().snapshot().total_messages, 3);
    }

    #[tokio::test]
    async fn overflow_without_dead_letter_evicts_oldest() {
        let f = fixture();
        let q = f.registry.create_queue(
            "q",
            QueueOptions::default()
                .with_max_size(2)
                .with_dead_letter(false),
        );
        let first = f.publisher.publish("q", "m0", PublishOptions::default()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        f.publisher.publish("q", "m1", PublishOptions::default()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        f.publisher.publish("q", "m2", PublishOptions::default()).await.unwrap();

        let pending = q.storage().list("q", 10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|m| m.id != first));
        assert!(f.registry.get(&dlq_name("q")).is_none());
        assert_eq!(f.telemetry.snapshot().total_evicted, 1);
    }
}
