use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use super::{QueueOptions, QueueRecord};
use crate::core::storage::StorageSet;
use crate::core::telemetry::{Telemetry, TelemetryEvent};

/// Thread-safe map of queue name to [`QueueRecord`].
pub struct QueueRegistry {
    queues: DashMap<String, Arc<QueueRecord>>,
    storage: StorageSet,
    telemetry: Arc<Telemetry>,
}

impl QueueRegistry {
    pub fn new(storage: StorageSet, telemetry: Arc<Telemetry>) -> Self {
        Self {
            queues: DashMap::new(),
            storage,
            telemetry,
        }
    }

    /// Returns the queue named `name`, creating it with `options` if absent.
    ///
    /// An existing queue is returned untouched: its options and stats are kept.
    pub fn create_queue(&self, name: &str, options: QueueOptions) -> Arc<QueueRecord> {
        if let Some(existing) = self.queues.get(name) {
            return Arc::clone(&*existing);
        }

        let mut created = false;
        let record = self
            .queues
            .entry(name.to_string())
            .or_insert_with(|| {
                created = true;
                let storage = self.storage.select(options.persistent_storage);
                Arc::new(QueueRecord::new(name, options, storage))
            })
            .clone();

        if created {
            info!(
                queue = %name,
                max_size = options.max_size,
                priority = options.priority_ordering,
                dead_letter = options.dead_letter_enabled,
                storage = record.storage().kind(),
                "Queue created"
            );
            self.telemetry.record(TelemetryEvent::QueueCreated {
                queue_name: name.to_string(),
            });
        }
        record
    }

    pub fn get(&self, name: &str) -> Option<Arc<QueueRecord>> {
        self.queues.get(name).map(|entry| Arc::clone(&*entry))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    /// Removes the queue and purges its pending messages.
    ///
    /// Returns whether the queue existed.
    pub async fn clear(&self, name: &str) -> bool {
        let Some((_, record)) = self.queues.remove(name) else {
            return false;
        };

        match record.storage().purge(name).await {
            Ok(purged) => info!(queue = %name, purged, "Queue cleared"),
            Err(e) => warn!(queue = %name, error = %e, "Queue removed but purge failed"),
        }
        self.telemetry.record(TelemetryEvent::QueueCleared {
            queue_name: name.to_string(),
        });
        true
    }

    /// Queue names in lexical order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// All queues in lexical name order.
    pub fn all(&self) -> Vec<Arc<QueueRecord>> {
        let mut all: Vec<Arc<QueueRecord>> =
            self.queues.iter().map(|e| Arc::clone(e.value())).collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
