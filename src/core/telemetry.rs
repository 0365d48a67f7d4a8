//! Broker telemetry: bounded event log, process-wide counters and live
//! observers.
//!
//! Every state transition the broker makes is recorded here as a
//! [`TelemetryEvent`]. Observers receive events through a `tokio` broadcast
//! channel; a slow observer loses the oldest events rather than slowing the
//! dispatch loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::core::message::{current_timestamp, MessageId};

/// Buffer of the observer channel.
const OBSERVER_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    QueueCreated {
        queue_name: String,
    },
    MessagePublished {
        queue_name: String,
        message_id: MessageId,
    },
    MessageProcessed {
        queue_name: String,
        message_id: MessageId,
        subscription_id: String,
        processing_time_ms: u64,
    },
    MessageFailed {
        queue_name: String,
        message_id: MessageId,
        subscription_id: String,
        error: String,
    },
    MessageRetryScheduled {
        queue_name: String,
        message_id: MessageId,
        retry_count: u32,
        delay_ms: u64,
    },
    MessageMovedToDlq {
        original_queue: String,
        message_id: MessageId,
        dlq_name: String,
        reason: String,
    },
    MessageEvicted {
        queue_name: String,
        message_id: MessageId,
    },
    QueueCleared {
        queue_name: String,
    },
}

impl TelemetryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryEvent::QueueCreated { .. } => "queue_created",
            TelemetryEvent::MessagePublished { .. } => "message_published",
            TelemetryEvent::MessageProcessed { .. } => "message_processed",
            TelemetryEvent::MessageFailed { .. } => "message_failed",
            TelemetryEvent::MessageRetryScheduled { .. } => "message_retry_scheduled",
            TelemetryEvent::MessageMovedToDlq { .. } => "message_moved_to_dlq",
            TelemetryEvent::MessageEvicted { .. } => "message_evicted",
            TelemetryEvent::QueueCleared { .. } => "queue_cleared",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: TelemetryEvent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub total_published: u64,
    /// Successful deliveries, one per subscription.
    pub total_processed: u64,
    /// Failed deliveries, one per subscription.
    pub total_failed: u64,
    pub total_dead_lettered: u64,
    pub total_evicted: u64,
    pub average_processing_time_ms: f64,
    pub event_log_size: usize,
    pub uptime_ms: u64,
}

pub struct Telemetry {
    capacity: usize,
    log: Mutex<VecDeque<EventRecord>>,
    observers: RwLock<Option<broadcast::Sender<EventRecord>>>,
    published: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
    evicted: AtomicU64,
    processing_ms: AtomicU64,
    started: Instant,
}

impl Telemetry {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(OBSERVER_BUFFER);
        Self {
            capacity: capacity.max(1),
            log: Mutex::new(VecDeque::with_capacity(capacity.min(OBSERVER_BUFFER))),
            observers: RwLock::new(Some(tx)),
            published: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            processing_ms: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::MessagePublished { .. } => {
                self.published.fetch_add(1, Ordering::Relaxed);
            }
            TelemetryEvent::MessageProcessed {
                processing_time_ms, ..
            } => {
                self.processing_ms
                    .fetch_add(*processing_time_ms, Ordering::Relaxed);
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            TelemetryEvent::MessageFailed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            TelemetryEvent::MessageMovedToDlq { .. } => {
                self.dead_lettered.fetch_add(1, Ordering::Relaxed);
            }
            TelemetryEvent::MessageEvicted { .. } => {
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        let record = EventRecord {
            at_ms: current_timestamp(),
            event,
        };

        {
            let mut log = self.log.lock();
            if log.len() >= self.capacity {
                log.pop_front();
            }
            log.push_back(record.clone());
        }

        if let Some(tx) = self.observers.read().as_ref() {
            // No receivers is fine.
            let _ = tx.send(record);
        }
    }

    /// The `n` most recent events, oldest first.
    pub fn tail(&self, n: usize) -> Vec<EventRecord> {
        let log = self.log.lock();
        let skip = log.len().saturating_sub(n);
        log.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live event feed. After [`detach_observers`](Self::detach_observers) the
    /// returned receiver is already closed.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        match self.observers.read().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Closes the observer feed; existing receivers see the channel close.
    pub fn detach_observers(&self) {
        if let Some(tx) = self.observers.write().take() {
            debug!(observers = tx.receiver_count(), "Detaching telemetry observers");
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let processing_ms = self.processing_ms.load(Ordering::Relaxed);
        TelemetrySnapshot {
            total_published: self.published.load(Ordering::Relaxed),
            total_processed: processed,
            total_failed: self.failed.load(Ordering::Relaxed),
            total_dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            total_evicted: self.evicted.load(Ordering::Relaxed),
            average_processing_time_ms: if processed == 0 {
                0.0
            } else {
                processing_ms as f64 / processed as f64
            },
            event_log_size: self.len(),
            uptime_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}
