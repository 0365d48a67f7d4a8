//! Dispatch: drain eligible messages from every subscribed queue and fan them
//! out to the queue's subscriptions.
//!
//! A message is delivered to every subscription in registration order. If any
//! of them fails, the whole message is redelivered later to all of them (the
//! retry budget is shared) until `max_retries` is spent; then it is
//! dead-lettered.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::core::dlq::{DeadLetterSink, REASON_MAX_RETRIES, REASON_QUEUE_FULL};
use crate::core::error::StorageResult;
use crate::core::message::{current_timestamp, Message, MessageStatus};
use crate::core::queue::{QueueRecord, QueueRegistry};
use crate::core::telemetry::{Telemetry, TelemetryEvent};
use crate::util::backoff_delay;

tokio::task_local! {
    /// Set for the duration of a drain pass, handlers included.
    static IN_DRAIN: ();
}

/// Whether the current task is running a drain pass (i.e. inside a handler).
pub fn in_drain_pass() -> bool {
    IN_DRAIN.try_with(|_| ()).is_ok()
}

// ───────────────────────────────────────────────────────────
// Retry schedule
// ───────────────────────────────────────────────────────────

struct RetryEntry {
    due: Instant,
    seq: u64,
    queue: String,
    message: Message,
}

impl PartialEq for RetryEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for RetryEntry {}

impl PartialOrd for RetryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for RetryEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Messages waiting out their backoff, ordered by due time.
#[derive(Default)]
pub struct RetrySchedule {
    heap: Mutex<BinaryHeap<Reverse<RetryEntry>>>,
    seq: AtomicU64,
}

impl RetrySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, queue: &str, message: Message, delay: Duration) {
        let entry = RetryEntry {
            due: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            queue: queue.to_string(),
            message,
        };
        self.heap.lock().push(Reverse(entry));
    }

    /// Removes and returns every entry due at `now`, earliest first.
    pub fn take_due(&self, now: Instant) -> Vec<(String, Message)> {
        let mut heap = self.heap.lock();
        let mut due = Vec::new();
        while heap.peek().is_some_and(|Reverse(e)| e.due <= now) {
            if let Some(Reverse(e)) = heap.pop() {
                due.push((e.queue, e.message));
            }
        }
        due
    }

    /// Removes every entry regardless of due time.
    pub fn take_all(&self) -> Vec<(String, Message)> {
        let mut heap = self.heap.lock();
        let mut all: Vec<RetryEntry> = heap.drain().map(|Reverse(e)| e).collect();
        all.sort();
        all.into_iter().map(|e| (e.queue, e.message)).collect()
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ───────────────────────────────────────────────────────────
// Dispatcher
// ───────────────────────────────────────────────────────────

/// Outcome counts of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub delivered: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub dropped: usize,
    pub promoted: usize,
}

/// How a batch of due retries landed back in its queue.
#[derive(Default)]
struct RetryPlacement {
    placed: usize,
    evicted: Vec<Message>,
    overflow: Vec<Message>,
}

enum Outcome {
    Succeeded,
    Retried,
    DeadLettered,
    Dropped,
}

pub struct Dispatcher {
    registry: Arc<QueueRegistry>,
    dead_letters: Arc<DeadLetterSink>,
    telemetry: Arc<Telemetry>,
    retries: RetrySchedule,
    drain_lock: tokio::sync::Mutex<()>,
    retry_delay_ms: u64,
    handler_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<QueueRegistry>,
        dead_letters: Arc<DeadLetterSink>,
        telemetry: Arc<Telemetry>,
        retry_delay_ms: u64,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            dead_letters,
            telemetry,
            retries: RetrySchedule::new(),
            drain_lock: tokio::sync::Mutex::new(()),
            retry_delay_ms,
            handler_timeout,
        }
    }

    pub fn pending_retries(&self) -> usize {
        self.retries.len()
    }

    /// One full pass over every queue that has subscribers.
    ///
    /// Passes never overlap; a caller arriving during a pass waits for it.
    /// Called from inside a handler it returns an empty report instead.
    pub async fn drain_all(&self) -> DrainReport {
        if in_drain_pass() {
            warn!("Drain requested from inside a handler; ignored");
            return DrainReport::default();
        }
        let _guard = self.drain_lock.lock().await;
        IN_DRAIN.scope((), self.drain_pass()).await
    }

    async fn drain_pass(&self) -> DrainReport {
        let mut report = DrainReport {
            promoted: self.promote_due_retries().await,
            ..DrainReport::default()
        };

        for queue in self.registry.all() {
            if !queue.has_subscribers() {
                continue;
            }
            self.drain_queue(&queue, &mut report).await;
        }

        if report.delivered > 0 {
            debug!(
                delivered = report.delivered,
                succeeded = report.succeeded,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                "Drain pass finished"
            );
        }
        report
    }

    async fn drain_queue(&self, queue: &Arc<QueueRecord>, report: &mut DrainReport) {
        let name = queue.name();
        let storage = queue.storage();

        loop {
            let head = match storage.peek(name).await {
                Ok(Some(head)) => head,
                Ok(None) => break,
                Err(e) => {
                    warn!(queue = %name, error = %e, "Failed to peek queue head");
                    break;
                }
            };
            // Delayed head: leave it for a later tick.
            if !head.is_eligible(current_timestamp()) {
                break;
            }

            let message = match storage.extract_highest_priority(name).await {
                Ok(Some(m)) => m,
                Ok(None) => break,
                Err(e) => {
                    warn!(queue = %name, error = %e, "Failed to extract from queue");
                    break;
                }
            };

            report.delivered += 1;
            match self.deliver(queue, message).await {
                Outcome::Succeeded => report.succeeded += 1,
                Outcome::Retried => report.retried += 1,
                Outcome::DeadLettered => report.dead_lettered += 1,
                Outcome::Dropped => report.dropped += 1,
            }
        }
    }

    /// Fans `message` out to every subscription of `queue` and settles it.
    async fn deliver(&self, queue: &QueueRecord, mut message: Message) -> Outcome {
        message.status = MessageStatus::Processing;
        let started = Instant::now();
        let mut failed = false;

        for sub in queue.subscriptions() {
            match sub.deliver(&message, self.handler_timeout).await {
                Ok(processing_time_ms) => {
                    self.telemetry.record(TelemetryEvent::MessageProcessed {
                        queue_name: queue.name().to_string(),
                        message_id: message.id.clone(),
                        subscription_id: sub.id().to_string(),
                        processing_time_ms,
                    });
                }
                Err(e) => {
                    failed = true;
                    warn!(
                        queue = %queue.name(),
                        message_id = %message.id,
                        subscription = %sub.id(),
                        attempt = message.retry_count + 1,
                        error = %e,
                        "Delivery failed"
                    );
                    self.telemetry.record(TelemetryEvent::MessageFailed {
                        queue_name: queue.name().to_string(),
                        message_id: message.id.clone(),
                        subscription_id: sub.id().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if !failed {
            message.status = MessageStatus::Acknowledged;
            queue
                .stats()
                .record_success(started.elapsed().as_millis() as u64);
            return Outcome::Succeeded;
        }

        queue.stats().record_failure();
        message.status = MessageStatus::Failed;

        if message.retry_count < message.max_retries {
            message.retry_count += 1;
            message.status = MessageStatus::Pending;
            let delay = backoff_delay(self.retry_delay_ms, message.retry_count);
            info!(
                queue = %queue.name(),
                message_id = %message.id,
                retry = message.retry_count,
                max_retries = message.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Scheduling redelivery"
            );
            self.telemetry.record(TelemetryEvent::MessageRetryScheduled {
                queue_name: queue.name().to_string(),
                message_id: message.id.clone(),
                retry_count: message.retry_count,
                delay_ms: delay.as_millis() as u64,
            });
            self.retries.schedule(queue.name(), message, delay);
            Outcome::Retried
        } else if queue.options().dead_letter_enabled {
            if self
                .dead_letters
                .dead_letter(queue, message, REASON_MAX_RETRIES)
                .await
            {
                Outcome::DeadLettered
            } else {
                Outcome::Dropped
            }
        } else {
            error!(
                queue = %queue.name(),
                message_id = %message.id,
                attempts = message.retry_count + 1,
                "Retries exhausted and dead-lettering disabled; dropping message"
            );
            Outcome::Dropped
        }
    }

    /// Moves due retries back to the head of their queues.
    async fn promote_due_retries(&self) -> usize {
        let due = self.retries.take_due(Instant::now());
        self.requeue_all(due).await
    }

    /// Returns every scheduled retry to its queue immediately, due or not.
    /// Used on shutdown so durable queues keep them.
    pub async fn flush_retries(&self) -> usize {
        if in_drain_pass() {
            warn!("Retry flush requested from inside a handler; ignored");
            return 0;
        }
        let _guard = self.drain_lock.lock().await;
        let all = self.retries.take_all();
        self.requeue_all(all).await
    }

    /// Requeues `entries` (earliest due first), one batch per queue.
    async fn requeue_all(&self, entries: Vec<(String, Message)>) -> usize {
        let mut batches: Vec<(String, Vec<Message>)> = Vec::new();
        for (queue, message) in entries {
            match batches.iter_mut().find(|(name, _)| *name == queue) {
                Some((_, batch)) => batch.push(message),
                None => batches.push((queue, vec![message])),
            }
        }

        let mut placed = 0;
        for (queue, batch) in batches {
            placed += self.requeue(&queue, batch).await;
        }
        placed
    }

    /// Puts retries back at the head of `queue` under its publish gate,
    /// applying the same capacity policy as a publish.
    async fn requeue(&self, queue: &str, messages: Vec<Message>) -> usize {
        let Some(record) = self.registry.get(queue) else {
            debug!(queue = %queue, dropped = messages.len(), "Queue gone; dropping scheduled retries");
            return 0;
        };

        let count = messages.len();
        let placement = match self.place_retries(&record, messages).await {
            Ok(placement) => placement,
            Err(e) => {
                error!(
                    queue = %queue,
                    retries = count,
                    error = %e,
                    "Failed to requeue messages for redelivery"
                );
                return 0;
            }
        };

        for old in placement.evicted {
            warn!(queue = %queue, evicted = %old.id, "Queue full on requeue; evicted oldest message");
            self.telemetry.record(TelemetryEvent::MessageEvicted {
                queue_name: queue.to_string(),
                message_id: old.id,
            });
        }
        for message in placement.overflow {
            self.dead_letters
                .dead_letter(&record, message, REASON_QUEUE_FULL)
                .await;
        }
        placement.placed
    }

    async fn place_retries(
        &self,
        record: &QueueRecord,
        mut admitted: Vec<Message>,
    ) -> StorageResult<RetryPlacement> {
        let _gate = record.lock_gate().await;
        let storage = record.storage();
        let name = record.name();
        let options = record.options();

        let room = options.max_size.saturating_sub(storage.size(name).await?);
        let mut placement = RetryPlacement::default();

        if admitted.len() > room {
            let excess = admitted.split_off(room);
            if options.dead_letter_enabled {
                placement.overflow = excess;
            } else {
                for message in excess {
                    match storage.evict_oldest(name).await? {
                        Some(old) => {
                            placement.evicted.push(old);
                            admitted.push(message);
                        }
                        // Nothing older pending: the retry itself is the oldest.
                        None => placement.evicted.push(message),
                    }
                }
            }
        }

        // Reverse so the earliest-due retry ends up at the head.
        for message in admitted.into_iter().rev() {
            let score = record.score(&message);
            storage.push_front(name, message, score).await?;
            placement.placed += 1;
        }
        Ok(placement)
    }
}
