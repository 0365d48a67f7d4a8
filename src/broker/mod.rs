//! # Broker
//!
//! [`Broker`] ties the pieces together: storage, queue registry, publisher,
//! dispatcher and telemetry. Producers and consumers hold a reference to one
//! broker instance; there is no process-wide state.
//!
//! Lifecycle: [`Broker::init`] connects storage, declares configured queues
//! and starts the dispatch loop; [`Broker::shutdown`] stops it, returns
//! scheduled retries to their queues, closes storage and detaches telemetry
//! observers.

pub mod engine;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::dispatch::{in_drain_pass, Dispatcher, DrainReport};
use crate::core::dlq::DeadLetterSink;
use crate::core::error::{BrokerError, Result};
use crate::core::message::{Message, MessageId, PublishOptions};
use crate::core::publisher::Publisher;
use crate::core::queue::{QueueOptions, QueueRecord, QueueRegistry};
use crate::core::stats::ProcessingStatsSnapshot;
use crate::core::storage::StorageSet;
use crate::core::subscriber::{
    MessageHandler, Subscription, SubscriptionId, SubscriptionOptions, SubscriptionSnapshot,
};
use crate::core::telemetry::{Telemetry, TelemetrySnapshot};

use self::engine::DispatchEngine;

/// Point-in-time view of one queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatsSnapshot {
    pub name: String,
    pub depth: usize,
    pub subscriber_count: usize,
    pub stats: ProcessingStatsSnapshot,
    pub options: QueueOptions,
    pub storage: &'static str,
    pub subscriptions: Vec<SubscriptionSnapshot>,
}

/// Point-in-time view of the whole broker.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerStats {
    pub global: TelemetrySnapshot,
    pub per_queue: Vec<QueueStatsSnapshot>,
    pub event_log_size: usize,
    pub uptime_ms: u64,
    pub pending_retries: usize,
}

pub struct Broker {
    config: Config,
    storage: StorageSet,
    registry: Arc<QueueRegistry>,
    telemetry: Arc<Telemetry>,
    dead_letters: Arc<DeadLetterSink>,
    publisher: Publisher,
    dispatcher: Arc<Dispatcher>,
    wake: Arc<Notify>,
    engine: Mutex<Option<DispatchEngine>>,
    shut_down: AtomicBool,
}

impl Broker {
    /// Connects storage, declares the configured queues and starts dispatching.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn init(config: Config) -> anyhow::Result<Self> {
        let storage = StorageSet::connect(&config.storage).await;
        let telemetry = Arc::new(Telemetry::new(config.broker.max_event_log_size));
        let registry = Arc::new(QueueRegistry::new(storage.clone(), Arc::clone(&telemetry)));
        let dead_letters = Arc::new(DeadLetterSink::new(
            Arc::clone(&registry),
            Arc::clone(&telemetry),
        ));
        let wake = Arc::new(Notify::new());

        let publisher = Publisher::new(
            Arc::clone(&registry),
            Arc::clone(&dead_letters),
            Arc::clone(&telemetry),
            Arc::clone(&wake),
            config.broker.retry_attempts,
        );
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&dead_letters),
            Arc::clone(&telemetry),
            config.broker.retry_delay_ms,
            Duration::from_millis(config.broker.handler_timeout_ms),
        ));

        for decl in &config.queues {
            registry.create_queue(&decl.name, decl.options(config.broker.default_max_queue_size));
        }

        let engine = DispatchEngine::spawn(
            Arc::clone(&dispatcher),
            Arc::clone(&wake),
            Duration::from_millis(config.dispatch.tick_interval_ms),
        );

        info!(
            storage = if storage.is_durable() { "durable" } else { "memory" },
            queues = registry.len(),
            retry_attempts = config.broker.retry_attempts,
            retry_delay_ms = config.broker.retry_delay_ms,
            "Broker initialised"
        );

        Ok(Self {
            config,
            storage,
            registry,
            telemetry,
            dead_letters,
            publisher,
            dispatcher,
            wake,
            engine: Mutex::new(Some(engine)),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Default options for new queues, with the configured capacity.
    pub fn default_queue_options(&self) -> QueueOptions {
        QueueOptions::default().with_max_size(self.config.broker.default_max_queue_size)
    }

    /// Registers a queue. Idempotent: an existing queue is returned unchanged.
    pub fn create_queue(&self, name: &str, options: QueueOptions) -> Arc<QueueRecord> {
        self.registry.create_queue(name, options)
    }

    pub async fn publish(
        &self,
        queue: &str,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<MessageId> {
        self.ensure_running()?;
        self.publisher.publish(queue, payload, options).await
    }

    /// Attaches `handler` to `queue`. Every subscription receives every message.
    pub fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionId> {
        self.ensure_running()?;
        let record = self
            .registry
            .get(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;

        let subscription = Arc::new(Subscription::new(queue, handler, options));
        let id = subscription.id().to_string();
        record.add_subscription(subscription);
        info!(
            queue = %queue,
            subscription = %id,
            auto_ack = options.auto_acknowledge,
            subscribers = record.subscriber_count(),
            "Subscription added"
        );

        // Messages may already be waiting for a first subscriber.
        self.wake.notify_one();
        Ok(id)
    }

    pub async fn get_queue_stats(&self, name: &str) -> Option<QueueStatsSnapshot> {
        let record = self.registry.get(name)?;
        Some(queue_snapshot(&record).await)
    }

    pub async fn get_all_stats(&self) -> BrokerStats {
        let mut per_queue = Vec::with_capacity(self.registry.len());
        for record in self.registry.all() {
            per_queue.push(queue_snapshot(&record).await);
        }
        let global = self.telemetry.snapshot();
        BrokerStats {
            event_log_size: global.event_log_size,
            uptime_ms: global.uptime_ms,
            global,
            per_queue,
            pending_retries: self.dispatcher.pending_retries(),
        }
    }

    /// Removes a queue and its pending messages. Returns whether it existed.
    pub async fn clear_queue(&self, name: &str) -> bool {
        self.registry.clear(name).await
    }

    /// Runs one drain pass right away instead of waiting for the next tick.
    /// From inside a handler this is a no-op returning an empty report.
    pub async fn drain_now(&self) -> DrainReport {
        self.dispatcher.drain_all().await
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Dead-lettered messages of `queue`, oldest first.
    pub async fn dead_letters(&self, queue: &str, limit: usize) -> Result<Vec<Message>> {
        Ok(self.dead_letters.list(queue, limit).await?)
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stops dispatching and releases resources. Safe to call more than once.
    ///
    /// Ignored when called from inside a handler: the dispatch task would
    /// wait on itself.
    pub async fn shutdown(&self) {
        if in_drain_pass() {
            warn!("Shutdown requested from inside a handler; ignored");
            return;
        }
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let engine = self.engine.lock().take();
        if let Some(engine) = engine {
            engine.stop().await;
        }

        let requeued = self.dispatcher.flush_retries().await;
        self.storage.close().await;
        self.telemetry.detach_observers();

        info!(requeued_retries = requeued, "Broker shut down");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(BrokerError::ShutDown)
        } else {
            Ok(())
        }
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.get_mut().take() {
            engine.abort();
        }
    }
}

async fn queue_snapshot(record: &QueueRecord) -> QueueStatsSnapshot {
    QueueStatsSnapshot {
        name: record.name().to_string(),
        depth: record.depth().await,
        subscriber_count: record.subscriber_count(),
        stats: record.stats().snapshot(),
        options: record.options(),
        storage: record.storage().kind(),
        subscriptions: record.subscriptions().iter().map(|s| s.snapshot()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::subscriber::handler_fn;

    fn quiet_config() -> Config {
        let mut config = Config::default();
        // Tests drive dispatch through drain_now.
        config.dispatch.tick_interval_ms = 60_000;
        config
    }

    #[tokio::test]
    async fn configured_queues_exist_after_init() {
        let mut config = quiet_config();
        config.queues = toml::from_str::<Config>(
            r#"
            [[queues]]
            name = "alerts"
            max_size = 50
            "#,
        )
        .unwrap()
        .queues;

        let broker = Broker::init(config).await.unwrap();
        let stats = broker.get_queue_stats("alerts").await.unwrap();
        assert_eq!(stats.options.max_size, 50);
        assert_eq!(stats.depth, 0);
        broker.shutdown().await;
    }

    #[tokio::test]
    async fn subscribe_to_unknown_queue_fails() {
        let broker = Broker::init(quiet_config()).await.unwrap();
        let err = broker
            .subscribe("nope", handler_fn(|_, _| async { Ok(()) }), SubscriptionOptions::default())
            .unwrap_err();
        assert!(matches!(err, BrokerError::QueueNotFound(_)));
        broker.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work_and_is_idempotent() {
        let broker = Broker::init(quiet_config()).await.unwrap();
        broker.create_queue("q", broker.default_queue_options());
        broker.shutdown().await;
        broker.shutdown().await;

        assert!(broker.is_shut_down());
        let err = broker
            .publish("q", "late", PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ShutDown));
    }
}
