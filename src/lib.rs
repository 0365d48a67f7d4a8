//! relaymq – an in-process, priority-aware message broker with retries,
//! dead-lettering and broadcast fan-out.
//!
//! This crate exports
//!  * `core`    – messages, storage backends, queues, dispatch, telemetry
//!  * `broker`  – the [`Broker`] facade and its dispatch loop
//!  * `config`  – TOML-driven runtime configuration
//!  * `metrics` – Prometheus-style text rendering of broker stats
//!
//! ```ignore
//! let broker = Broker::init(Config::default()).await?;
//! broker.create_queue("alerts", broker.default_queue_options());
//! broker.subscribe("alerts", handler_fn(|payload, _ctx| async move { Ok(()) }), Default::default())?;
//! broker.publish("alerts", "disk full", PublishOptions::default().with_priority(5)).await?;
//! ```

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod broker;
pub mod config;
pub mod core;
pub mod logging;
pub mod metrics;
pub mod util;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use broker::{Broker, BrokerStats, QueueStatsSnapshot};
pub use config::{load_config, Config};
pub use crate::core::error::{BrokerError, DeliveryError, StorageError};
pub use crate::core::message::{Message, MessageId, MessageStatus, PublishOptions};
pub use crate::core::queue::QueueOptions;
pub use crate::core::subscriber::{handler_fn, DeliveryContext, MessageHandler, SubscriptionOptions};
