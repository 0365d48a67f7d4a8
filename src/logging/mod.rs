use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::LoggingConfig;

const FALLBACK_DIRECTIVE: &str = "info";

/// Installs the process-wide subscriber with default settings.
pub fn init_logging() {
    init_logging_with(&LoggingConfig::default());
}

/// Installs the process-wide subscriber: `RUST_LOG` when set, else
/// `config.level`, with a compact formatter and RFC 3339 UTC timestamps.
///
/// Calling it again is a no-op; the first subscriber stays installed.
pub fn init_logging_with(config: &LoggingConfig) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let (filter, rejected) = build_filter(rust_log.as_deref(), &config.level);

    let formatting_layer = fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_thread_ids(config.thread_ids)
        .with_thread_names(config.thread_ids)
        .with_target(config.targets)
        .compact();

    let subscriber = Registry::default().with(filter).with(formatting_layer);

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("Global subscriber already installed");
        return;
    }
    if let Some(directive) = rejected {
        tracing::warn!(directive = %directive, fallback = FALLBACK_DIRECTIVE, "Invalid log filter");
    }
}

/// Picks the filter directive and parses it. An unparsable directive falls
/// back to `info` and is returned so the caller can report it once logging
/// is up.
fn build_filter(rust_log: Option<&str>, level: &str) -> (EnvFilter, Option<String>) {
    let directive = rust_log
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(level);
    match EnvFilter::try_new(directive) {
        Ok(filter) => (filter, None),
        Err(_) => (EnvFilter::new(FALLBACK_DIRECTIVE), Some(directive.to_string())),
    }
}
