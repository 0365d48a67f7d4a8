use std::time::Duration;

use thiserror::Error;

/// Failures of a storage backend. These are infrastructure errors only; the
/// broker recovers from them by falling back to in-process storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to decode stored message: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Errors surfaced to producers and subscribers of the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("broker is shut down")]
    ShutDown,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Why a single handler invocation did not succeed.
///
/// Never propagated past the dispatch loop: it is turned into retry state or
/// a dead-letter placement and reported through telemetry.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("handler failed: {0:#}")]
    Handler(anyhow::Error),

    #[error("handler timed out after {0:?}")]
    Timeout(Duration),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("handler returned without acknowledging the message")]
    NotAcknowledged,
}

pub type Result<T> = std::result::Result<T, BrokerError>;
pub type StorageResult<T> = std::result::Result<T, StorageError>;
