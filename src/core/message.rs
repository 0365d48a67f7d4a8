use std::collections::HashMap;

use bytes::Bytes;
use prost::Message as _;
use serde::Serialize;
use uuid::Uuid;

use crate::core::error::StorageError;

/// Unique, time-ordered message identifier.
pub type MessageId = String;

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Acknowledged,
    Failed,
    DeadLettered,
}

impl MessageStatus {
    fn as_wire(self) -> i32 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::Processing => 1,
            MessageStatus::Acknowledged => 2,
            MessageStatus::Failed => 3,
            MessageStatus::DeadLettered => 4,
        }
    }

    fn from_wire(v: i32) -> Self {
        match v {
            1 => MessageStatus::Processing,
            2 => MessageStatus::Acknowledged,
            3 => MessageStatus::Failed,
            4 => MessageStatus::DeadLettered,
            _ => MessageStatus::Pending,
        }
    }
}

/// Identity of whoever published the message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Producer {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

/// Provenance attached to a message when it lands in a dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetterInfo {
    pub original_queue: String,
    pub failed_at: u64,
    pub reason: String,
}

/// Per-publish delivery options. `None` fields take broker defaults.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub priority: Option<i32>,
    pub max_retries: Option<u32>,
    pub delay_ms: Option<u64>,
    pub metadata: HashMap<String, String>,
    pub producer: Producer,
}

impl PublishOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_producer(mut self, user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        self.producer = Producer {
            user_id: Some(user_id.into()),
            session_id: Some(session_id.into()),
        };
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub queue: String,
    pub payload: Bytes,
    pub timestamp: u64,
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub delay_ms: u64,
    pub metadata: HashMap<String, String>,
    pub producer: Producer,
    pub status: MessageStatus,
    pub dead_letter: Option<DeadLetterInfo>,
}

impl Message {
    /// Builds a pending message, filling unset options from the broker defaults.
    pub fn new(
        queue: impl Into<String>,
        payload: impl Into<Bytes>,
        options: PublishOptions,
        default_max_retries: u32,
    ) -> Self {
        Self {
            id: generate_id(),
            queue: queue.into(),
            payload: payload.into(),
            timestamp: current_timestamp(),
            priority: options.priority.unwrap_or(0),
            retry_count: 0,
            max_retries: options.max_retries.unwrap_or(default_max_retries),
            delay_ms: options.delay_ms.unwrap_or(0),
            metadata: options.metadata,
            producer: options.producer,
            status: MessageStatus::Pending,
            dead_letter: None,
        }
    }

    /// Epoch millis at which the message becomes eligible for dispatch.
    #[inline]
    pub fn eligible_at(&self) -> u64 {
        self.timestamp.saturating_add(self.delay_ms)
    }

    #[inline]
    pub fn is_eligible(&self, now_ms: u64) -> bool {
        now_ms >= self.eligible_at()
    }

    pub fn encode(&self) -> Vec<u8> {
        StoredMessage::from(self).encode_to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        let stored = StoredMessage::decode(bytes)?;
        Ok(stored.into())
    }
}

pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// UUIDv7: millisecond timestamp prefix followed by random bits.
fn generate_id() -> MessageId {
    Uuid::now_v7().to_string()
}

// ───────────────────────────────────────────────────────────
// Wire representation used by durable backends
// ───────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, prost::Message)]
struct StoredMessage {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(string, tag = "2")]
    queue: String,
    #[prost(bytes = "bytes", tag = "3")]
    payload: Bytes,
    #[prost(uint64, tag = "4")]
    timestamp: u64,
    #[prost(int32, tag = "5")]
    priority: i32,
    #[prost(uint32, tag = "6")]
    retry_count: u32,
    #[prost(uint32, tag = "7")]
    max_retries: u32,
    #[prost(uint64, tag = "8")]
    delay_ms: u64,
    #[prost(map = "string, string", tag = "9")]
    metadata: HashMap<String, String>,
    #[prost(string, optional, tag = "10")]
    user_id: Option<String>,
    #[prost(string, optional, tag = "11")]
    session_id: Option<String>,
    #[prost(int32, tag = "12")]
    status: i32,
    #[prost(message, optional, tag = "13")]
    dead_letter: Option<StoredDeadLetter>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct StoredDeadLetter {
    #[prost(string, tag = "1")]
    original_queue: String,
    #[prost(uint64, tag = "2")]
    failed_at: u64,
    #[prost(string, tag = "3")]
    reason: String,
}

impl From<&Message> for StoredMessage {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.clone(),
            queue: m.queue.clone(),
            payload: m.payload.clone(),
            timestamp: m.timestamp,
            priority: m.priority,
            retry_count: m.retry_count,
            max_retries: m.max_retries,
            delay_ms: m.delay_ms,
            metadata: m.metadata.clone(),
            user_id: m.producer.user_id.clone(),
            session_id: m.producer.session_id.clone(),
            status: m.status.as_wire(),
            dead_letter: m.dead_letter.as_ref().map(|d| StoredDeadLetter {
                original_queue: d.original_queue.clone(),
                failed_at: d.failed_at,
                reason: d.reason.clone(),
            }),
        }
    }
}

impl From<StoredMessage> for Message {
    fn from(s: StoredMessage) -> Self {
        Self {
            id: s.id,
            queue: s.queue,
            payload: s.payload,
            timestamp: s.timestamp,
            priority: s.priority,
            retry_count: s.retry_count,
            max_retries: s.max_retries,
            delay_ms: s.delay_ms,
            metadata: s.metadata,
            producer: Producer {
                user_id: s.user_id,
                session_id: s.session_id,
            },
            status: MessageStatus::from_wire(s.status),
            dead_letter: s.dead_letter.map(|d| DeadLetterInfo {
                original_queue: d.original_queue,
                failed_at: d.failed_at,
                reason: d.reason,
            }),
        }
    }
}
