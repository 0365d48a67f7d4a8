pub mod dispatch;
pub mod dlq;
pub mod error;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod stats;
pub mod storage;
pub mod subscriber;
pub mod telemetry;
