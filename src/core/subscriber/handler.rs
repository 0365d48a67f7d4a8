use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::message::{Message, MessageId, Producer};

/// Delivery details handed to a handler alongside the payload.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    pub message_id: MessageId,
    pub queue_name: String,
    pub timestamp: u64,
    pub priority: i32,
    pub retry_count: u32,
    pub metadata: HashMap<String, String>,
    pub producer: Producer,
    pub subscription_id: String,
    acked: Arc<AtomicBool>,
}

impl DeliveryContext {
    pub(crate) fn for_message(message: &Message, subscription_id: &str) -> Self {
        Self {
            message_id: message.id.clone(),
            queue_name: message.queue.clone(),
            timestamp: message.timestamp,
            priority: message.priority,
            retry_count: message.retry_count,
            metadata: message.metadata.clone(),
            producer: message.producer.clone(),
            subscription_id: subscription_id.to_string(),
            acked: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acknowledges the delivery. Required for subscriptions created with
    /// `auto_acknowledge = false`; harmless otherwise.
    pub fn ack(&self) {
        self.acked.store(true, Ordering::Release);
    }

    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }
}

/// Consumer callback invoked once per delivery.
///
/// Returning an error (or panicking, or exceeding the broker's handler
/// deadline) fails the delivery and makes the message eligible for retry.
///
/// Handlers run inside the dispatch pass. `Broker::drain_now` and
/// `Broker::shutdown` called from a handler are ignored; publishing is fine.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: Bytes, ctx: DeliveryContext) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHandler")
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Bytes, DeliveryContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, payload: Bytes, ctx: DeliveryContext) -> anyhow::Result<()> {
        (self.f)(payload, ctx).await
    }
}

/// Wraps `f` as a shareable handler.
///
/// ```ignore
/// let h = handler_fn(|payload, _ctx| async move {
///     println!("{} bytes", payload.len());
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Bytes, DeliveryContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}
