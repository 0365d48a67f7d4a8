//! Subscriptions: handlers attached to a queue.
//!
//! Every subscription of a queue receives every message (broadcast fan-out),
//! in registration order, with its own options and statistics.

pub mod handler;
#[allow(clippy::module_inception)]
pub mod subscriber;

pub use handler::{handler_fn, DeliveryContext, FnHandler, MessageHandler};
pub use subscriber::{Subscription, SubscriptionId, SubscriptionOptions, SubscriptionSnapshot};
