//! Publishing: turn a payload into a pending message under the queue's
//! capacity policy, then wake the dispatcher.
#[allow(clippy::module_inception)]
pub mod publisher;

pub use publisher::Publisher;
