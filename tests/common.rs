#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use relaymq::{handler_fn, Broker, Config, MessageHandler};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        relaymq::logging::init_logging();
    });
}

/// In-process broker with fast retries. The tick is long so tests decide
/// when to drain.
pub async fn test_broker() -> Broker {
    broker_with(|_| {}).await
}

/// Like [`test_broker`], with `edit` applied to the config before init.
pub async fn broker_with(edit: impl FnOnce(&mut Config)) -> Broker {
    init_logging();
    let mut config = Config::default();
    config.broker.retry_delay_ms = 1;
    config.dispatch.tick_interval_ms = 60_000;
    edit(&mut config);
    Broker::init(config).await.expect("broker init")
}

/// Drains repeatedly until `done` holds or `timeout` passes.
pub async fn drain_until<F, Fut>(broker: &Broker, timeout: Duration, mut done: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        broker.drain_now().await;
        if done().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Handler that records every payload it sees, as UTF-8.
pub fn recorder() -> (Arc<dyn MessageHandler>, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = handler_fn(move |payload, _ctx| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().push(String::from_utf8_lossy(&payload).into_owned());
            Ok(())
        }
    });
    (handler, seen)
}
