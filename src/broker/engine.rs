//! Background dispatch task.
//!
//! Drains the broker on a fixed tick and whenever a publish wakes it. The
//! task stops when the shutdown signal fires; a drain already in progress is
//! allowed to finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::dispatch::Dispatcher;

pub struct DispatchEngine {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl DispatchEngine {
    pub fn spawn(dispatcher: Arc<Dispatcher>, wake: Arc<Notify>, tick: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = broadcast::channel(1);
        let tick = tick.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(tick_ms = tick.as_millis() as u64, "Dispatch loop started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {}
                    _ = wake.notified() => {}
                }
                dispatcher.drain_all().await;
            }

            debug!("Dispatch loop stopped");
        });

        Self { shutdown, task }
    }

    /// Signals the loop to stop and waits for it.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Dispatch loop ended abnormally");
        }
    }

    /// Stops the loop without waiting.
    pub fn abort(&self) {
        self.task.abort();
    }
}
