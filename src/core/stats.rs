use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by queues and subscriptions.
///
/// The running average is derived from the accumulated processing time, so it
/// equals the mean over every recorded success.
#[derive(Debug, Default)]
pub struct ProcessingStats {
    total: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    processing_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessingStatsSnapshot {
    pub total_messages: u64,
    pub processed_messages: u64,
    pub failed_messages: u64,
    pub average_processing_time_ms: f64,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_received(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_success(&self, elapsed_ms: u64) {
        self.processing_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ProcessingStatsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let processing_ms = self.processing_ms.load(Ordering::Relaxed);
        ProcessingStatsSnapshot {
            total_messages: self.total.load(Ordering::Relaxed),
            processed_messages: processed,
            failed_messages: self.failed.load(Ordering::Relaxed),
            average_processing_time_ms: if processed == 0 {
                0.0
            } else {
                processing_ms as f64 / processed as f64
            },
        }
    }
}
