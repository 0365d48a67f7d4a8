//! Prometheus text rendering of broker stats.
//!
//! Plain `name value` lines without HELP/TYPE headers; per-queue series carry
//! a `queue` label.

use std::fmt::Write as _;

use crate::broker::BrokerStats;

pub fn render(stats: &BrokerStats) -> String {
    let g = &stats.global;
    let mut out = String::with_capacity(256 + stats.per_queue.len() * 256);

    let _ = writeln!(out, "relaymq_published_total {}", g.total_published);
    let _ = writeln!(out, "relaymq_processed_total {}", g.total_processed);
    let _ = writeln!(out, "relaymq_failed_total {}", g.total_failed);
    let _ = writeln!(out, "relaymq_dead_lettered_total {}", g.total_dead_lettered);
    let _ = writeln!(out, "relaymq_evicted_total {}", g.total_evicted);
    let _ = writeln!(
        out,
        "relaymq_processing_time_ms_avg {:.3}",
        g.average_processing_time_ms
    );
    let _ = writeln!(out, "relaymq_event_log_size {}", stats.event_log_size);
    let _ = writeln!(out, "relaymq_pending_retries {}", stats.pending_retries);
    let _ = writeln!(out, "relaymq_uptime_ms {}", stats.uptime_ms);

    for q in &stats.per_queue {
        let label = escape_label(&q.name);
        let _ = writeln!(out, "relaymq_queue_depth{{queue=\"{label}\"}} {}", q.depth);
        let _ = writeln!(
            out,
            "relaymq_queue_subscribers{{queue=\"{label}\"}} {}",
            q.subscriber_count
        );
        let _ = writeln!(
            out,
            "relaymq_queue_messages_total{{queue=\"{label}\"}} {}",
            q.stats.total_messages
        );
        let _ = writeln!(
            out,
            "relaymq_queue_processed_total{{queue=\"{label}\"}} {}",
            q.stats.processed_messages
        );
        let _ = writeln!(
            out,
            "relaymq_queue_failed_total{{queue=\"{label}\"}} {}",
            q.stats.failed_messages
        );
    }
    out
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::QueueStatsSnapshot;
    use crate::core::queue::QueueOptions;
    use crate::core::stats::ProcessingStatsSnapshot;
    use crate::core::telemetry::TelemetrySnapshot;

    #[test]
    fn renders_global_and_labelled_queue_series() {
        let stats = BrokerStats {
            global: TelemetrySnapshot {
                total_published: 4,
                total_processed: 3,
                ..TelemetrySnapshot::default()
            },
            per_queue: vec![QueueStatsSnapshot {
                name: "alerts".into(),
                depth: 2,
                subscriber_count: 1,
                stats: ProcessingStatsSnapshot::default(),
                options: QueueOptions::default(),
                storage: "memory",
                subscriptions: Vec::new(),
            }],
            event_log_size: 7,
            uptime_ms: 10,
            pending_retries: 0,
        };

        let text = render(&stats);
        assert!(text.contains("relaymq_published_total 4\n"));
        assert!(text.contains("relaymq_processed_total 3\n"));
        assert!(text.contains("relaymq_queue_depth{queue=\"alerts\"} 2\n"));
        assert!(text.contains("relaymq_event_log_size 7\n"));
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape_label("a\"b"), "a\\\"b");
    }
}
