mod common;

use std::time::Duration;

use relaymq::core::telemetry::TelemetryEvent;
use relaymq::{BrokerError, Config, PublishOptions, SubscriptionOptions};

#[tokio::test]
async fn observers_see_events_and_detach_on_shutdown() {
    let broker = common::test_broker().await;
    let mut events = broker.telemetry().subscribe();

    broker.create_queue("audit", broker.default_queue_options());
    let id = broker
        .publish("audit", "entry", PublishOptions::default())
        .await
        .unwrap();

    let created = events.recv().await.unwrap();
    assert_eq!(created.event.kind(), "queue_created");
    let published = events.recv().await.unwrap();
    assert_eq!(
        published.event,
        TelemetryEvent::MessagePublished {
            queue_name: "audit".into(),
            message_id: id,
        }
    );

    broker.shutdown().await;
    assert!(events.recv().await.is_err());
}

#[tokio::test]
async fn clear_queue_drops_pending_messages() {
    let broker = common::test_broker().await;
    broker.create_queue("scratch", broker.default_queue_options());
    for i in 0..3 {
        broker
            .publish("scratch", format!("m{i}"), PublishOptions::default())
            .await
            .unwrap();
    }

    assert!(broker.clear_queue("scratch").await);
    assert!(!broker.clear_queue("scratch").await);
    assert!(broker.get_queue_stats("scratch").await.is_none());

    let err = broker
        .publish("scratch", "again", PublishOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::QueueNotFound(_)));

    let fresh = broker.create_queue("scratch", broker.default_queue_options());
    assert_eq!(fresh.depth().await, 0);
    assert_eq!(
        broker.telemetry().tail(1)[0].event.kind(),
        "queue_created"
    );
    broker.shutdown().await;
}

#[tokio::test]
async fn background_loop_delivers_without_explicit_drain() {
    common::init_logging();
    let mut config = Config::default();
    config.dispatch.tick_interval_ms = 10;
    let broker = relaymq::Broker::init(config).await.unwrap();
    broker.create_queue("auto", broker.default_queue_options());

    let (handler, seen) = common::recorder();
    broker
        .subscribe("auto", handler, SubscriptionOptions::default())
        .unwrap();
    broker
        .publish("auto", "tick", PublishOptions::default())
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while seen.lock().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(*seen.lock(), vec!["tick"]);
    broker.shutdown().await;
}

#[tokio::test]
async fn stats_cover_every_queue() {
    let broker = common::test_broker().await;
    broker.create_queue("b", broker.default_queue_options());
    broker.create_queue("a", broker.default_queue_options());
    broker.publish("a", "x", PublishOptions::default()).await.unwrap();

    let stats = broker.get_all_stats().await;
    let names: Vec<&str> = stats.per_queue.iter().map(|q| q.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(stats.per_queue[0].depth, 1);
    assert_eq!(stats.global.total_published, 1);
    assert_eq!(stats.event_log_size, broker.telemetry().len());

    let text = relaymq::metrics::render(&stats);
    assert!(text.contains("relaymq_queue_depth{queue=\"a\"} 1"));
    broker.shutdown().await;
}

#[tokio::test]
async fn handler_calling_back_into_broker_does_not_stall_dispatch() {
    let broker = std::sync::Arc::new(common::test_broker().await);
    broker.create_queue("reentrant", broker.default_queue_options());

    let weak = std::sync::Arc::downgrade(&broker);
    let handler = relaymq::handler_fn(move |_, _| {
        let weak = weak.clone();
        async move {
            if let Some(broker) = weak.upgrade() {
                let nested = broker.drain_now().await;
                anyhow::ensure!(nested.delivered == 0, "nested drain delivered");
                broker.shutdown().await;
            }
            Ok(())
        }
    });
    broker
        .subscribe("reentrant", handler, SubscriptionOptions::default())
        .unwrap();
    broker
        .publish("reentrant", "ping", PublishOptions::default())
        .await
        .unwrap();

    // Handler deadline is 30 s; a stalled pass would blow through this.
    let b = &broker;
    let delivered = tokio::time::timeout(
        Duration::from_secs(5),
        common::drain_until(b, Duration::from_secs(5), move || async move {
            b.get_queue_stats("reentrant")
                .await
                .is_some_and(|s| s.stats.processed_messages == 1)
        }),
    )
    .await
    .expect("drain stalled on a re-entrant handler");
    assert!(delivered);

    let stats = broker.get_queue_stats("reentrant").await.unwrap();
    assert_eq!(stats.stats.failed_messages, 0);
    assert!(!broker.is_shut_down());

    broker.shutdown().await;
    assert!(broker.is_shut_down());
}
