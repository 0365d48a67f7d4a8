mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relaymq::{handler_fn, Broker, Config, PublishOptions, SubscriptionOptions};

async fn broker_with_timeout(ms: u64) -> Broker {
    common::init_logging();
    let mut config = Config::default();
    config.broker.retry_delay_ms = 1;
    config.broker.handler_timeout_ms = ms;
    config.dispatch.tick_interval_ms = 60_000;
    Broker::init(config).await.unwrap()
}

#[tokio::test]
async fn slow_handler_counts_as_failure() {
    let broker = broker_with_timeout(30).await;
    broker.create_queue("slow", broker.default_queue_options());

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    broker
        .subscribe(
            "slow",
            handler_fn(move |_, ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if ctx.retry_count == 0 {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                    Ok(())
                }
            }),
            SubscriptionOptions::default(),
        )
        .unwrap();

    broker
        .publish("slow", "x", PublishOptions::default())
        .await
        .unwrap();

    let done = common::drain_until(&broker, Duration::from_secs(5), || {
        let b = &broker;
        async move {
            b.get_queue_stats("slow")
                .await
                .is_some_and(|s| s.stats.processed_messages == 1)
        }
    })
    .await;
    assert!(done);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        broker.get_queue_stats("slow").await.unwrap().stats.failed_messages,
        1
    );
    broker.shutdown().await;
}

#[tokio::test]
async fn manual_ack_subscription_must_ack() {
    let broker = broker_with_timeout(1_000).await;
    broker.create_queue("manual", broker.default_queue_options());

    broker
        .subscribe(
            "manual",
            handler_fn(|_, ctx| async move {
                // Only acknowledge redeliveries.
                if ctx.retry_count > 0 {
                    ctx.ack();
                }
                Ok(())
            }),
            SubscriptionOptions::manual_ack(),
        )
        .unwrap();

    broker
        .publish("manual", "x", PublishOptions::default())
        .await
        .unwrap();

    let done = common::drain_until(&broker, Duration::from_secs(5), || {
        let b = &broker;
        async move {
            b.get_queue_stats("manual")
                .await
                .is_some_and(|s| s.stats.processed_messages == 1)
        }
    })
    .await;
    assert!(done);

    let failures: Vec<String> = broker
        .telemetry()
        .tail(100)
        .into_iter()
        .filter_map(|r| match r.event {
            relaymq::core::telemetry::TelemetryEvent::MessageFailed { error, .. } => Some(error),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("without acknowledging"));
    broker.shutdown().await;
}

#[tokio::test]
async fn panicking_handler_does_not_stop_dispatch() {
    let broker = broker_with_timeout(1_000).await;
    broker.create_queue("fragile", broker.default_queue_options());
    broker
        .subscribe(
            "fragile",
            handler_fn(|payload, _| async move {
                if payload == "bad" {
                    panic!("malformed alert");
                }
                Ok(())
            }),
            SubscriptionOptions::default(),
        )
        .unwrap();

    broker
        .publish("fragile", "bad", PublishOptions::default().with_max_retries(0))
        .await
        .unwrap();
    broker
        .publish("fragile", "good", PublishOptions::default())
        .await
        .unwrap();

    let done = common::drain_until(&broker, Duration::from_secs(5), || {
        let b = &broker;
        async move {
            b.get_queue_stats("fragile")
                .await
                .is_some_and(|s| s.stats.processed_messages == 1)
        }
    })
    .await;
    assert!(done);
    assert_eq!(broker.dead_letters("fragile", 10).await.unwrap().len(), 1);
    broker.shutdown().await;
}
