mod common;

use relaymq::{PublishOptions, SubscriptionOptions};

#[tokio::test]
async fn equal_priorities_keep_arrival_order() {
    let broker = common::test_broker().await;
    broker.create_queue("jobs", broker.default_queue_options());

    for (priority, body) in [(5, "5a"), (1, "1"), (5, "5b"), (3, "3")] {
        broker
            .publish("jobs", body, PublishOptions::default().with_priority(priority))
            .await
            .unwrap();
    }

    let (handler, seen) = common::recorder();
    broker
        .subscribe("jobs", handler, SubscriptionOptions::default())
        .unwrap();
    broker.drain_now().await;

    assert_eq!(*seen.lock(), vec!["5a", "5b", "3", "1"]);
    broker.shutdown().await;
}

#[tokio::test]
async fn fifo_queue_ignores_priority() {
    let broker = common::test_broker().await;
    broker.create_queue(
        "log",
        broker.default_queue_options().with_priority_ordering(false),
    );

    for (priority, body) in [(1, "first"), (9, "second"), (5, "third")] {
        broker
            .publish("log", body, PublishOptions::default().with_priority(priority))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let (handler, seen) = common::recorder();
    broker.subscribe("log", handler, SubscriptionOptions::default()).unwrap();
    broker.drain_now().await;

    assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    broker.shutdown().await;
}

#[tokio::test]
async fn delayed_message_waits() {
    let broker = common::test_broker().await;
    broker.create_queue("later", broker.default_queue_options());
    let (handler, seen) = common::recorder();
    broker.subscribe("later", handler, SubscriptionOptions::default()).unwrap();

    broker
        .publish("later", "soon", PublishOptions::default().with_delay_ms(150))
        .await
        .unwrap();
    broker.drain_now().await;
    assert!(seen.lock().is_empty());

    let delivered = common::drain_until(&broker, std::time::Duration::from_secs(2), || {
        let n = seen.lock().len();
        async move { n == 1 }
    })
    .await;
    assert!(delivered);
    broker.shutdown().await;
}
