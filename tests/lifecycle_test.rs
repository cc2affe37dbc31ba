mod common;

use common::{string_consumer, MockBroker};
use futures::{pin_mut, Stream, StreamExt};
use rillstream::ConsumerError;
use std::time::Duration;
use tokio::time::timeout;

async fn next_within<S: Stream + Unpin>(stream: &mut S, secs: u64) -> Option<S::Item> {
    timeout(Duration::from_secs(secs), stream.next())
        .await
        .expect("timed out waiting for the next stream element")
}

#[tokio::test]
async fn test_cancel_mid_stream() {
    let broker = MockBroker::new();
    for i in 0..5 {
        broker.produce("t", 0, None, &format!("m{}", i));
    }

    let consumer = string_consumer(&broker).await;
    consumer.subscribe(["t"]).await.unwrap();

    let fiber = consumer.fiber();
    let stream = consumer.stream();
    pin_mut!(stream);

    let first = next_within(&mut stream, 5).await.unwrap().unwrap();
    assert_eq!(first.record.offset(), 0);
    let committable = first.committable_offset.clone();

    fiber.cancel().await;

    // The stream drains and terminates instead of hanging.
    let mut remaining = 0;
    while next_within(&mut stream, 5).await.is_some() {
        remaining += 1;
        assert!(remaining < 100, "stream did not terminate after cancel");
    }

    // Every facade operation now reports the shutdown.
    assert!(matches!(
        consumer.assignment().await,
        Err(ConsumerError::ConsumerShutdown)
    ));
    assert!(matches!(
        consumer.subscribe(["t"]).await,
        Err(ConsumerError::ConsumerShutdown)
    ));
    assert!(matches!(
        committable.commit().await,
        Err(ConsumerError::ConsumerShutdown)
    ));

    // Teardown closed the underlying client.
    assert!(broker.is_closed());
}

#[tokio::test]
async fn test_join_after_cancel_is_clean() {
    let broker = MockBroker::new();
    let consumer = string_consumer(&broker).await;

    let fiber = consumer.fiber();
    fiber.cancel().await;
    assert!(fiber.join().await.is_ok());
}

#[tokio::test]
async fn test_empty_assignment_stream_is_interruptible() {
    let broker = MockBroker::new();

    let consumer = string_consumer(&broker).await;
    // The subscribed topic has no partitions, so nothing is ever assigned.
    consumer.subscribe(["empty-topic"]).await.unwrap();

    let fiber = consumer.fiber();
    let stream = consumer.stream();
    pin_mut!(stream);

    // The stream keeps re-checking the assignment without emitting.
    let nothing = timeout(Duration::from_millis(200), stream.next()).await;
    assert!(nothing.is_err());

    fiber.cancel().await;
    assert!(next_within(&mut stream, 5).await.is_none());
}

#[tokio::test]
async fn test_dropping_the_consumer_tears_everything_down() {
    let broker = MockBroker::new();
    let consumer = string_consumer(&broker).await;
    consumer.subscribe(["t"]).await.unwrap();

    let fiber = consumer.fiber();
    drop(consumer);

    let joined = timeout(Duration::from_secs(5), fiber.join()).await;
    assert!(joined.expect("consumer did not shut down on drop").is_ok());
    assert!(broker.is_closed());
}

#[tokio::test]
async fn test_commit_after_shutdown_reports_shutdown() {
    let broker = MockBroker::new();
    broker.produce("t", 0, None, "v");

    let consumer = string_consumer(&broker).await;
    consumer.subscribe(["t"]).await.unwrap();

    let committable = {
        let stream = consumer.stream();
        pin_mut!(stream);
        next_within(&mut stream, 5)
            .await
            .unwrap()
            .unwrap()
            .committable_offset
            .clone()
    };

    committable.commit().await.unwrap();
    consumer.fiber().cancel().await;
    assert!(matches!(
        committable.commit().await,
        Err(ConsumerError::ConsumerShutdown)
    ));
}
