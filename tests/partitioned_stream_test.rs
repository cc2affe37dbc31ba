mod common;

use common::{string_consumer, MockBroker};
use futures::{pin_mut, Stream, StreamExt};
use rillstream::{ConsumerError, TopicPartition};
use std::time::Duration;
use tokio::time::timeout;

async fn next_within<S: Stream + Unpin>(stream: &mut S, secs: u64) -> Option<S::Item> {
    timeout(Duration::from_secs(secs), stream.next())
        .await
        .expect("timed out waiting for the next stream element")
}

#[tokio::test]
async fn test_one_inner_stream_per_partition() {
    let broker = MockBroker::new();
    broker.create_partitions("t", 2);
    broker.produce("t", 0, None, "A");
    broker.produce("t", 0, None, "B");
    broker.produce("t", 1, None, "X");
    broker.produce("t", 1, None, "Y");

    let consumer = string_consumer(&broker).await;
    consumer.subscribe(["t"]).await.unwrap();

    let outer = consumer.partitioned_stream();
    pin_mut!(outer);

    let (tp0, mut inner0) = next_within(&mut outer, 5).await.unwrap().unwrap();
    let (tp1, mut inner1) = next_within(&mut outer, 5).await.unwrap().unwrap();
    assert_eq!(tp0, TopicPartition::new("t", 0));
    assert_eq!(tp1, TopicPartition::new("t", 1));
    assert_eq!(inner0.topic_partition(), &tp0);

    let mut collected = Vec::new();
    for _ in 0..2 {
        let message = next_within(&mut inner0, 5).await.unwrap().unwrap();
        assert_eq!(message.record.partition(), 0);
        collected.push(message.record.value().clone());
    }
    for _ in 0..2 {
        let message = next_within(&mut inner1, 5).await.unwrap().unwrap();
        assert_eq!(message.record.partition(), 1);
        collected.push(message.record.value().clone());
    }

    // All four records arrive, with order preserved inside each partition.
    assert_eq!(collected, vec!["A", "B", "X", "Y"]);
}

#[tokio::test]
async fn test_inner_stream_preserves_partition_order() {
    let broker = MockBroker::new();
    for i in 0..5 {
        broker.produce("t", 0, None, &format!("m{}", i));
    }

    let consumer = string_consumer(&broker).await;
    consumer.subscribe(["t"]).await.unwrap();

    let outer = consumer.partitioned_stream();
    pin_mut!(outer);
    let (_tp, mut inner) = next_within(&mut outer, 5).await.unwrap().unwrap();

    for i in 0..5i64 {
        let message = next_within(&mut inner, 5).await.unwrap().unwrap();
        assert_eq!(message.record.offset(), i);
        assert_eq!(message.record.value(), &format!("m{}", i));
    }
}

#[tokio::test]
async fn test_revocation_closes_the_inner_stream() {
    let broker = MockBroker::new();
    broker.create_partitions("t", 2);
    broker.produce("t", 0, None, "A");
    broker.produce("t", 0, None, "B");
    broker.produce("t", 1, None, "X");

    let consumer = string_consumer(&broker).await;
    consumer.subscribe(["t"]).await.unwrap();

    let outer = consumer.partitioned_stream();
    pin_mut!(outer);

    let (tp0, mut inner0) = next_within(&mut outer, 5).await.unwrap().unwrap();
    let (tp1, mut inner1) = next_within(&mut outer, 5).await.unwrap().unwrap();

    for expected in ["A", "B"] {
        let message = next_within(&mut inner0, 5).await.unwrap().unwrap();
        assert_eq!(message.record.value(), expected);
    }
    let message = next_within(&mut inner1, 5).await.unwrap().unwrap();
    assert_eq!(message.record.value(), "X");

    // Revoke partition 1: its stream must end; partition 0 keeps flowing.
    broker.set_assignment([tp0.clone()]);
    assert!(next_within(&mut inner1, 5).await.is_none());

    broker.produce("t", 0, None, "C");
    let message = next_within(&mut inner0, 5).await.unwrap().unwrap();
    assert_eq!(message.record.value(), "C");
    assert_eq!(message.record.offset(), 2);

    // Reassigning partition 1 yields a fresh inner stream that resumes
    // where the old one stopped, with nothing lost or duplicated.
    broker.produce("t", 1, None, "Y");
    broker.set_assignment([tp0, tp1.clone()]);

    let (reassigned, mut inner1b) = next_within(&mut outer, 5).await.unwrap().unwrap();
    assert_eq!(reassigned, tp1);
    let message = next_within(&mut inner1b, 5).await.unwrap().unwrap();
    assert_eq!(message.record.value(), "Y");
    assert_eq!(message.record.offset(), 1);
}

#[tokio::test]
async fn test_partitioned_stream_without_subscription_fails() {
    let broker = MockBroker::new();
    let consumer = string_consumer(&broker).await;

    let outer = consumer.partitioned_stream();
    pin_mut!(outer);

    let first = next_within(&mut outer, 5).await.unwrap();
    assert!(matches!(first, Err(ConsumerError::NotSubscribed)));
    assert!(next_within(&mut outer, 5).await.is_none());
}

#[tokio::test]
async fn test_later_produced_records_reach_the_inner_stream() {
    let broker = MockBroker::new();
    broker.create_partitions("t", 1);

    let consumer = string_consumer(&broker).await;
    consumer.subscribe(["t"]).await.unwrap();

    let outer = consumer.partitioned_stream();
    pin_mut!(outer);
    let (_tp, mut inner) = next_within(&mut outer, 5).await.unwrap().unwrap();

    // Nothing produced yet; the fetch stays pending until data arrives.
    broker.produce("t", 0, None, "late");
    let message = next_within(&mut inner, 5).await.unwrap().unwrap();
    assert_eq!(message.record.value(), "late");
}
