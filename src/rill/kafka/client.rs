//! Pluggable interface to the underlying Kafka client.
//!
//! The consumer core never talks wire protocol; it drives an implementation
//! of [`ConsumerClient`] through a dedicated thread (see `client_handle`).
//! The trait is synchronous and takes `&mut self` everywhere: the client is
//! owned by its thread, so implementations need no internal locking and no
//! `Send` bound. The librdkafka-backed implementation lives behind the
//! `rdkafka` feature; tests drive an in-memory implementation.

use crate::rill::kafka::consumer_config::ConsumerConfig;
use crate::rill::kafka::headers::Headers;
use crate::rill::kafka::kafka_error::ClientError;
use crate::rill::kafka::topic_partition::TopicPartition;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// A raw record as returned by the underlying client, before
/// deserialization.
///
/// A null Kafka payload is normalized by the client implementation to an
/// empty `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: Headers,
}

impl ClientRecord {
    /// Returns the topic partition the record belongs to.
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// Operations the consumer core requires from an underlying Kafka client.
///
/// Implementations are not expected to be safe for concurrent use; every
/// call is made from the single dedicated client thread.
pub trait ConsumerClient: 'static {
    /// Subscribes to the given topics, replacing any previous subscription.
    fn subscribe(&mut self, topics: &[String]) -> Result<(), ClientError>;

    /// Subscribes to all topics matching the given pattern.
    fn subscribe_pattern(&mut self, pattern: &str) -> Result<(), ClientError>;

    /// Drops the current subscription.
    fn unsubscribe(&mut self) -> Result<(), ClientError>;

    /// Returns the partitions currently assigned to this consumer.
    fn assignment(&mut self) -> Result<BTreeSet<TopicPartition>, ClientError>;

    /// Moves the fetch position of a partition to the given offset.
    fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), ClientError>;

    /// Drains the records that became available since the previous poll.
    ///
    /// Group coordination (joins, rebalances, heartbeats) happens inside
    /// this call, so it must be invoked regularly even when no records are
    /// expected.
    fn poll(&mut self, timeout: Duration) -> Result<Vec<ClientRecord>, ClientError>;

    /// Returns the first available offset of each given partition.
    fn beginning_offsets(
        &mut self,
        partitions: &BTreeSet<TopicPartition>,
        timeout: Duration,
    ) -> Result<HashMap<TopicPartition, i64>, ClientError>;

    /// Returns the offset one past the last record of each given partition.
    fn end_offsets(
        &mut self,
        partitions: &BTreeSet<TopicPartition>,
        timeout: Duration,
    ) -> Result<HashMap<TopicPartition, i64>, ClientError>;

    /// Synchronously commits the given offsets for the consumer group.
    fn commit_sync(&mut self, offsets: &HashMap<TopicPartition, i64>) -> Result<(), ClientError>;

    /// Releases the client, leaving the consumer group.
    fn close(&mut self, timeout: Duration) -> Result<(), ClientError>;
}

/// Constructs the underlying client from consumer configuration.
///
/// The factory is invoked once, on the dedicated client thread, so the
/// client itself never crosses a thread boundary.
pub trait ClientFactory: Send + 'static {
    type Client: ConsumerClient;

    fn create(&self, config: &ConsumerConfig) -> Result<Self::Client, ClientError>;
}
