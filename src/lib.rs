//! Streaming Kafka consumer library
//!
//! This library turns a raw, single-threaded Kafka client into a
//! concurrency-safe, backpressured source of committable records. A
//! consumer actor owns the client on a dedicated thread and serializes
//! subscriptions, seeks, offset queries, commits and polling; stream
//! consumers receive records either as one unified sequence or as one
//! lazy sub-sequence per assigned partition, wired into rebalance
//! notifications.
//!
//! The underlying client is pluggable through the
//! [`ConsumerClient`]/[`ClientFactory`] traits; an
//! `rdkafka::consumer::BaseConsumer`-backed implementation ships behind
//! the `rdkafka` feature.

// Export the rill.kafka module structure
pub mod rill;

// Re-export main API
pub use rill::kafka::{
    BytesDeserializer, Chunk, ClientError, ClientFactory, ClientRecord, CommittableMessage,
    CommittableOffset, ConsumerClient, ConsumerConfig, ConsumerError, ConsumerFiber, Deserializer,
    ExpiringFetchReason, FetchReason, Headers, JsonDeserializer, KafkaConsumer, Message,
    OffsetReset, PartitionStream, SerializationError, StringDeserializer, TopicPartition,
};

#[cfg(feature = "rdkafka")]
pub use rill::kafka::{RdKafkaClient, RdKafkaClientFactory};
