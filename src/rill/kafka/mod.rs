// Actor-based Kafka consumer core
mod actor;
mod client_handle;
mod lifecycle;
mod poll_scheduler;
mod streams;

// Public building blocks
pub mod chunk;
pub mod client;
pub mod committable;
pub mod consumer_config;
pub mod headers;
pub mod kafka_consumer;
pub mod kafka_error;
pub mod message;
pub mod serialization;
pub mod topic_partition;

#[cfg(feature = "rdkafka")]
pub mod rdkafka_client;

// Re-export main API
pub use chunk::Chunk;
pub use client::{ClientFactory, ClientRecord, ConsumerClient};
pub use committable::{CommittableMessage, CommittableOffset};
pub use consumer_config::{ConsumerConfig, OffsetReset};
pub use headers::Headers;
pub use kafka_consumer::KafkaConsumer;
pub use kafka_error::{ClientError, ConsumerError};
pub use lifecycle::ConsumerFiber;
pub use message::Message;
pub use serialization::{
    BytesDeserializer, Deserializer, JsonDeserializer, SerializationError, StringDeserializer,
};
pub use streams::PartitionStream;
pub use topic_partition::TopicPartition;

// Fetch resolution reasons, visible for callers inspecting stream internals
pub use actor::{ExpiringFetchReason, FetchReason};

// Conditional exports for the feature-gated default client
#[cfg(feature = "rdkafka")]
pub use rdkafka_client::{RdKafkaClient, RdKafkaClientFactory};
