use std::fmt;

/// Identifies a single partition of a Kafka topic.
///
/// `TopicPartition` is the addressing unit used throughout the consumer:
/// fetches, seeks, offset queries and rebalance callbacks are all keyed by
/// it. The type is cheap to clone, hashable, and totally ordered by
/// `(topic, partition)` so partition sets iterate deterministically.
///
/// # Examples
///
/// ```rust
/// use rillstream::TopicPartition;
///
/// let tp = TopicPartition::new("orders", 3);
/// assert_eq!(tp.topic(), "orders");
/// assert_eq!(tp.partition(), 3);
/// assert_eq!(tp.to_string(), "orders-3");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    topic: String,
    partition: i32,
}

impl TopicPartition {
    /// Creates a new topic partition identifier.
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    /// Returns the topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the partition number.
    pub fn partition(&self) -> i32 {
        self.partition
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}
