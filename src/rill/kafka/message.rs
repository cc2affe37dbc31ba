use crate::rill::kafka::headers::Headers;
use crate::rill::kafka::topic_partition::TopicPartition;

/// A consumed record with deserialized key and value.
///
/// This struct represents a complete Kafka record with type-safe access to
/// all components:
/// - **Key**: Optional deserialized key of type `K`
/// - **Value**: Deserialized message payload of type `V`
/// - **Headers**: Message metadata as a [`Headers`] collection
/// - **Position**: topic, partition, offset and the broker timestamp
///   (epoch milliseconds) of the record
///
/// # Examples
///
/// ```rust
/// # use rillstream::{Headers, Message};
/// let message = Message::new(
///     Some("key".to_string()),
///     "value".to_string(),
///     Headers::new().with("source", "test"),
///     "orders",
///     0,
///     42,
///     Some(1_700_000_000_000),
/// );
///
/// assert_eq!(message.key(), Some(&"key".to_string()));
/// assert_eq!(message.offset(), 42);
/// assert_eq!(message.topic_partition().to_string(), "orders-0");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message<K, V> {
    pub key: Option<K>,
    pub value: V,
    pub headers: Headers,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: Option<i64>,
}

impl<K, V> Message<K, V> {
    /// Creates a new message.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key: Option<K>,
        value: V,
        headers: Headers,
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        timestamp: Option<i64>,
    ) -> Self {
        Self {
            key,
            value,
            headers,
            topic: topic.into(),
            partition,
            offset,
            timestamp,
        }
    }

    /// Returns a reference to the message key
    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    /// Returns a reference to the message value
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Returns a reference to the message headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the topic the record was read from
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the partition the record was read from
    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Returns the record offset within its partition
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Returns the broker timestamp in epoch milliseconds, if available
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    /// Returns the topic partition the record belongs to
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// Consumes the message and returns the owned value
    pub fn into_value(self) -> V {
        self.value
    }

    /// Consumes the message and returns key, value and headers
    pub fn into_parts(self) -> (Option<K>, V, Headers) {
        (self.key, self.value, self.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message<String, String> {
        Message::new(
            Some("key".to_string()),
            "value".to_string(),
            Headers::new().with("source", "test"),
            "t",
            1,
            5,
            Some(1000),
        )
    }

    #[test]
    fn test_message_accessors() {
        let message = sample();
        assert_eq!(message.key(), Some(&"key".to_string()));
        assert_eq!(message.value(), &"value".to_string());
        assert_eq!(message.headers().last_str("source"), Some("test"));
        assert_eq!(message.topic(), "t");
        assert_eq!(message.partition(), 1);
        assert_eq!(message.offset(), 5);
        assert_eq!(message.timestamp(), Some(1000));
    }

    #[test]
    fn test_topic_partition() {
        assert_eq!(sample().topic_partition(), TopicPartition::new("t", 1));
    }

    #[test]
    fn test_message_consumption() {
        let (key, value, headers) = sample().into_parts();
        assert_eq!(key, Some("key".to_string()));
        assert_eq!(value, "value".to_string());
        assert_eq!(headers.last_str("source"), Some("test"));
    }

    #[test]
    fn test_keyless_message() {
        let message: Message<String, String> =
            Message::new(None, "v".to_string(), Headers::new(), "t", 0, 0, None);
        assert_eq!(message.key(), None);
        assert_eq!(message.into_value(), "v".to_string());
    }
}
