use std::collections::HashMap;
use std::time::Duration;

/// Configuration for the Kafka consumer with sensible defaults
///
/// # Examples
///
/// ```rust
/// use rillstream::{ConsumerConfig, OffsetReset};
/// use std::time::Duration;
///
/// let config = ConsumerConfig::new("broker1:9092,broker2:9092", "my-group")
///     .client_id("order-processor")
///     .auto_offset_reset(OffsetReset::Latest)
///     .poll_interval(Duration::from_millis(100))
///     .fetch_timeout(Duration::from_millis(250))
///     .custom_property("session.timeout.ms", "10000");
/// ```
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Broker bootstrap list
    pub brokers: String,
    /// Consumer group ID
    pub group_id: String,
    /// Optional client ID reported to the brokers
    pub client_id: Option<String>,
    /// Delay between two poll attempts
    pub poll_interval: Duration,
    /// Timeout passed to each underlying client poll
    pub poll_timeout: Duration,
    /// Wall-clock bound on a single unified-stream fetch
    pub fetch_timeout: Duration,
    /// Timeout passed to the client close on shutdown
    pub close_timeout: Duration,
    /// Default timeout for beginning-offset queries
    pub default_api_timeout: Duration,
    /// Default timeout for end-offset queries
    pub request_timeout: Duration,
    /// Auto offset reset behavior
    pub auto_offset_reset: OffsetReset,
    /// Additional properties forwarded verbatim to the client factory
    pub custom_config: HashMap<String, String>,
}

/// Where the consumer starts when no committed offset exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetReset {
    /// Reset to earliest available offset
    Earliest,
    /// Reset to latest offset
    Latest,
    /// Throw error if no initial offset
    None,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
            OffsetReset::None => "none",
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "default-group".to_string(),
            client_id: None,
            poll_interval: Duration::from_millis(50),
            poll_timeout: Duration::from_millis(50),
            fetch_timeout: Duration::from_millis(500),
            close_timeout: Duration::from_secs(20),
            default_api_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            auto_offset_reset: OffsetReset::Earliest,
            custom_config: HashMap::new(),
        }
    }
}

impl ConsumerConfig {
    /// Create a new config with brokers and group ID
    pub fn new(brokers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            group_id: group_id.into(),
            ..Default::default()
        }
    }

    /// Set client ID
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the delay between poll attempts
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the timeout of each underlying client poll
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the wall-clock bound on unified-stream fetches
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the client close timeout used during shutdown
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the default timeout for beginning-offset queries
    pub fn default_api_timeout(mut self, timeout: Duration) -> Self {
        self.default_api_timeout = timeout;
        self
    }

    /// Set the default timeout for end-offset queries
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set auto offset reset behavior
    pub fn auto_offset_reset(mut self, reset: OffsetReset) -> Self {
        self.auto_offset_reset = reset;
        self
    }

    /// Add custom configuration property
    pub fn custom_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_config.insert(key.into(), value.into());
        self
    }
}
