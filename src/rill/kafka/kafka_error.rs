//! Consumer and client error types

use crate::rill::kafka::serialization::SerializationError;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// An error reported by the underlying Kafka client.
///
/// The consumer is pluggable over the client implementation, so client
/// failures are carried as a message plus an optional shared source error.
/// The original error is preserved and reachable through
/// [`Error::source`]; the consumer never translates it.
#[derive(Debug, Clone)]
pub struct ClientError {
    message: String,
    source: Option<Arc<dyn Error + Send + Sync>>,
}

impl ClientError {
    /// Creates a client error from a plain message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a client error wrapping an underlying error.
    pub fn from_source(
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => write!(f, "{}", self.message),
        }
    }
}

impl Error for ClientError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn Error + 'static))
    }
}

/// Error type for consumer operations
#[derive(Debug, Clone)]
pub enum ConsumerError {
    /// A stream was pulled before any subscription was made
    NotSubscribed,
    /// The consumer has already been shut down
    ConsumerShutdown,
    /// Invalid configuration or arguments
    InvalidConfig(String),
    /// Underlying Kafka client error
    Client(ClientError),
    /// Key or value deserialization error
    Deserialization(SerializationError),
    /// Unexpected internal failure, e.g. a panicked consumer task
    Fatal(String),
}

impl fmt::Display for ConsumerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumerError::NotSubscribed => {
                write!(f, "consumer is not subscribed to any topics")
            }
            ConsumerError::ConsumerShutdown => write!(f, "consumer has been shut down"),
            ConsumerError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            ConsumerError::Client(err) => write!(f, "kafka client error: {}", err),
            ConsumerError::Deserialization(err) => write!(f, "deserialization error: {}", err),
            ConsumerError::Fatal(msg) => write!(f, "fatal consumer error: {}", msg),
        }
    }
}

impl Error for ConsumerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConsumerError::Client(err) => Some(err),
            ConsumerError::Deserialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ClientError> for ConsumerError {
    fn from(err: ClientError) -> Self {
        ConsumerError::Client(err)
    }
}

impl From<SerializationError> for ConsumerError {
    fn from(err: SerializationError) -> Self {
        ConsumerError::Deserialization(err)
    }
}
