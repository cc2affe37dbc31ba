//! Deserialization of raw record bytes into typed keys and values.
//!
//! The consumer is generic over the deserialized key and value types; the
//! [`Deserializer`] trait is the pluggable seam. Three implementations are
//! provided: [`StringDeserializer`], [`BytesDeserializer`] and
//! [`JsonDeserializer`]. Formats beyond these are supplied by implementing
//! the trait.

use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Serialization error type
#[derive(Debug, Clone)]
pub enum SerializationError {
    DeserializationFailed(String),
    JsonDeserializationFailed(Arc<dyn std::error::Error + Send + Sync>),
}

impl SerializationError {
    /// Builds a deserialization failure with context about what was decoded.
    pub fn deserialization_failed(message: impl Into<String>) -> Self {
        SerializationError::DeserializationFailed(message.into())
    }
}

impl std::fmt::Display for SerializationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializationError::DeserializationFailed(msg) => {
                write!(f, "Deserialization failed: {}", msg)
            }
            SerializationError::JsonDeserializationFailed(err) => {
                write!(f, "JSON deserialization error: {}", err)
            }
        }
    }
}

impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializationError::JsonDeserializationFailed(err) => Some(err.as_ref()),
            SerializationError::DeserializationFailed(_) => None,
        }
    }
}

/// Converts raw record bytes into a typed key or value.
///
/// The topic is passed alongside the bytes so schema-per-topic formats can
/// dispatch on it; the provided implementations ignore it.
pub trait Deserializer<T> {
    /// Deserializes the bytes of one record component.
    fn deserialize(&self, topic: &str, bytes: &[u8]) -> Result<T, SerializationError>;
}

/// Deserializes record bytes as UTF-8 strings.
pub struct StringDeserializer;

impl Deserializer<String> for StringDeserializer {
    fn deserialize(&self, _topic: &str, bytes: &[u8]) -> Result<String, SerializationError> {
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| {
                SerializationError::deserialization_failed(format!("invalid UTF-8 payload: {}", e))
            })
    }
}

/// Passes record bytes through untouched.
pub struct BytesDeserializer;

impl Deserializer<Vec<u8>> for BytesDeserializer {
    fn deserialize(&self, _topic: &str, bytes: &[u8]) -> Result<Vec<u8>, SerializationError> {
        Ok(bytes.to_vec())
    }
}

/// Deserializes record bytes as JSON via serde.
///
/// # Examples
///
/// ```rust
/// use rillstream::{Deserializer, JsonDeserializer};
/// use serde::Deserialize;
///
/// #[derive(Deserialize, Debug, PartialEq)]
/// struct Order {
///     id: u64,
/// }
///
/// let order: Order = JsonDeserializer
///     .deserialize("orders", br#"{"id": 7}"#)
///     .unwrap();
/// assert_eq!(order, Order { id: 7 });
/// ```
pub struct JsonDeserializer;

impl<T: DeserializeOwned> Deserializer<T> for JsonDeserializer {
    fn deserialize(&self, _topic: &str, bytes: &[u8]) -> Result<T, SerializationError> {
        serde_json::from_slice(bytes)
            .map_err(|e| SerializationError::JsonDeserializationFailed(Arc::new(e)))
    }
}
