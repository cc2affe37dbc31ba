/// Ordered headers of a consumed record.
///
/// Kafka transmits headers as a sequence of `(key, optional value)` pairs:
/// keys may repeat, values are raw bytes, and the order is meaningful. This
/// type keeps that wire shape intact instead of collapsing it into a map,
/// so relaying a consumed record downstream loses nothing. Lookups follow
/// the Kafka convention of returning the last header with a matching key;
/// [`last_str`] decodes it for the common text case.
///
/// # Examples
///
/// ```rust
/// use rillstream::Headers;
///
/// let headers = Headers::new()
///     .with("source", "web-api")
///     .with("retry", "1")
///     .with("retry", "2")
///     .with_null("tombstone");
///
/// assert_eq!(headers.last_str("source"), Some("web-api"));
/// assert_eq!(headers.last_str("retry"), Some("2"));
/// assert!(headers.contains_key("tombstone"));
/// assert_eq!(headers.last_value("tombstone"), None);
///
/// let keys: Vec<&str> = headers.iter().map(|(key, _)| key).collect();
/// assert_eq!(keys, vec!["source", "retry", "retry", "tombstone"]);
/// ```
///
/// [`last_str`]: Headers::last_str
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Headers {
    entries: Vec<(String, Option<Vec<u8>>)>,
}

impl Headers {
    /// Creates an empty header collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty collection with room for `capacity` headers.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Appends a header.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.push((key.into(), Some(value.into())));
    }

    /// Appends a header that carries no value.
    pub fn push_null(&mut self, key: impl Into<String>) {
        self.entries.push((key.into(), None));
    }

    /// Appends a header, consuming and returning the collection.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.push(key, value);
        self
    }

    /// Appends a valueless header, consuming and returning the collection.
    pub fn with_null(mut self, key: impl Into<String>) -> Self {
        self.push_null(key);
        self
    }

    /// Returns the value of the last header named `key`. Missing and
    /// valueless headers both yield `None`; use [`contains_key`] to tell
    /// them apart.
    ///
    /// [`contains_key`]: Headers::contains_key
    pub fn last_value(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Returns the value of the last header named `key` as UTF-8 text.
    /// Missing, valueless and non-UTF-8 headers all yield `None`.
    pub fn last_str(&self, key: &str) -> Option<&str> {
        self.last_value(key)
            .and_then(|value| std::str::from_utf8(value).ok())
    }

    /// Returns whether any header named `key` exists, valueless or not.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Returns the number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the record carried no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates the headers in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&[u8]>)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_lookup() {
        let mut headers = Headers::with_capacity(2);
        headers.push("source", "test");
        headers.push("version", "1.0");

        assert_eq!(headers.last_str("source"), Some("test"));
        assert_eq!(headers.last_value("version"), Some("1.0".as_bytes()));
        assert_eq!(headers.last_str("missing"), None);
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_duplicate_keys_last_wins_order_kept() {
        let headers = Headers::new()
            .with("attempt", "1")
            .with("trace", "abc")
            .with("attempt", "2");

        assert_eq!(headers.last_str("attempt"), Some("2"));
        let entries: Vec<(&str, Option<&[u8]>)> = headers.iter().collect();
        assert_eq!(
            entries,
            vec![
                ("attempt", Some("1".as_bytes())),
                ("trace", Some("abc".as_bytes())),
                ("attempt", Some("2".as_bytes())),
            ]
        );
    }

    #[test]
    fn test_null_headers() {
        let headers = Headers::new().with_null("marker");

        assert!(headers.contains_key("marker"));
        assert_eq!(headers.last_value("marker"), None);
        assert_eq!(headers.last_str("marker"), None);
    }

    #[test]
    fn test_non_utf8_value_is_reachable_as_bytes() {
        let headers = Headers::new().with("binary", vec![0xff, 0xfe]);

        assert_eq!(headers.last_value("binary"), Some(&[0xff, 0xfe][..]));
        assert_eq!(headers.last_str("binary"), None);
    }

    #[test]
    fn test_empty() {
        let headers = Headers::new();
        assert!(headers.is_empty());
        assert_eq!(headers.len(), 0);
        assert!(!headers.contains_key("anything"));
    }
}
