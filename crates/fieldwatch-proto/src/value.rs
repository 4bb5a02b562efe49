//! Runtime value types for mutation descriptors and change event payloads.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::Error;

/// A mapping of field names to values.
///
/// Keys may be plain field names or dotted paths (`"content.k"`), exactly as
/// they appear in update documents.
pub type Document = BTreeMap<String, Value>;

/// A record identifier.
///
/// Identifiers are 16 bytes and render as 32 lowercase hex characters. They are
/// tagged explicitly when a descriptor is built so that nothing downstream has to
/// guess whether a string or document "looks like" an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier([u8; 16]);

impl Identifier {
    /// Create an identifier from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Render as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 32 character hex string.
    pub fn parse_hex(s: &str) -> Result<Self, Error> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidIdentifier(format!("{}: {}", s, e)))?;
        let bytes: [u8; 16] = bytes.try_into().map_err(|v: Vec<u8>| {
            Error::InvalidIdentifier(format!("expected 16 bytes, got {}", v.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Identifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hex(s)
    }
}

impl From<[u8; 16]> for Identifier {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

/// A point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Milliseconds since the Unix epoch. Returns `None` when out of range.
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    /// Milliseconds since the Unix epoch.
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Underlying `chrono` value.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// RFC 3339 rendering that keeps full sub-second precision.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    /// Parse an RFC 3339 string.
    pub fn parse_rfc3339(s: &str) -> Result<Self, Error> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|e| Error::InvalidTimestamp(format!("{}: {}", s, e)))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

/// A runtime value carried in filters, update documents and event payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// Nested document.
    Document(Document),
    /// Record identifier.
    Identifier(Identifier),
    /// Timestamp.
    Timestamp(Timestamp),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as a document reference.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Try to get as a mutable document reference.
    pub fn as_document_mut(&mut self) -> Option<&mut Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Try to get as an identifier.
    pub fn as_identifier(&self) -> Option<Identifier> {
        match self {
            Value::Identifier(id) => Some(*id),
            _ => None,
        }
    }

    /// Try to get as a timestamp.
    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

/// Resolve a dotted path inside a document.
///
/// A key that literally equals `path` wins over nested traversal, so update
/// documents keyed by `"content.k"` resolve the same way as records holding
/// `{content: {k: ..}}`.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    if let Some(value) = doc.get(path) {
        return Some(value);
    }

    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }
    Some(current)
}

// Conversion implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Document(v)
    }
}

impl From<Identifier> for Value {
    fn from(v: Identifier) -> Self {
        Value::Identifier(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert!(Value::Null.is_null());
        assert!(!Value::Bool(true).is_null());

        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(42).as_i64(), Some(42));
        assert_eq!(Value::Int(2).as_f64(), Some(2.0)); // Widening conversion
        assert_eq!(Value::String("hello".into()).as_str(), Some("hello"));
        assert!(Value::String("abc".into()).as_identifier().is_none());
    }

    #[test]
    fn test_value_conversions() {
        let v: Value = None::<i32>.into();
        assert_eq!(v, Value::Null);

        let v: Value = Some(42i32).into();
        assert_eq!(v, Value::Int(42));

        let v: Value = vec!["a", "b"].into();
        assert_eq!(
            v,
            Value::Array(vec![Value::String("a".into()), Value::String("b".into())])
        );
    }

    #[test]
    fn test_identifier_hex() {
        let id = Identifier::from_bytes([0xab; 16]);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(Identifier::parse_hex(&hex).unwrap(), id);
        assert_eq!(hex.parse::<Identifier>().unwrap(), id);

        assert!(Identifier::parse_hex("not-hex").is_err());
        assert!(Identifier::parse_hex("abcd").is_err());
    }

    #[test]
    fn test_timestamp_rfc3339_keeps_precision() {
        let ts = Timestamp::from_millis(1_704_067_200_123).unwrap();
        let rendered = ts.to_rfc3339();
        assert_eq!(rendered, "2024-01-01T00:00:00.123Z");
        assert_eq!(Timestamp::parse_rfc3339(&rendered).unwrap(), ts);
        assert_eq!(ts.as_millis(), 1_704_067_200_123);
    }

    #[test]
    fn test_get_path() {
        let mut content = Document::new();
        content.insert("k".into(), Value::Int(1));
        let mut doc = Document::new();
        doc.insert("content".into(), Value::Document(content));
        doc.insert("a.b".into(), Value::Int(7));

        assert_eq!(get_path(&doc, "content.k"), Some(&Value::Int(1)));
        assert_eq!(get_path(&doc, "a.b"), Some(&Value::Int(7)));
        assert!(get_path(&doc, "content.missing").is_none());
        assert!(get_path(&doc, "content.k.deeper").is_none());
    }
}
