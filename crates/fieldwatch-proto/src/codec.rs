//! JSON wire codec for event payloads.
//!
//! Two modes are supported:
//!
//! - [`Codec::Standard`] writes plain JSON. Identifiers become hex strings and
//!   timestamps RFC 3339 strings, so their type is lost on the way back.
//! - [`Codec::Extended`] writes extended JSON (`{"$oid": ..}`, `{"$date": ..}`)
//!   and restores identifiers and timestamps when decoding.

use bytes::Bytes;
use serde_json::{Map, Number};

use crate::error::Error;
use crate::value::{Document, Identifier, Timestamp, Value};

/// Extended JSON key for identifiers.
const OID_KEY: &str = "$oid";

/// Extended JSON key for timestamps.
const DATE_KEY: &str = "$date";

/// Payload codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Plain JSON.
    #[default]
    Standard,
    /// Extended JSON preserving identifiers and timestamps.
    Extended,
}

impl Codec {
    /// Pick the codec from an extended-JSON toggle.
    pub fn from_extended(extended: bool) -> Self {
        if extended {
            Codec::Extended
        } else {
            Codec::Standard
        }
    }

    /// Encode a payload document to UTF-8 JSON bytes.
    pub fn encode(&self, payload: &Document) -> Result<Bytes, Error> {
        let json = self.document_to_json(payload)?;
        serde_json::to_vec(&json)
            .map(Bytes::from)
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode UTF-8 JSON bytes into a payload document.
    pub fn decode(&self, bytes: &[u8]) -> Result<Document, Error> {
        let json: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))?;
        match self.from_json(json)? {
            Value::Document(doc) => Ok(doc),
            other => Err(Error::Deserialization(format!(
                "expected a document payload, got {}",
                kind_name(&other)
            ))),
        }
    }

    /// Convert a value to a JSON tree.
    pub fn to_json(&self, value: &Value) -> Result<serde_json::Value, Error> {
        Ok(match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| Error::Serialization(format!("non-finite float {}", f)))?,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| self.to_json(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Document(doc) => self.document_to_json(doc)?,
            Value::Identifier(id) => match self {
                Codec::Standard => serde_json::Value::String(id.to_hex()),
                Codec::Extended => tagged(OID_KEY, id.to_hex()),
            },
            Value::Timestamp(ts) => match self {
                Codec::Standard => serde_json::Value::String(ts.to_rfc3339()),
                Codec::Extended => tagged(DATE_KEY, ts.to_rfc3339()),
            },
        })
    }

    /// Convert a JSON tree to a value.
    pub fn from_json(&self, json: serde_json::Value) -> Result<Value, Error> {
        Ok(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.from_json(item))
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(map) => {
                if *self == Codec::Extended {
                    if let Some(value) = decode_extended(&map)? {
                        return Ok(value);
                    }
                }
                let doc = map
                    .into_iter()
                    .map(|(key, value)| self.from_json(value).map(|value| (key, value)))
                    .collect::<Result<Document, Error>>()?;
                Value::Document(doc)
            }
        })
    }

    fn document_to_json(&self, doc: &Document) -> Result<serde_json::Value, Error> {
        let mut map = Map::with_capacity(doc.len());
        for (key, value) in doc {
            map.insert(key.clone(), self.to_json(value)?);
        }
        Ok(serde_json::Value::Object(map))
    }
}

impl From<serde_json::Value> for Value {
    /// Plain JSON conversion; numbers, strings and objects map one-to-one.
    fn from(json: serde_json::Value) -> Self {
        // Standard decoding never fails: only extended type tags can be invalid.
        Codec::Standard.from_json(json).unwrap_or(Value::Null)
    }
}

fn tagged(key: &str, value: String) -> serde_json::Value {
    let mut map = Map::with_capacity(1);
    map.insert(key.to_string(), serde_json::Value::String(value));
    serde_json::Value::Object(map)
}

/// Recognize `{"$oid": ..}` and `{"$date": ..}` wrappers.
fn decode_extended(map: &Map<String, serde_json::Value>) -> Result<Option<Value>, Error> {
    if map.len() != 1 {
        return Ok(None);
    }

    if let Some(oid) = map.get(OID_KEY) {
        let hex = oid
            .as_str()
            .ok_or_else(|| Error::Deserialization(format!("{} must be a string", OID_KEY)))?;
        return Ok(Some(Value::Identifier(Identifier::parse_hex(hex)?)));
    }

    if let Some(date) = map.get(DATE_KEY) {
        let ts = match date {
            serde_json::Value::String(s) => Timestamp::parse_rfc3339(s)?,
            serde_json::Value::Number(n) => n
                .as_i64()
                .and_then(Timestamp::from_millis)
                .ok_or_else(|| Error::InvalidTimestamp(n.to_string()))?,
            _ => {
                return Err(Error::Deserialization(format!(
                    "{} must be a string or integer",
                    DATE_KEY
                )))
            }
        };
        return Ok(Some(Value::Timestamp(ts)));
    }

    Ok(None)
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Int(_) => "integer",
        Value::Float(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Document(_) => "document",
        Value::Identifier(_) => "identifier",
        Value::Timestamp(_) => "timestamp",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id() -> Identifier {
        Identifier::from_bytes([0x5a; 16])
    }

    fn field_payload() -> Document {
        let mut filter = Document::new();
        filter.insert("_id".into(), Value::Identifier(id()));

        let mut update = Document::new();
        update.insert("_id".into(), Value::Identifier(id()));
        update.insert("content.k".into(), Value::Int(2));
        update.insert(
            "updatedAt".into(),
            Value::Timestamp(Timestamp::from_millis(1_704_067_200_500).unwrap()),
        );

        let mut payload = Document::new();
        payload.insert("filter".into(), Value::Document(filter));
        payload.insert("operator".into(), "$set".into());
        payload.insert("update".into(), Value::Document(update));
        payload
    }

    #[test]
    fn test_extended_roundtrip_keeps_types() {
        let payload = field_payload();
        let bytes = Codec::Extended.encode(&payload).unwrap();
        let decoded = Codec::Extended.decode(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_extended_wire_format() {
        let mut payload = Document::new();
        payload.insert("_id".into(), Value::Identifier(id()));
        let bytes = Codec::Extended.encode(&payload).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json, json!({"_id": {"$oid": id().to_hex()}}));
    }

    #[test]
    fn test_standard_flattens_identifiers() {
        let payload = field_payload();
        let bytes = Codec::Standard.encode(&payload).unwrap();
        let decoded = Codec::Standard.decode(&bytes).unwrap();

        let update = decoded.get("update").and_then(Value::as_document).unwrap();
        assert_eq!(update.get("_id"), Some(&Value::String(id().to_hex())));
        assert_eq!(
            update.get("updatedAt"),
            Some(&Value::String("2024-01-01T00:00:00.500Z".into()))
        );
        assert_eq!(update.get("content.k"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_standard_roundtrip_plain_payload() {
        let payload = match Value::from(json!({
            "name": "A",
            "content": {"k": 1, "tags": ["x", "y"], "ratio": 0.5, "flag": true, "none": null}
        })) {
            Value::Document(doc) => doc,
            other => panic!("expected document, got {:?}", other),
        };

        let bytes = Codec::Standard.encode(&payload).unwrap();
        assert_eq!(Codec::Standard.decode(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_float_stays_float() {
        let mut payload = Document::new();
        payload.insert("x".into(), Value::Float(2.0));
        let bytes = Codec::Standard.encode(&payload).unwrap();
        assert_eq!(Codec::Standard.decode(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_non_finite_float_is_serialization_error() {
        let mut payload = Document::new();
        payload.insert("x".into(), Value::Float(f64::NAN));
        assert!(matches!(
            Codec::Standard.encode(&payload),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            Codec::Standard.decode(b"{not json"),
            Err(Error::Deserialization(_))
        ));
        assert!(matches!(
            Codec::Standard.decode(b"[1, 2]"),
            Err(Error::Deserialization(_))
        ));
        assert!(matches!(
            Codec::Extended.decode(br#"{"_id": {"$oid": "zz"}}"#),
            Err(Error::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_extended_date_from_millis() {
        let decoded = Codec::Extended
            .decode(br#"{"at": {"$date": 1704067200000}}"#)
            .unwrap();
        assert_eq!(
            decoded.get("at"),
            Some(&Value::Timestamp(Timestamp::from_millis(1_704_067_200_000).unwrap()))
        );
    }

    #[test]
    fn test_standard_mode_ignores_type_tags() {
        let decoded = Codec::Standard
            .decode(br#"{"_id": {"$oid": "zz"}}"#)
            .unwrap();
        let inner = decoded.get("_id").and_then(Value::as_document).unwrap();
        assert_eq!(inner.get("$oid"), Some(&Value::String("zz".into())));
    }
}
