//! Payload encoding for outbound messages
//!
//! Text payloads are sent as-is. Map payloads are encoded as compact UTF-8
//! JSON; `serde_json` leaves non-ASCII characters and slashes unescaped.
//! Decoding is the identity on bytes: building a structured view of inbound
//! data is the envelope's job.

use crate::error::{PublishError, PublishResult};
use bytes::Bytes;
use serde_json::{Map, Value};

/// A payload the codec knows how to put on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Map(Map<String, Value>),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text(_) => "string",
            Payload::Map(_) => "map",
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Payload::Map(map)
    }
}

impl TryFrom<Value> for Payload {
    type Error = PublishError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        validate_payload(&value)?;
        match value {
            Value::String(text) => Ok(Payload::Text(text)),
            Value::Object(map) => Ok(Payload::Map(map)),
            // validate_payload already rejected the rest
            other => Err(PublishError::serialization_failed(
                value_kind(&other),
                "Message must be a string or a map",
            )),
        }
    }
}

pub fn serialize(payload: &Payload) -> PublishResult<Bytes> {
    match payload {
        Payload::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
        Payload::Map(map) => serde_json::to_vec(map)
            .map(Bytes::from)
            .map_err(|e| PublishError::serialization_failed(payload.kind(), e.to_string())),
    }
}

pub fn deserialize(raw: &[u8]) -> &[u8] {
    raw
}

/// Reject anything that is not a string or a map before encoding
pub fn validate_payload(value: &Value) -> PublishResult<()> {
    match value {
        Value::String(_) | Value::Object(_) => Ok(()),
        other => Err(PublishError::serialization_failed(
            value_kind(other),
            format!(
                "Message must be a string or a map, got {}",
                value_kind(other)
            ),
        )),
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_text_passes_through() {
        let payload = Payload::from("plain text ünïcode");
        let bytes = serialize(&payload).unwrap();
        assert_eq!(&bytes[..], "plain text ünïcode".as_bytes());
    }

    #[test]
    fn test_map_roundtrip() {
        let original = map(json!({
            "temperature": 25.5,
            "nested": {"unit": "°C"},
            "tags": ["a", "b"]
        }));
        let bytes = serialize(&Payload::Map(original.clone())).unwrap();

        let decoded: Map<String, Value> = serde_json::from_slice(deserialize(&bytes)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_map_encoding_does_not_escape() {
        let bytes = serialize(&Payload::Map(map(json!({"path": "a/b", "unit": "°C"})))).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("a/b"));
        assert!(text.contains("°C"));
    }

    #[test]
    fn test_deserialize_is_identity() {
        let raw = b"\x00\x01not json";
        assert_eq!(deserialize(raw), raw);
    }

    #[test]
    fn test_validate_payload() {
        assert!(validate_payload(&json!("text")).is_ok());
        assert!(validate_payload(&json!({"a": 1})).is_ok());

        for bad in [json!(1), json!(null), json!(true), json!([1, 2])] {
            let err = validate_payload(&bad).unwrap_err();
            assert!(matches!(err, PublishError::SerializationFailed { .. }));
        }
    }

    #[test]
    fn test_try_from_value() {
        assert_eq!(
            Payload::try_from(json!("hi")).unwrap(),
            Payload::Text("hi".to_string())
        );
        assert!(matches!(
            Payload::try_from(json!({"k": "v"})).unwrap(),
            Payload::Map(_)
        ));
        assert!(Payload::try_from(json!(3.5)).is_err());
    }
}
