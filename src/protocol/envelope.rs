//! Message envelope shared by inbound and outbound traffic
//!
//! An [`Envelope`] wraps the raw payload bytes together with an optional
//! parsed JSON view, plus an optional target topic and connection name.
//! Raw bytes and the parsed view are fixed at construction; only the routing
//! fields can be changed, builder-style, before the envelope is sent.
//!
//! Field access uses dotted paths: `"device.sensors.0.id"` walks object keys
//! and, for arrays, non-negative integer indexes.

use crate::error::{PublishError, PublishResult};
use crate::factory::ConnectionFactory;
use crate::protocol::codec::{self, Payload};
use bytes::Bytes;
use rumqttc::QoS;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::Index;
use thiserror::Error;

pub const PATH_SEPARATOR: char = '.';

static NULL: Value = Value::Null;

/// Attempted write to an envelope's structured view
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Message is read-only and cannot be modified")]
    ReadOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    raw: Bytes,
    data: Option<Value>,
    topic: Option<String>,
    connection: Option<String>,
}

impl Envelope {
    /// Wrap received bytes, parsing a JSON object or array when possible
    pub fn from_bytes(raw: impl Into<Bytes>) -> Self {
        let raw = raw.into();
        let data = if raw.is_empty() {
            None
        } else {
            serde_json::from_slice::<Value>(codec::deserialize(&raw))
                .ok()
                .filter(|value| value.is_object() || value.is_array())
        };

        Self {
            raw,
            data,
            topic: None,
            connection: None,
        }
    }

    /// Encode a map payload immediately and keep it as the structured view
    pub fn from_struct(payload: Map<String, Value>) -> PublishResult<Self> {
        let payload = Payload::Map(payload);
        let raw = codec::serialize(&payload)?;
        let data = match payload {
            Payload::Map(map) => Some(Value::Object(map)),
            Payload::Text(_) => None,
        };

        Ok(Self {
            raw,
            data,
            topic: None,
            connection: None,
        })
    }

    /// Build an outbound envelope from either kind of payload
    pub fn make(
        content: impl Into<Payload>,
        topic: Option<&str>,
        connection: Option<&str>,
    ) -> PublishResult<Self> {
        let mut envelope = match content.into() {
            Payload::Text(text) => Self::from_bytes(text.into_bytes()),
            Payload::Map(map) => Self::from_struct(map)?,
        };
        envelope.topic = topic.map(str::to_string);
        envelope.connection = connection.map(str::to_string);
        Ok(envelope)
    }

    /// Build an envelope from any serializable value that encodes to a JSON object
    pub fn from_serializable<T: Serialize>(value: &T) -> PublishResult<Self> {
        match serde_json::to_value(value) {
            Ok(Value::Object(map)) => Self::from_struct(map),
            Ok(other) => Err(PublishError::serialization_failed(
                codec::value_kind(&other),
                "Message must be a string or a map",
            )),
            Err(e) => Err(PublishError::serialization_failed("struct", e.to_string())),
        }
    }

    pub fn to_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn use_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Raw payload as text, replacing invalid UTF-8 sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }

    pub fn is_json(&self) -> bool {
        self.data.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// The whole structured view, if the payload had one
    pub fn all(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = self.data.as_ref()?;
        for segment in path.split(PATH_SEPARATOR) {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn get_or<'a>(&'a self, path: &str, default: &'a Value) -> &'a Value {
        self.get(path).unwrap_or(default)
    }

    /// Look up a path and deserialize it into `T`
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.get(path)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn set(&mut self, _path: &str, _value: Value) -> Result<(), EnvelopeError> {
        Err(EnvelopeError::ReadOnly)
    }

    pub fn unset(&mut self, _path: &str) -> Result<(), EnvelopeError> {
        Err(EnvelopeError::ReadOnly)
    }

    /// Publish through the factory using this envelope's own topic and connection
    pub async fn send(
        &self,
        factory: &ConnectionFactory,
        qos: QoS,
        retain: bool,
    ) -> PublishResult<()> {
        if self.topic.is_none() {
            return Err(PublishError::MissingTopic);
        }
        factory.publish_envelope(self, None, qos, retain).await
    }

    /// Publish to an explicit topic, optionally on an explicit connection
    pub async fn publish_to(
        &self,
        factory: &ConnectionFactory,
        topic: &str,
        connection: Option<&str>,
        qos: QoS,
        retain: bool,
    ) -> PublishResult<()> {
        let mut target = self.clone().to_topic(topic);
        if let Some(connection) = connection {
            target = target.use_connection(connection);
        }
        factory.publish_envelope(&target, None, qos, retain).await
    }
}

impl Index<&str> for Envelope {
    type Output = Value;

    /// Missing paths index to `Value::Null`, matching `serde_json::Value`
    fn index(&self, path: &str) -> &Value {
        self.get(path).unwrap_or(&NULL)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.raw))
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.data {
            Some(data) => data.serialize(serializer),
            None => serializer.serialize_str(&String::from_utf8_lossy(&self.raw)),
        }
    }
}

impl From<Bytes> for Envelope {
    fn from(raw: Bytes) -> Self {
        Self::from_bytes(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_from_struct_get_and_has() {
        let envelope = Envelope::from_struct(object(json!({"temperature": 25.5}))).unwrap();

        assert!(envelope.is_json());
        assert_eq!(envelope.get("temperature"), Some(&json!(25.5)));
        assert!(!envelope.has("unit"));
        assert_eq!(envelope.get_as::<f64>("temperature"), Some(25.5));
    }

    #[test]
    fn test_nested_paths_and_indexes() {
        let envelope = Envelope::from_bytes(
            r#"{"device":{"id":"d-1","sensors":[{"kind":"temp"},{"kind":"hum"}]}}"#,
        );

        assert_eq!(envelope.get("device.id"), Some(&json!("d-1")));
        assert_eq!(envelope.get("device.sensors.1.kind"), Some(&json!("hum")));
        assert!(envelope.has("device.sensors.0"));
        assert!(!envelope.has("device.sensors.2"));
        assert!(!envelope.has("device.sensors.-1"));
        assert!(!envelope.has("device.id.deeper"));
        assert_eq!(envelope["device"]["id"], json!("d-1"));
        assert_eq!(envelope["missing"], Value::Null);
    }

    #[test]
    fn test_get_or_default() {
        let default = json!("fallback");
        let envelope = Envelope::from_bytes("not json");
        assert_eq!(envelope.get_or("anything", &default), &default);

        let envelope = Envelope::from_bytes(r#"{"a":null}"#);
        assert_eq!(envelope.get_or("a", &default), &Value::Null);
        assert_eq!(envelope.get_or("b", &default), &default);
    }

    #[test]
    fn test_plain_bytes_are_not_structured() {
        for raw in ["", "hello", "42", "\"quoted\"", "{broken"] {
            let envelope = Envelope::from_bytes(raw);
            assert!(!envelope.is_json(), "{raw:?} should not be structured");
            assert!(envelope.all().is_none());
            assert!(!envelope.has("x"));
        }
        assert!(Envelope::from_bytes("").is_empty());
    }

    #[test]
    fn test_top_level_array_is_structured() {
        let envelope = Envelope::from_bytes("[10, 20]");
        assert!(envelope.is_json());
        assert_eq!(envelope.get("1"), Some(&json!(20)));
    }

    #[test]
    fn test_mutation_is_rejected() {
        let mut envelope = Envelope::from_bytes(r#"{"a":1}"#);
        assert_eq!(envelope.set("a", json!(2)), Err(EnvelopeError::ReadOnly));
        assert_eq!(envelope.unset("a"), Err(EnvelopeError::ReadOnly));
        assert_eq!(envelope.get("a"), Some(&json!(1)));
        assert_eq!(
            EnvelopeError::ReadOnly.to_string(),
            "Message is read-only and cannot be modified"
        );
    }

    #[test]
    fn test_builders_and_make() {
        let envelope = Envelope::make("payload", Some("a/b"), None)
            .unwrap()
            .use_connection("edge");
        assert_eq!(envelope.topic(), Some("a/b"));
        assert_eq!(envelope.connection(), Some("edge"));
        assert_eq!(envelope.to_string(), "payload");

        let envelope = Envelope::make(object(json!({"k": "v"})), None, None)
            .unwrap()
            .to_topic("x");
        assert!(envelope.is_json());
        assert_eq!(envelope.topic(), Some("x"));
    }

    #[test]
    fn test_serialize_prefers_structured_view() {
        let envelope = Envelope::from_bytes(r#"{"a":1}"#);
        assert_eq!(serde_json::to_value(&envelope).unwrap(), json!({"a": 1}));

        let envelope = Envelope::from_bytes("plain");
        assert_eq!(serde_json::to_value(&envelope).unwrap(), json!("plain"));
    }

    #[test]
    fn test_from_serializable_rejects_non_maps() {
        #[derive(Serialize)]
        struct Reading {
            value: u32,
        }

        let envelope = Envelope::from_serializable(&Reading { value: 7 }).unwrap();
        assert_eq!(envelope.get("value"), Some(&json!(7)));
        assert!(Envelope::from_serializable(&vec![1, 2]).is_err());
    }

    fn json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z ]{0,8}".prop_map(Value::String),
        ]
    }

    fn json_object() -> impl Strategy<Value = Map<String, Value>> {
        let value = json_leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-c]{1,2}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        });
        prop::collection::btree_map("[a-c]{1,2}", value, 0..4)
            .prop_map(|m| m.into_iter().collect())
    }

    fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
        path.split('.').try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    proptest! {
        #[test]
        fn get_agrees_with_structural_lookup(
            map in json_object(),
            path in "[a-c0-2]{1,2}(\\.[a-c0-2]{1,2}){0,3}"
        ) {
            let decoded = Value::Object(map.clone());
            let bytes = serde_json::to_vec(&decoded).unwrap();
            let envelope = Envelope::from_bytes(bytes);

            prop_assert_eq!(envelope.get(&path), lookup(&decoded, &path));
            prop_assert_eq!(envelope.has(&path), lookup(&decoded, &path).is_some());
        }

        #[test]
        fn non_structured_text_has_nothing(text in "[a-z ]{0,20}", path in "[a-z.]{1,10}") {
            let envelope = Envelope::from_bytes(text.clone());
            prop_assert!(!envelope.has(&path));
            let default = json!("d");
            prop_assert_eq!(envelope.get_or(&path, &default), &default);
        }
    }
}
