//! Dynamically-typed JSON message envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object carried inside a text frame.
///
/// Accessors never fail: a missing key or a value of the wrong type yields
/// the zero value for the requested type (`""`, `0`, `0.0`, `false`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// Create an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a payload from raw frame bytes.
    ///
    /// Malformed JSON, or JSON that is not an object, decodes to an empty payload.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Map<String, Value>>(bytes) {
            Ok(map) => Self(map),
            Err(e) => {
                tracing::trace!(error = %e, len = bytes.len(), "Undecodable payload, using empty");
                Self::default()
            }
        }
    }

    /// Build a payload from a JSON value. Non-object values yield an empty payload.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.0).unwrap_or_else(|_| b"{}".to_vec())
    }

    /// Serialize to a JSON string.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// Raw value for `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value for `key`, or `""`.
    pub fn get_str(&self, key: &str) -> &str {
        self.0.get(key).and_then(Value::as_str).unwrap_or("")
    }

    /// Integer value for `key`, or `0`. Floating-point numbers are truncated.
    pub fn get_i64(&self, key: &str) -> i64 {
        match self.0.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            _ => 0,
        }
    }

    /// Floating-point value for `key`, or `0.0`.
    pub fn get_f64(&self, key: &str) -> f64 {
        self.0.get(key).and_then(Value::as_f64).unwrap_or(0.0)
    }

    /// Boolean value for `key`, or `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Whether `key` is present (with any value, including `null`).
    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Set `key` to `value`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder form of [`Payload::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Remove `key`, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Borrow the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Payload {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_typed_accessors() {
        let payload = Payload::from_bytes(
            br#"{"name":"alice","count":3,"ratio":0.5,"ok":true,"nested":{"a":1}}"#,
        );

        assert_eq!(payload.get_str("name"), "alice");
        assert_eq!(payload.get_i64("count"), 3);
        assert_eq!(payload.get_f64("ratio"), 0.5);
        assert!(payload.get_bool("ok"));
        assert_eq!(payload.get("nested"), Some(&json!({"a": 1})));
        assert_eq!(payload.len(), 5);
    }

    #[test]
    fn test_missing_and_mistyped_keys_yield_zero_values() {
        let payload = Payload::from_value(json!({"name": 42, "count": "three"}));

        assert_eq!(payload.get_str("name"), "");
        assert_eq!(payload.get_str("absent"), "");
        assert_eq!(payload.get_i64("count"), 0);
        assert_eq!(payload.get_f64("absent"), 0.0);
        assert!(!payload.get_bool("name"));
        assert!(payload.get("absent").is_none());
    }

    #[test]
    fn test_float_truncates_to_integer() {
        let payload = Payload::from_value(json!({"n": 7.9, "neg": -2.5}));
        assert_eq!(payload.get_i64("n"), 7);
        assert_eq!(payload.get_i64("neg"), -2);
        assert_eq!(payload.get_f64("n"), 7.9);
    }

    #[test]
    fn test_float_round_trip_is_exact() {
        let values = [
            1.0715660391465826e-75,
            -1.81996730402717e-179,
            -1.603964615428183e143,
            f64::MIN_POSITIVE,
            f64::MAX,
            0.1 + 0.2,
        ];
        for value in values {
            let payload = Payload::new().with("f", value);
            let decoded = Payload::from_bytes(&payload.to_bytes());
            assert_eq!(decoded.get_f64("f").to_bits(), value.to_bits());
        }
    }

    #[test]
    fn test_malformed_bytes_decode_to_empty() {
        assert!(Payload::from_bytes(b"not json").is_empty());
        assert!(Payload::from_bytes(b"").is_empty());
        assert!(Payload::from_bytes(b"[1,2,3]").is_empty());
        assert!(Payload::from_bytes(b"\"string\"").is_empty());
        assert!(Payload::from_bytes(&[0xff, 0xfe, 0x00]).is_empty());
    }

    #[test]
    fn test_set_has_remove() {
        let mut payload = Payload::new();
        assert!(!payload.has("k"));

        payload.set("k", "v");
        payload.set("null", Value::Null);
        assert!(payload.has("k"));
        assert!(payload.has("null"));
        assert_eq!(payload.get_str("k"), "v");

        payload.set("k", 10);
        assert_eq!(payload.get_i64("k"), 10);

        assert_eq!(payload.remove("k"), Some(json!(10)));
        assert!(!payload.has("k"));
    }

    #[test]
    fn test_builder_and_serialization_is_sorted() {
        let payload = Payload::new().with("b", 2).with("a", "x");
        assert_eq!(payload.to_json_string(), r#"{"a":"x","b":2}"#);
        assert_eq!(payload.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    fn json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            any::<f64>()
                .prop_filter("finite", |f| f.is_finite())
                .prop_map(|f| json!(f)),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
            Just(Value::Null),
        ]
    }

    fn json_value() -> impl Strategy<Value = Value> {
        json_leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_round_trip_preserves_entries(
            entries in prop::collection::btree_map("[a-z_]{1,8}", json_value(), 0..8)
        ) {
            let payload: Payload = entries.into_iter().collect();
            let decoded = Payload::from_bytes(&payload.to_bytes());
            prop_assert_eq!(decoded, payload);
        }
    }
}
