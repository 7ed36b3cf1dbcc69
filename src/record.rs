//! Sync records and the request body schema.
//!
//! Request bodies look like:
//!
//! ```text
//! { "key": "a", "value": {"x": 1}, "updateAt": 100 }
//! ```
//!
//! `key` is only read on the generic `/sync` route; named resources take the
//! key from the route instead.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A record as exchanged with clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    /// Store key of the logical resource.
    pub key: String,
    /// Opaque payload, never inspected.
    pub value: Value,
    /// Write clock in milliseconds since epoch. `0` asks the server to stamp it.
    pub update_at: u64,
}

impl SyncRecord {
    pub fn new(key: impl Into<String>, value: Value, update_at: u64) -> Self {
        Self {
            key: key.into(),
            value,
            update_at,
        }
    }

    /// Whether the sender had no clock of its own.
    pub fn is_clockless(&self) -> bool {
        self.update_at == 0
    }
}

/// Response body for named resources, where the key is implied by the path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedRecord {
    pub value: Value,
    pub update_at: u64,
}

impl From<SyncRecord> for NamedRecord {
    fn from(record: SyncRecord) -> Self {
        Self {
            value: record.value,
            update_at: record.update_at,
        }
    }
}

/// Errors produced while validating a request body.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("malformed body: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("key must not be empty")]
    EmptyKey,
}

/// Wire shape of a write request. Fields are optional here so a missing one
/// can be reported by name instead of as a generic decode failure.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncBody {
    #[serde(default)]
    key: Option<String>,
    #[serde(default, deserialize_with = "present")]
    value: Option<Value>,
    #[serde(default)]
    update_at: Option<u64>,
}

/// Treats an explicit `null` as a present value.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl SyncBody {
    fn parse(bytes: &[u8]) -> Result<Self, BodyError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn into_record(self, key: String) -> Result<SyncRecord, BodyError> {
        let value = self.value.ok_or(BodyError::MissingField("value"))?;
        let update_at = self.update_at.ok_or(BodyError::MissingField("updateAt"))?;
        Ok(SyncRecord {
            key,
            value,
            update_at,
        })
    }
}

/// Parses a generic-mode body, where the key travels in the payload.
pub fn parse_sync_body(bytes: &[u8]) -> Result<SyncRecord, BodyError> {
    let mut body = SyncBody::parse(bytes)?;
    let key = body.key.take().ok_or(BodyError::MissingField("key"))?;
    if key.is_empty() {
        return Err(BodyError::EmptyKey);
    }
    body.into_record(key)
}

/// Parses a named-resource body. Any `key` in the payload is ignored.
pub fn parse_named_body(bytes: &[u8], store_key: &str) -> Result<SyncRecord, BodyError> {
    SyncBody::parse(bytes)?.into_record(store_key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_body() {
        let record = parse_sync_body(br#"{"key":"a","value":{"x":1},"updateAt":100}"#).unwrap();
        assert_eq!(record, SyncRecord::new("a", json!({"x": 1}), 100));
        assert!(!record.is_clockless());
    }

    #[test]
    fn test_missing_value_is_rejected() {
        let err = parse_sync_body(br#"{"key":"a","updateAt":100}"#).unwrap_err();
        assert!(matches!(err, BodyError::MissingField("value")));
    }

    #[test]
    fn test_missing_update_at_is_rejected() {
        let err = parse_sync_body(br#"{"key":"a","value":1}"#).unwrap_err();
        assert!(matches!(err, BodyError::MissingField("updateAt")));
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let err = parse_sync_body(br#"{"value":1,"updateAt":1}"#).unwrap_err();
        assert!(matches!(err, BodyError::MissingField("key")));

        let err = parse_sync_body(br#"{"key":"","value":1,"updateAt":1}"#).unwrap_err();
        assert!(matches!(err, BodyError::EmptyKey));
    }

    #[test]
    fn test_null_value_counts_as_present() {
        let record = parse_sync_body(br#"{"key":"a","value":null,"updateAt":0}"#).unwrap();
        assert_eq!(record.value, Value::Null);
        assert!(record.is_clockless());
    }

    #[test]
    fn test_negative_or_fractional_update_at_is_malformed() {
        let err = parse_sync_body(br#"{"key":"a","value":1,"updateAt":-5}"#).unwrap_err();
        assert!(matches!(err, BodyError::Malformed(_)));

        let err = parse_sync_body(br#"{"key":"a","value":1,"updateAt":1.5}"#).unwrap_err();
        assert!(matches!(err, BodyError::Malformed(_)));
    }

    #[test]
    fn test_non_json_is_malformed() {
        let err = parse_sync_body(b"not json").unwrap_err();
        assert!(matches!(err, BodyError::Malformed(_)));
    }

    #[test]
    fn test_named_body_uses_route_key() {
        let record =
            parse_named_body(br#"{"key":"ignored","value":[1,2],"updateAt":7}"#, "kvsync-rules")
                .unwrap();
        assert_eq!(record.key, "kvsync-rules");
        assert_eq!(record.value, json!([1, 2]));
    }

    #[test]
    fn test_named_record_drops_key() {
        let named = NamedRecord::from(SyncRecord::new("k", json!("v"), 3));
        let body = serde_json::to_value(&named).unwrap();
        assert_eq!(body, json!({"value": "v", "updateAt": 3}));
    }
}
