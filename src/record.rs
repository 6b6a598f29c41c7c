//! Change records
//!
//! A record is an opaque JSON payload handed through to the consumer. The
//! accessors below only peek at well-known fields for convenience; nothing
//! is validated.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single change record as returned by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Value);

impl Record {
    pub fn new(payload: Value) -> Self {
        Self(payload)
    }

    pub fn payload(&self) -> &Value {
        &self.0
    }

    pub fn into_payload(self) -> Value {
        self.0
    }

    /// `INSERT`, `MODIFY`, `REMOVE`, if present
    pub fn event_name(&self) -> Option<&str> {
        self.0.get("eventName").and_then(Value::as_str)
    }

    pub fn sequence_number(&self) -> Option<&str> {
        self.0
            .get("dynamodb")
            .and_then(|d| d.get("SequenceNumber"))
            .and_then(Value::as_str)
    }

    /// Flatten `dynamodb.Keys` into plain values.
    ///
    /// Attribute values are single-entry maps keyed by their type
    /// (`{"foo": {"S": "bar"}}`); the type tag is dropped so the result
    /// reads `{"foo": "bar"}`. Anything not shaped like that passes through.
    pub fn keys(&self) -> Option<Map<String, Value>> {
        let keys = self.0.get("dynamodb")?.get("Keys")?.as_object()?;
        Some(
            keys.iter()
                .map(|(name, attr)| (name.clone(), unwrap_attribute(attr)))
                .collect(),
        )
    }
}

impl From<Value> for Record {
    fn from(payload: Value) -> Self {
        Self(payload)
    }
}

fn unwrap_attribute(attr: &Value) -> Value {
    match attr.as_object() {
        Some(tagged) if tagged.len() == 1 => tagged
            .values()
            .next()
            .cloned()
            .unwrap_or(Value::Null),
        _ => attr.clone(),
    }
}
