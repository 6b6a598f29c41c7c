//! Record envelope for the message broker
//!
//! Converts emitted records to JSON payloads for NATS publishing.

use crate::record::Record;
use serde::Serialize;
use uuid::Uuid;

/// Broker payload for one change record
#[derive(Debug, Clone, Serialize)]
pub struct RecordEnvelope {
    pub event_id: String,
    pub event_type: String,
    pub stream_id: String,
    pub shard_id: String,
    pub timestamp: u64,
    pub sequence_number: Option<String>,
    pub keys: Option<serde_json::Map<String, serde_json::Value>>,
    pub data: serde_json::Value,
}

/// Wrap a record read from `shard_id` of `stream_id`
pub fn build_envelope(stream_id: &str, shard_id: &str, record: &Record) -> RecordEnvelope {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    RecordEnvelope {
        event_id: Uuid::new_v4().to_string(),
        event_type: event_type(record).to_string(),
        stream_id: stream_id.to_string(),
        shard_id: shard_id.to_string(),
        timestamp,
        sequence_number: record.sequence_number().map(str::to_string),
        keys: record.keys(),
        data: record.payload().clone(),
    }
}

fn event_type(record: &Record) -> &'static str {
    match record.event_name() {
        Some("INSERT") => "insert",
        Some("MODIFY") => "modify",
        Some("REMOVE") => "remove",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_carries_keys_and_sequence() {
        let record = Record::new(json!({
            "eventName": "MODIFY",
            "dynamodb": {
                "Keys": { "foo": { "S": "bar" } },
                "SequenceNumber": "42"
            }
        }));

        let envelope = build_envelope("urn:test:test", "456", &record);

        assert_eq!(envelope.event_type, "modify");
        assert_eq!(envelope.shard_id, "456");
        assert_eq!(envelope.sequence_number.as_deref(), Some("42"));
        assert_eq!(envelope.keys.unwrap()["foo"], "bar");
        assert!(Uuid::parse_str(&envelope.event_id).is_ok());
    }

    #[test]
    fn unknown_event_name_maps_to_other() {
        let envelope = build_envelope("s", "1", &Record::new(json!({ "x": 1 })));
        assert_eq!(envelope.event_type, "other");
        assert!(envelope.keys.is_none());
    }
}
