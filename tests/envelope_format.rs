//! Envelope format conformance tests
//!
//! Consumers on the NATS side parse the JSON envelope directly, so its field
//! set and value shapes are a contract.

use changefeed_subscriber::events::build_envelope;
use changefeed_subscriber::nats::route_subject;
use changefeed_subscriber::Record;
use serde_json::{json, Value};

/// Required envelope fields for every published record.
const REQUIRED_ENVELOPE_FIELDS: &[&str] = &[
    "event_id",
    "event_type",
    "stream_id",
    "shard_id",
    "timestamp",
    "sequence_number",
    "keys",
    "data",
];

fn keys_only_record(event_name: &str) -> Record {
    Record::new(json!({
        "eventID": "c81e728d9d4c2f636f067f89cc14862c",
        "eventName": event_name,
        "dynamodb": {
            "ApproximateCreationDateTime": 1700000000,
            "Keys": {
                "foo": { "S": "bar" },
                "baz": { "S": "bax" }
            },
            "SequenceNumber": "1883831300000000005697243583",
            "SizeBytes": 38,
            "StreamViewType": "KEYS_ONLY"
        }
    }))
}

fn envelope_json(record: &Record) -> Value {
    let envelope = build_envelope("urn:test:test", "456", record);
    serde_json::to_value(&envelope).expect("envelope serializes")
}

#[test]
fn envelope_has_required_fields() {
    for event_name in ["INSERT", "MODIFY", "REMOVE"] {
        let value = envelope_json(&keys_only_record(event_name));
        let obj = value.as_object().expect("envelope is a JSON object");

        for field in REQUIRED_ENVELOPE_FIELDS {
            assert!(
                obj.contains_key(*field),
                "Envelope for '{event_name}' missing required field '{field}'"
            );
        }
        assert_eq!(obj.len(), REQUIRED_ENVELOPE_FIELDS.len());
    }
}

#[test]
fn envelope_event_ids_are_valid_uuids() {
    let value = envelope_json(&keys_only_record("INSERT"));
    let event_id = value["event_id"].as_str().expect("event_id is a string");
    uuid::Uuid::parse_str(event_id)
        .unwrap_or_else(|e| panic!("invalid UUID event_id '{event_id}': {e}"));
}

#[test]
fn envelope_keys_are_flattened_and_data_is_untouched() {
    let record = keys_only_record("INSERT");
    let value = envelope_json(&record);

    assert_eq!(value["keys"], json!({ "foo": "bar", "baz": "bax" }));
    assert_eq!(value["data"], *record.payload());
    assert_eq!(value["sequence_number"], "1883831300000000005697243583");
    assert_eq!(value["stream_id"], "urn:test:test");
    assert_eq!(value["shard_id"], "456");
}

#[test]
fn subjects_follow_event_type() {
    for (event_name, subject) in [
        ("INSERT", "changes.insert"),
        ("MODIFY", "changes.modify"),
        ("REMOVE", "changes.remove"),
    ] {
        let envelope = build_envelope("urn:test:test", "456", &keys_only_record(event_name));
        assert_eq!(route_subject("changes", &envelope), subject);
    }
}
