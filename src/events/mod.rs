//! Record envelopes
//!
//! Wraps emitted records into the payload published to the message broker.

pub mod envelope;

pub use envelope::{build_envelope, RecordEnvelope};
