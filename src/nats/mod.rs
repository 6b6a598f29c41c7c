//! NATS JetStream integration
//!
//! Forwards emitted records to NATS streams.

mod publisher;

pub use publisher::{ensure_stream, route_subject, NatsPublisher, CHANGES_STREAM};
