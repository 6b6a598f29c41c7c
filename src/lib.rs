//! Changefeed Subscriber - polling consumer for partitioned change streams
//!
//! Discovers the open shards of a change stream, keeps a read cursor per
//! shard and polls every shard on a fixed interval:
//! - Shard catalog: paginated discovery of open shards with live-edge cursors
//! - Poll engine: fan-out reads, cursor advance, re-resolution on drained shards
//! - Subscriber: start/stop around the tick schedule
//! - Record stream: `futures::Stream` adapter with watermark backpressure

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod metrics;
pub mod nats;
pub mod record;
pub mod service;
pub mod shard;
pub mod stream;
pub mod subscriber;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use engine::{
    ChannelEmitter, CycleOutcome, CycleSummary, Delivery, Emitter, PollControl, PollEngine,
    SubscriberEvent,
};
pub use error::SubscriberError;
pub use record::Record;
pub use service::{ChangeLogService, HttpChangeLog};
pub use stream::{RecordStream, StreamRecord};
pub use subscriber::{StreamSource, Subscriber, SubscriberOptions};
