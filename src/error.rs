//! Domain error types for the changefeed subscriber
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All library code returns Result<T, SubscriberError>.

use crate::service::ServiceError;
use thiserror::Error;

/// Subscriber domain errors
///
/// Every variant carries structured context fields for diagnostics, so the
/// failure mode can be matched on without parsing message strings.
///
/// Example log output:
/// ```text
/// SubscriberError::ShardRead { shard_id: "shardId-0001", .. }
/// → "read failed for shard shardId-0001"
/// ```
#[derive(Error, Debug)]
pub enum SubscriberError {
    /// Listing shards or fetching an initial cursor failed during discovery
    #[error("shard catalog resolution failed for stream '{stream_id}'")]
    CatalogResolution {
        stream_id: String,
        #[source]
        source: ServiceError,
    },

    /// A single shard's read call failed; the whole cycle is abandoned
    #[error("read failed for shard {shard_id}")]
    ShardRead {
        shard_id: String,
        #[source]
        source: ServiceError,
    },

    /// Looking up the stream attached to a table failed
    #[error("stream lookup failed for table '{table}'")]
    TableResolution {
        table: String,
        #[source]
        source: ServiceError,
    },

    /// The table exists but has no stream attached
    #[error("table '{table}' has no stream enabled")]
    StreamNotEnabled { table: String },

    /// Neither a stream id nor a table name was supplied
    #[error("a stream id or a table name is required")]
    MissingStreamIdentity,

    /// `start` was called while a schedule is already running
    #[error("subscriber for '{stream}' is already started")]
    AlreadyStarted { stream: String },

    /// Configuration error (environment variable missing or invalid)
    #[error("configuration error: {0}")]
    Config(String),

    /// NATS publish failed for a specific subject
    #[error("NATS publish failed for subject '{subject}'")]
    NatsPublishFailed {
        subject: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// NATS connection failed
    #[error("NATS connection failed")]
    NatsConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Record envelope serialization failed
    #[error("record serialization failed on shard {shard_id}")]
    SerializationFailed {
        shard_id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SubscriberError {
    /// Returns a static label string suitable for Prometheus metrics.
    ///
    /// Used as the `error_type` label on `subscriber_errors_total`.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::CatalogResolution { .. } => "catalog_resolution",
            Self::ShardRead { .. } => "shard_read",
            Self::TableResolution { .. } => "table_resolution",
            Self::StreamNotEnabled { .. } => "stream_not_enabled",
            Self::MissingStreamIdentity => "missing_stream_identity",
            Self::AlreadyStarted { .. } => "already_started",
            Self::Config(_) => "config",
            Self::NatsPublishFailed { .. } => "nats_publish",
            Self::NatsConnectionFailed(_) => "nats_connection",
            Self::SerializationFailed { .. } => "serialization",
        }
    }
}
