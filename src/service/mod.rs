//! Change-log service boundary
//!
//! The subscriber only ever talks to the change log through
//! [`ChangeLogService`]: list shards, get a cursor for a shard, read records
//! from a cursor, and the one-time table → stream lookup.

mod http;
mod types;

pub use http::{HttpChangeLog, HttpChangeLogConfig};
pub use types::{CursorToken, PositionType, ReadOutput, ShardDescriptor, ShardPage};

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised at the service boundary
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Transport failure talking to the service
    #[error("change-log request failed")]
    Http(#[from] reqwest::Error),

    /// The service answered with an error document
    #[error("{code}: {message}")]
    Api { code: String, message: String },

    /// The response body could not be decoded
    #[error("malformed change-log response")]
    Decode(#[from] serde_json::Error),

    /// The service could not serve the request (used by in-process backends)
    #[error("change-log unavailable: {0}")]
    Unavailable(String),
}

/// Opaque RPC boundary to an append-only, partitioned change log
#[async_trait]
pub trait ChangeLogService: Send + Sync + 'static {
    /// List one page of shards, starting after `exclusive_start_shard_id`
    async fn list_shards(
        &self,
        stream_id: &str,
        exclusive_start_shard_id: Option<&str>,
    ) -> Result<ShardPage, ServiceError>;

    /// Obtain a cursor for a shard at the requested position
    async fn get_cursor(
        &self,
        stream_id: &str,
        shard_id: &str,
        position: PositionType,
    ) -> Result<CursorToken, ServiceError>;

    /// Read the records available at a cursor
    async fn read_records(&self, cursor: &CursorToken) -> Result<ReadOutput, ServiceError>;

    /// Resolve a table name to the id of its latest stream, if it has one
    async fn latest_stream_id(&self, table: &str) -> Result<Option<String>, ServiceError>;
}
