//! Request/response shapes exchanged with the change-log service

use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, service-issued read position on one shard
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CursorToken(String);

impl CursorToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CursorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CursorToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// Where a freshly issued cursor starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionType {
    /// Just after the most recent record (live edge)
    Latest,
    /// Oldest record still retained
    TrimHorizon,
}

impl PositionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Latest => "LATEST",
            Self::TrimHorizon => "TRIM_HORIZON",
        }
    }
}

/// One shard as described by a listing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    pub shard_id: String,
    pub parent_shard_id: Option<String>,
    pub starting_sequence: Option<String>,
    /// Present once the shard is closed
    pub ending_sequence: Option<String>,
}

impl ShardDescriptor {
    /// Descriptor for a shard that is still receiving records
    pub fn open(shard_id: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            parent_shard_id: None,
            starting_sequence: None,
            ending_sequence: None,
        }
    }

    /// Descriptor for a shard closed at `ending_sequence`
    pub fn closed(shard_id: impl Into<String>, ending_sequence: impl Into<String>) -> Self {
        Self {
            ending_sequence: Some(ending_sequence.into()),
            ..Self::open(shard_id)
        }
    }

    pub fn is_open(&self) -> bool {
        self.ending_sequence.is_none()
    }
}

/// One page of a shard listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardPage {
    pub shards: Vec<ShardDescriptor>,
    /// Continuation token: pass back as the exclusive start of the next call
    pub last_evaluated_shard_id: Option<String>,
}

/// Result of reading a cursor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOutput {
    pub records: Vec<Record>,
    /// `None` means the shard is drained and the cursor must not be reused
    pub next_cursor: Option<CursorToken>,
}
