//! Shard management module
//!
//! Discovery of open shards, the tracked set the engine polls, and the
//! shared per-shard statistics.

mod catalog;
mod state;
mod tracked;

pub use catalog::{ShardCatalog, DEFAULT_CURSOR_FETCH_CONCURRENCY};
pub use state::{ShardState, ShardStateEntry};
pub use tracked::{Shard, TrackedSet};
