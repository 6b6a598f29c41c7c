//! Shard catalog
//!
//! Resolves the open shards of a stream and fetches a live-edge cursor for
//! each of them. A resolution is all-or-nothing: any listing or cursor
//! failure fails the whole call, and nothing is retried here.

use crate::error::SubscriberError;
use crate::service::{ChangeLogService, PositionType, ServiceError};
use crate::shard::tracked::Shard;

use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Default fan-out for per-shard cursor fetches
pub const DEFAULT_CURSOR_FETCH_CONCURRENCY: usize = 8;

/// Resolves the set of currently open shards of one stream
pub struct ShardCatalog<S> {
    service: Arc<S>,
    stream_id: String,
    max_concurrent_fetches: usize,
}

impl<S: ChangeLogService> ShardCatalog<S> {
    pub fn new(service: Arc<S>, stream_id: impl Into<String>) -> Self {
        Self {
            service,
            stream_id: stream_id.into(),
            max_concurrent_fetches: DEFAULT_CURSOR_FETCH_CONCURRENCY,
        }
    }

    /// Bound the number of concurrent cursor fetches (at least one)
    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max.max(1);
        self
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// List every page of shards, keep the open ones and position each at `LATEST`
    pub async fn resolve_open_shards(&self) -> Result<Vec<Shard>, SubscriberError> {
        self.resolve()
            .await
            .map_err(|source| SubscriberError::CatalogResolution {
                stream_id: self.stream_id.clone(),
                source,
            })
    }

    async fn resolve(&self) -> Result<Vec<Shard>, ServiceError> {
        let mut shards = Vec::new();
        let mut last_evaluated: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .service
                .list_shards(&self.stream_id, last_evaluated.as_deref())
                .await?;
            pages += 1;

            let open: Vec<String> = page
                .shards
                .into_iter()
                .filter(|s| s.is_open())
                .map(|s| s.shard_id)
                .collect();

            debug!(
                stream_id = %self.stream_id,
                page = pages,
                open_shards = open.len(),
                "Listed shard page"
            );

            let positioned: Vec<Shard> = futures::stream::iter(open)
                .map(|shard_id| async move {
                    let cursor = self
                        .service
                        .get_cursor(&self.stream_id, &shard_id, PositionType::Latest)
                        .await?;
                    Ok::<_, ServiceError>(Shard::open(shard_id, cursor))
                })
                .buffered(self.max_concurrent_fetches)
                .try_collect()
                .await?;

            shards.extend(positioned);

            last_evaluated = page.last_evaluated_shard_id;
            if last_evaluated.is_none() {
                break;
            }
        }

        info!(
            stream_id = %self.stream_id,
            pages,
            open_shards = shards.len(),
            "Resolved open shards"
        );

        Ok(shards)
    }
}
