//! Poll engine implementation
//!
//! One cycle: read every tracked cursor (fan-out, then join), emit the
//! records, advance the cursors. When any shard comes back without a
//! successor cursor the whole tracked set is dropped, the catalog is
//! resolved again and the fresh set is read right away.

use crate::engine::control::PollControl;
use crate::engine::emitter::{CycleOutcome, CycleSummary, Delivery, Emitter};
use crate::error::SubscriberError;
use crate::metrics;
use crate::service::{ChangeLogService, ReadOutput};
use crate::shard::{ShardCatalog, ShardState, TrackedSet};

use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Default fan-out for per-shard reads within one pass
pub const DEFAULT_READ_CONCURRENCY: usize = 16;

/// Upper bound on read passes in one cycle (initial pass plus catch-up
/// passes after re-resolution). Reaching it leaves the fresh tracked set
/// for the next tick.
pub const MAX_PASSES_PER_CYCLE: u32 = 8;

/// Operational state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No tracked set
    Idle,
    /// Tracked set present
    Active,
}

/// Polls the tracked shards of one stream
pub struct PollEngine<S> {
    service: Arc<S>,
    catalog: ShardCatalog<S>,
    tracked: Option<TrackedSet>,
    state: ShardState,
    control: PollControl,
    max_concurrent_reads: usize,
}

impl<S: ChangeLogService> PollEngine<S> {
    pub fn new(service: Arc<S>, stream_id: impl Into<String>) -> Self {
        let catalog = ShardCatalog::new(Arc::clone(&service), stream_id);
        Self {
            service,
            catalog,
            tracked: None,
            state: ShardState::new(),
            control: PollControl::new(),
            max_concurrent_reads: DEFAULT_READ_CONCURRENCY,
        }
    }

    /// Share statistics with an external observer
    pub fn with_state(mut self, state: ShardState) -> Self {
        self.state = state;
        self
    }

    /// Share the pause flag with an external consumer
    pub fn with_control(mut self, control: PollControl) -> Self {
        self.control = control;
        self
    }

    pub fn with_max_concurrent_reads(mut self, max: usize) -> Self {
        self.max_concurrent_reads = max.max(1);
        self
    }

    pub fn with_max_concurrent_cursor_fetches(mut self, max: usize) -> Self {
        self.catalog = self.catalog.with_max_concurrent_fetches(max);
        self
    }

    pub fn stream_id(&self) -> &str {
        self.catalog.stream_id()
    }

    pub fn engine_state(&self) -> EngineState {
        if self.tracked.is_some() {
            EngineState::Active
        } else {
            EngineState::Idle
        }
    }

    pub fn tracked(&self) -> Option<&TrackedSet> {
        self.tracked.as_ref()
    }

    pub fn control(&self) -> &PollControl {
        &self.control
    }

    /// Replace the tracked set with a fresh catalog resolution.
    ///
    /// The old set is discarded first; on failure the engine is left Idle.
    pub async fn resolve(&mut self) -> Result<usize, SubscriberError> {
        self.tracked = None;

        match self.catalog.resolve_open_shards().await {
            Ok(shards) => {
                let tracked = TrackedSet::new(shards);
                let count = tracked.len();
                self.state.replace_tracked(tracked.ids());
                metrics::record_resolution(count);
                self.tracked = Some(tracked);
                Ok(count)
            }
            Err(e) => {
                self.state.clear();
                Err(e)
            }
        }
    }

    /// Run one poll cycle and signal its completion.
    ///
    /// Errors never escape: they are handed to `emitter.error` and the
    /// cycle ends early.
    pub async fn poll_cycle(&mut self, emitter: &dyn Emitter) -> CycleSummary {
        let started = Instant::now();
        let mut summary = CycleSummary::new();

        self.run_cycle(emitter, &mut summary).await;

        self.state.record_cycle();
        metrics::record_cycle(&summary, started.elapsed());
        debug!(
            stream_id = %self.stream_id(),
            passes = summary.passes,
            shards_read = summary.shards_read,
            records = summary.records_emitted,
            resolutions = summary.resolutions,
            outcome = summary.outcome.as_label(),
            "Poll cycle finished"
        );

        emitter.cycle_complete(&summary);
        summary
    }

    async fn run_cycle(&mut self, emitter: &dyn Emitter, summary: &mut CycleSummary) {
        let needs_resolution = self.tracked.as_ref().map_or(true, TrackedSet::is_empty);
        if needs_resolution {
            if let Err(e) = self.resolve().await {
                self.fail(emitter, summary, e);
                return;
            }
            summary.resolutions += 1;
        }

        loop {
            let outputs = match self.read_pass().await {
                Ok(outputs) => outputs,
                Err(e) => {
                    self.fail(emitter, summary, e);
                    return;
                }
            };
            summary.passes += 1;
            summary.shards_read += outputs.len();

            self.apply(outputs, emitter, summary);

            let Some(tracked) = self.tracked.as_ref() else {
                return;
            };
            if !tracked.any_exhausted() {
                summary.outcome = if tracked.is_empty() {
                    CycleOutcome::Idle
                } else {
                    CycleOutcome::Completed
                };
                return;
            }

            info!(
                stream_id = %self.stream_id(),
                exhausted = tracked.iter().filter(|s| s.is_exhausted()).count(),
                "Shard drained, re-resolving open shards"
            );

            if let Err(e) = self.resolve().await {
                self.fail(emitter, summary, e);
                return;
            }
            summary.resolutions += 1;

            if summary.passes >= MAX_PASSES_PER_CYCLE {
                warn!(
                    stream_id = %self.stream_id(),
                    passes = summary.passes,
                    "Catch-up pass limit reached, continuing next tick"
                );
                summary.outcome = CycleOutcome::Completed;
                return;
            }
        }
    }

    /// Read every readable shard once. All reads must succeed.
    async fn read_pass(&self) -> Result<Vec<(String, ReadOutput)>, SubscriberError> {
        let Some(tracked) = self.tracked.as_ref() else {
            return Ok(Vec::new());
        };

        let service = &self.service;
        let reads: Vec<_> = tracked
            .readable()
            .map(|(shard_id, cursor)| (shard_id.to_string(), cursor.clone()))
            .collect();

        futures::stream::iter(reads)
            .map(|(shard_id, cursor)| async move {
                match service.read_records(&cursor).await {
                    Ok(output) => Ok((shard_id, output)),
                    Err(source) => Err(SubscriberError::ShardRead { shard_id, source }),
                }
            })
            .buffered(self.max_concurrent_reads)
            .try_collect()
            .await
    }

    /// Emit records and move cursors after a fully successful pass
    fn apply(
        &mut self,
        outputs: Vec<(String, ReadOutput)>,
        emitter: &dyn Emitter,
        summary: &mut CycleSummary,
    ) {
        let Some(tracked) = self.tracked.as_mut() else {
            return;
        };
        let mut declined = false;

        for (shard_id, output) in outputs {
            let count = output.records.len();
            for record in output.records {
                if emitter.record(&shard_id, record) == Delivery::Declined {
                    declined = true;
                }
            }

            summary.records_emitted += count;
            self.state.record_read(&shard_id, count);
            metrics::record_emitted(&shard_id, count);

            if output.next_cursor.is_none() {
                debug!(shard_id = %shard_id, "Shard has no successor cursor");
                self.state.mark_exhausted(&shard_id);
            }
            tracked.advance(&shard_id, output.next_cursor);
        }

        if declined {
            self.control.pause();
        }
    }

    fn fail(&self, emitter: &dyn Emitter, summary: &mut CycleSummary, error: SubscriberError) {
        error!(
            stream_id = %self.stream_id(),
            error = %error,
            error_type = error.error_type_label(),
            "Poll cycle abandoned"
        );
        metrics::record_error(&error);
        summary.outcome = CycleOutcome::Failed;
        emitter.error(error);
    }
}
