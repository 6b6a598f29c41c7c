//! Subscriber lifecycle
//!
//! [`Subscriber`] owns the poll engine and gates its timer. `start` never
//! blocks: it spawns a task that resolves the stream (one table lookup at
//! most), performs the initial shard resolution and then ticks at a fixed
//! interval anchored at the moment `start` was called. `stop` cancels
//! future ticks; a tick already running finishes.

use crate::engine::{Emitter, PollControl, PollEngine, DEFAULT_READ_CONCURRENCY};
use crate::error::SubscriberError;
use crate::metrics;
use crate::service::ChangeLogService;
use crate::shard::{ShardState, DEFAULT_CURSOR_FETCH_CONCURRENCY};

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Which stream to follow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    /// A stream identifier used as-is
    Stream(String),
    /// A table whose latest stream is looked up once before first use
    Table(String),
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(id) => write!(f, "stream {id}"),
            Self::Table(table) => write!(f, "table {table}"),
        }
    }
}

/// Construction options for a [`Subscriber`]
#[derive(Debug, Clone)]
pub struct SubscriberOptions {
    pub stream_id: Option<String>,
    pub table: Option<String>,
    pub interval: Duration,
    pub max_concurrent_reads: usize,
    pub max_concurrent_cursor_fetches: usize,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            stream_id: None,
            table: None,
            interval: DEFAULT_POLL_INTERVAL,
            max_concurrent_reads: DEFAULT_READ_CONCURRENCY,
            max_concurrent_cursor_fetches: DEFAULT_CURSOR_FETCH_CONCURRENCY,
        }
    }
}

impl SubscriberOptions {
    pub fn for_stream(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: Some(stream_id.into()),
            ..Self::default()
        }
    }

    pub fn for_table(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            ..Self::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Interval as a human-readable duration (`"10s"`, `"250ms"`)
    pub fn with_interval_str(self, interval: &str) -> Result<Self, SubscriberError> {
        let parsed = humantime::parse_duration(interval).map_err(|e| {
            SubscriberError::Config(format!("invalid poll interval '{interval}': {e}"))
        })?;
        Ok(self.with_interval(parsed))
    }

    /// The stream id wins over the table when both are given
    pub fn source(&self) -> Result<StreamSource, SubscriberError> {
        let non_empty = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();

        if let Some(stream_id) = non_empty(&self.stream_id) {
            Ok(StreamSource::Stream(stream_id))
        } else if let Some(table) = non_empty(&self.table) {
            Ok(StreamSource::Table(table))
        } else {
            Err(SubscriberError::MissingStreamIdentity)
        }
    }
}

struct Schedule {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Start/stop controller around one [`PollEngine`]
pub struct Subscriber<S> {
    service: Arc<S>,
    source: StreamSource,
    options: SubscriberOptions,
    state: ShardState,
    control: PollControl,
    engine: Arc<AsyncMutex<Option<PollEngine<S>>>>,
    schedule: Mutex<Option<Schedule>>,
    draining: Mutex<Option<JoinHandle<()>>>,
}

impl<S: ChangeLogService> Subscriber<S> {
    /// Validate options and build an idle subscriber.
    ///
    /// Fails synchronously when neither a stream id nor a table is given.
    pub fn new(options: SubscriberOptions, service: Arc<S>) -> Result<Self, SubscriberError> {
        let source = options.source()?;
        if options.interval.is_zero() {
            return Err(SubscriberError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            service,
            source,
            options,
            state: ShardState::new(),
            control: PollControl::new(),
            engine: Arc::new(AsyncMutex::new(None)),
            schedule: Mutex::new(None),
            draining: Mutex::new(None),
        })
    }

    pub fn source(&self) -> &StreamSource {
        &self.source
    }

    pub fn interval(&self) -> Duration {
        self.options.interval
    }

    /// Shared statistics of the tracked set
    pub fn state(&self) -> ShardState {
        self.state.clone()
    }

    /// Shared pause flag; ticks are skipped while paused
    pub fn control(&self) -> PollControl {
        self.control.clone()
    }

    /// True while a schedule task is alive
    pub fn is_running(&self) -> bool {
        self.schedule
            .lock()
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    /// Begin polling, reporting through `emitter`.
    ///
    /// Must be called inside a tokio runtime. Starting a running subscriber
    /// is rejected; start again after [`stop`](Self::stop) to resume.
    pub fn start(&self, emitter: Arc<dyn Emitter>) -> Result<(), SubscriberError> {
        let mut schedule = self.schedule.lock();
        if schedule.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            return Err(SubscriberError::AlreadyStarted {
                stream: self.source.to_string(),
            });
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let anchor = Instant::now();

        let task = ScheduleTask {
            service: Arc::clone(&self.service),
            source: self.source.clone(),
            options: self.options.clone(),
            state: self.state.clone(),
            control: self.control.clone(),
            engine: Arc::clone(&self.engine),
            emitter,
        };

        info!(
            source = %self.source,
            interval = ?self.options.interval,
            "Starting subscriber"
        );

        let handle = tokio::spawn(task.run(shutdown_rx, anchor));
        *schedule = Some(Schedule {
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Cancel future ticks. A tick in flight is allowed to finish.
    pub fn stop(&self) {
        if let Some(schedule) = self.schedule.lock().take() {
            info!(source = %self.source, "Stopping subscriber");
            let _ = schedule.shutdown_tx.send(());
            *self.draining.lock() = Some(schedule.handle);
        }
    }

    /// Wait for the last stopped schedule to wind down
    pub async fn stopped(&self) {
        let handle = self.draining.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl<S> Drop for Subscriber<S> {
    fn drop(&mut self) {
        if let Some(schedule) = self.schedule.get_mut().take() {
            let _ = schedule.shutdown_tx.send(());
        }
    }
}

/// Everything the spawned schedule needs
struct ScheduleTask<S> {
    service: Arc<S>,
    source: StreamSource,
    options: SubscriberOptions,
    state: ShardState,
    control: PollControl,
    engine: Arc<AsyncMutex<Option<PollEngine<S>>>>,
    emitter: Arc<dyn Emitter>,
}

impl<S: ChangeLogService> ScheduleTask<S> {
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>, anchor: Instant) {
        if let Err(e) = self.initialize().await {
            error!(source = %self.source, error = %e, "Subscriber could not start");
            metrics::record_error(&e);
            self.emitter.error(e);
            return;
        }

        let period = self.options.interval;
        let mut ticker = tokio::time::interval_at(anchor + period, period);
        // Ticks never overlap: a slow cycle pushes the next one back
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!(source = %self.source, "Poll schedule stopped");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if self.control.is_paused() {
                debug!(source = %self.source, "Polling paused, skipping tick");
                continue;
            }

            let mut engine = self.engine.lock().await;
            if let Some(engine) = engine.as_mut() {
                engine.poll_cycle(self.emitter.as_ref()).await;
            }
        }
    }

    /// Build the engine on first start, then run the initial resolution.
    ///
    /// Only a failed stream lookup is fatal; a failed resolution is reported
    /// and left to the first tick.
    async fn initialize(&self) -> Result<(), SubscriberError> {
        let mut guard = self.engine.lock().await;

        if guard.is_none() {
            let stream_id = resolve_stream_id(self.service.as_ref(), &self.source).await?;
            let engine = PollEngine::new(Arc::clone(&self.service), stream_id)
                .with_state(self.state.clone())
                .with_control(self.control.clone())
                .with_max_concurrent_reads(self.options.max_concurrent_reads)
                .with_max_concurrent_cursor_fetches(self.options.max_concurrent_cursor_fetches);
            *guard = Some(engine);
        }

        if let Some(engine) = guard.as_mut() {
            match engine.resolve().await {
                Ok(shards) => info!(
                    stream_id = %engine.stream_id(),
                    shards,
                    "Initial shard resolution complete"
                ),
                Err(e) => {
                    warn!(
                        stream_id = %engine.stream_id(),
                        error = %e,
                        "Initial shard resolution failed"
                    );
                    metrics::record_error(&e);
                    self.emitter.error(e);
                }
            }
        }

        Ok(())
    }
}

/// Turn the configured source into a stream id, looking the table up if needed
pub async fn resolve_stream_id<S: ChangeLogService + ?Sized>(
    service: &S,
    source: &StreamSource,
) -> Result<String, SubscriberError> {
    match source {
        StreamSource::Stream(stream_id) => Ok(stream_id.clone()),
        StreamSource::Table(table) => {
            let stream_id = service
                .latest_stream_id(table)
                .await
                .map_err(|source| SubscriberError::TableResolution {
                    table: table.clone(),
                    source,
                })?
                .ok_or_else(|| SubscriberError::StreamNotEnabled {
                    table: table.clone(),
                })?;
            info!(table = %table, stream_id = %stream_id, "Resolved table stream");
            Ok(stream_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ShardDescriptor, ShardPage};
    use crate::testing::{MockChangeLog, RecordingEmitter};
    use serde_json::json;

    const ARN: &str = "urn:test:test";

    fn mock_with_one_shard() -> Arc<MockChangeLog> {
        let mock = Arc::new(MockChangeLog::new());
        mock.push_page(
            None,
            ShardPage {
                shards: vec![
                    ShardDescriptor::closed("123", "1234"),
                    ShardDescriptor::open("456"),
                ],
                last_evaluated_shard_id: None,
            },
        );
        mock.set_cursor("456", "iterator-123");
        mock.set_read("iterator-123", vec![json!({ "id": 1 })], Some("iterator-456"));
        mock.set_read("iterator-456", vec![], Some("iterator-456"));
        mock
    }

    #[test]
    fn construction_without_identity_fails_synchronously() {
        let mock = Arc::new(MockChangeLog::new());
        let err = Subscriber::new(SubscriberOptions::default(), mock).err().unwrap();
        assert!(matches!(err, SubscriberError::MissingStreamIdentity));
    }

    #[test]
    fn blank_identities_count_as_missing() {
        let options = SubscriberOptions {
            stream_id: Some("  ".to_string()),
            table: Some(String::new()),
            ..SubscriberOptions::default()
        };
        assert!(matches!(options.source(), Err(SubscriberError::MissingStreamIdentity)));
    }

    #[test]
    fn stream_id_preferred_over_table() {
        let options = SubscriberOptions {
            stream_id: Some(ARN.to_string()),
            table: Some("credentials".to_string()),
            ..SubscriberOptions::default()
        };
        assert_eq!(options.source().unwrap(), StreamSource::Stream(ARN.to_string()));
        assert_eq!(
            SubscriberOptions::for_table("credentials").source().unwrap(),
            StreamSource::Table("credentials".to_string())
        );
    }

    #[test]
    fn interval_parsing() {
        let options = SubscriberOptions::for_stream(ARN).with_interval_str("100ms").unwrap();
        assert_eq!(options.interval, Duration::from_millis(100));
        assert_eq!(SubscriberOptions::default().interval, Duration::from_secs(10));
        assert!(SubscriberOptions::for_stream(ARN).with_interval_str("soon").is_err());
    }

    #[test]
    fn zero_interval_rejected() {
        let mock = Arc::new(MockChangeLog::new());
        let options = SubscriberOptions::for_stream(ARN).with_interval(Duration::ZERO);
        assert!(matches!(
            Subscriber::new(options, mock),
            Err(SubscriberError::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_emit_records_until_stopped() {
        let mock = mock_with_one_shard();
        let options = SubscriberOptions::for_stream(ARN).with_interval(Duration::from_millis(100));
        let subscriber = Subscriber::new(options, Arc::clone(&mock)).unwrap();
        let emitter = Arc::new(RecordingEmitter::new());

        subscriber.start(emitter.clone()).unwrap();
        assert!(subscriber.is_running());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(emitter.cycles().len(), 2);
        assert_eq!(emitter.records().len(), 1);
        assert_eq!(emitter.records()[0].0, "456");

        subscriber.stop();
        subscriber.stopped().await;
        assert!(!subscriber.is_running());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(emitter.cycles().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected() {
        let mock = mock_with_one_shard();
        let subscriber = Subscriber::new(SubscriberOptions::for_stream(ARN), mock).unwrap();

        subscriber.start(Arc::new(RecordingEmitter::new())).unwrap();
        let err = subscriber
            .start(Arc::new(RecordingEmitter::new()))
            .unwrap_err();
        assert!(matches!(err, SubscriberError::AlreadyStarted { .. }));

        subscriber.stop();
        subscriber.stopped().await;
        subscriber.start(Arc::new(RecordingEmitter::new())).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn paused_subscriber_skips_ticks() {
        let mock = mock_with_one_shard();
        let options = SubscriberOptions::for_stream(ARN).with_interval(Duration::from_millis(100));
        let subscriber = Subscriber::new(options, Arc::clone(&mock)).unwrap();
        let emitter = Arc::new(RecordingEmitter::new());

        subscriber.control().pause();
        subscriber.start(emitter.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(emitter.cycles().is_empty());
        assert!(mock.read_requests().is_empty());

        subscriber.control().resume();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(emitter.cycles().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_in_flight_tick_finish() {
        let mock = mock_with_one_shard();
        mock.set_read_delay(Duration::from_millis(50));
        let options = SubscriberOptions::for_stream(ARN).with_interval(Duration::from_millis(100));
        let subscriber = Subscriber::new(options, Arc::clone(&mock)).unwrap();
        let emitter = Arc::new(RecordingEmitter::new());

        subscriber.start(emitter.clone()).unwrap();
        // first tick at 100ms, its read completes at 150ms
        tokio::time::sleep(Duration::from_millis(120)).await;
        subscriber.stop();
        subscriber.stopped().await;

        assert_eq!(emitter.cycles().len(), 1);
        assert_eq!(emitter.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn table_is_resolved_to_its_stream() {
        let mock = mock_with_one_shard();
        mock.set_table("credentials", Some(ARN));
        let options =
            SubscriberOptions::for_table("credentials").with_interval(Duration::from_millis(100));
        let subscriber = Subscriber::new(options, Arc::clone(&mock)).unwrap();
        let emitter = Arc::new(RecordingEmitter::new());

        subscriber.start(emitter.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(emitter.records().len(), 1);
        assert!(emitter.error_labels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn table_without_stream_is_reported() {
        let mock = mock_with_one_shard();
        mock.set_table("credentials", None);
        let options = SubscriberOptions::for_table("credentials");
        let subscriber = Subscriber::new(options, Arc::clone(&mock)).unwrap();
        let emitter = Arc::new(RecordingEmitter::new());

        subscriber.start(emitter.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(emitter.error_labels(), vec!["stream_not_enabled"]);
        assert!(!subscriber.is_running());
        assert!(mock.list_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initial_resolution_is_retried_by_ticks() {
        let mock = mock_with_one_shard();
        mock.fail_listing("throttled");
        let options = SubscriberOptions::for_stream(ARN).with_interval(Duration::from_millis(100));
        let subscriber = Subscriber::new(options, Arc::clone(&mock)).unwrap();
        let emitter = Arc::new(RecordingEmitter::new());

        subscriber.start(emitter.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(emitter.error_labels(), vec!["catalog_resolution"]);
        assert!(subscriber.is_running());

        mock.clear_listing_failure();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(emitter.records().len(), 1);
        assert!(subscriber.state().is_active());
    }
}
