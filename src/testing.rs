//! Test doubles for the service boundary and the emitter
//!
//! [`MockChangeLog`] is a scripted in-memory change log; [`RecordingEmitter`]
//! keeps everything the engine emits for later assertions.

use crate::engine::{CycleSummary, Delivery, Emitter};
use crate::error::SubscriberError;
use crate::record::Record;
use crate::service::{
    ChangeLogService, CursorToken, PositionType, ReadOutput, ServiceError, ShardPage,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Scripted responses keyed by their request.
///
/// Queues hand out their entries in order and then keep repeating the last one.
struct Script<T> {
    entries: HashMap<String, VecDeque<T>>,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T: Clone> Script<T> {
    fn set(&mut self, key: &str, value: T) {
        self.entries.insert(key.to_string(), VecDeque::from([value]));
    }

    fn push(&mut self, key: &str, value: T) {
        self.entries.entry(key.to_string()).or_default().push_back(value);
    }

    fn next(&mut self, key: &str) -> Option<T> {
        let queue = self.entries.get_mut(key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[derive(Default)]
struct MockInner {
    pages: HashMap<Option<String>, ShardPage>,
    listing_failure: Option<String>,
    cursors: Script<CursorToken>,
    reads: Script<Result<ReadOutput, String>>,
    tables: HashMap<String, Option<String>>,
    read_delay: Option<Duration>,
    list_requests: Vec<Option<String>>,
    cursor_requests: Vec<(String, PositionType)>,
    read_requests: Vec<String>,
    reads_in_flight: HashMap<String, usize>,
    max_reads_in_flight_per_cursor: usize,
}

/// In-memory [`ChangeLogService`] driven by scripted responses
#[derive(Default)]
pub struct MockChangeLog {
    inner: Mutex<MockInner>,
}

impl MockChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `page` to listing calls starting after `exclusive_start`
    pub fn push_page(&self, exclusive_start: Option<&str>, page: ShardPage) {
        self.inner
            .lock()
            .pages
            .insert(exclusive_start.map(str::to_string), page);
    }

    pub fn clear_pages(&self) {
        self.inner.lock().pages.clear();
    }

    pub fn fail_listing(&self, message: &str) {
        self.inner.lock().listing_failure = Some(message.to_string());
    }

    pub fn clear_listing_failure(&self) {
        self.inner.lock().listing_failure = None;
    }

    /// Every cursor fetch for `shard_id` returns `token`
    pub fn set_cursor(&self, shard_id: &str, token: &str) {
        self.inner.lock().cursors.set(shard_id, CursorToken::new(token));
    }

    /// Queue a cursor for `shard_id`; successive fetches walk the queue
    pub fn push_cursor(&self, shard_id: &str, token: &str) {
        self.inner.lock().cursors.push(shard_id, CursorToken::new(token));
    }

    /// Reading `cursor` returns `records` and `next`
    pub fn set_read(&self, cursor: &str, records: Vec<Value>, next: Option<&str>) {
        self.inner.lock().reads.set(cursor, Ok(read_output(records, next)));
    }

    /// Queue a read result for `cursor`; successive reads walk the queue
    pub fn push_read(&self, cursor: &str, records: Vec<Value>, next: Option<&str>) {
        self.inner.lock().reads.push(cursor, Ok(read_output(records, next)));
    }

    pub fn fail_read(&self, cursor: &str, message: &str) {
        self.inner.lock().reads.set(cursor, Err(message.to_string()));
    }

    /// Attach a stream to a table; `None` means streams are disabled
    pub fn set_table(&self, table: &str, stream_id: Option<&str>) {
        self.inner
            .lock()
            .tables
            .insert(table.to_string(), stream_id.map(str::to_string));
    }

    /// Make every read take `delay` before answering
    pub fn set_read_delay(&self, delay: Duration) {
        self.inner.lock().read_delay = Some(delay);
    }

    pub fn list_requests(&self) -> Vec<Option<String>> {
        self.inner.lock().list_requests.clone()
    }

    pub fn cursor_requests(&self) -> Vec<(String, PositionType)> {
        self.inner.lock().cursor_requests.clone()
    }

    pub fn read_requests(&self) -> Vec<String> {
        self.inner.lock().read_requests.clone()
    }

    /// Highest number of simultaneous reads seen against a single cursor
    pub fn max_reads_in_flight_per_cursor(&self) -> usize {
        self.inner.lock().max_reads_in_flight_per_cursor
    }
}

fn read_output(records: Vec<Value>, next: Option<&str>) -> ReadOutput {
    ReadOutput {
        records: records.into_iter().map(Record::new).collect(),
        next_cursor: next.map(CursorToken::new),
    }
}

#[async_trait]
impl ChangeLogService for MockChangeLog {
    async fn list_shards(
        &self,
        _stream_id: &str,
        exclusive_start_shard_id: Option<&str>,
    ) -> Result<ShardPage, ServiceError> {
        let mut inner = self.inner.lock();
        let start = exclusive_start_shard_id.map(str::to_string);
        inner.list_requests.push(start.clone());

        if let Some(ref message) = inner.listing_failure {
            return Err(ServiceError::Unavailable(message.clone()));
        }

        inner.pages.get(&start).cloned().ok_or_else(|| ServiceError::Api {
            code: "ResourceNotFoundException".to_string(),
            message: format!("no page after {start:?}"),
        })
    }

    async fn get_cursor(
        &self,
        _stream_id: &str,
        shard_id: &str,
        position: PositionType,
    ) -> Result<CursorToken, ServiceError> {
        let mut inner = self.inner.lock();
        inner.cursor_requests.push((shard_id.to_string(), position));
        inner.cursors.next(shard_id).ok_or_else(|| ServiceError::Api {
            code: "ResourceNotFoundException".to_string(),
            message: format!("unknown shard {shard_id}"),
        })
    }

    async fn read_records(&self, cursor: &CursorToken) -> Result<ReadOutput, ServiceError> {
        let delay = {
            let mut inner = self.inner.lock();
            inner.read_requests.push(cursor.to_string());
            let in_flight = inner
                .reads_in_flight
                .entry(cursor.to_string())
                .or_default();
            *in_flight += 1;
            let current = *in_flight;
            inner.max_reads_in_flight_per_cursor =
                inner.max_reads_in_flight_per_cursor.max(current);
            inner.read_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock();
        if let Some(in_flight) = inner.reads_in_flight.get_mut(cursor.as_str()) {
            *in_flight -= 1;
        }
        match inner.reads.next(cursor.as_str()) {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(ServiceError::Unavailable(message)),
            None => Err(ServiceError::Api {
                code: "ExpiredIteratorException".to_string(),
                message: format!("unknown cursor {cursor}"),
            }),
        }
    }

    async fn latest_stream_id(&self, table: &str) -> Result<Option<String>, ServiceError> {
        self.inner
            .lock()
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| ServiceError::Api {
                code: "ResourceNotFoundException".to_string(),
                message: format!("unknown table {table}"),
            })
    }
}

/// One signal captured by [`RecordingEmitter`]
#[derive(Debug)]
pub enum Recorded {
    Record { shard_id: String, record: Record },
    Error(SubscriberError),
    CycleComplete(CycleSummary),
}

/// [`Emitter`] that keeps every signal
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<Recorded>>,
    decline_after: Option<usize>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `accepted` records, then decline every further one
    pub fn declining_after(accepted: usize) -> Self {
        Self {
            events: Mutex::default(),
            decline_after: Some(accepted),
        }
    }

    pub fn records(&self) -> Vec<(String, Record)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Recorded::Record { shard_id, record } => Some((shard_id.clone(), record.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn error_labels(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Recorded::Error(err) => Some(err.error_type_label()),
                _ => None,
            })
            .collect()
    }

    pub fn cycles(&self) -> Vec<CycleSummary> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Recorded::CycleComplete(summary) => Some(summary.clone()),
                _ => None,
            })
            .collect()
    }

    /// Signal kinds in emission order: `record`, `error` or `cycle`
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .map(|e| match e {
                Recorded::Record { .. } => "record",
                Recorded::Error(_) => "error",
                Recorded::CycleComplete(_) => "cycle",
            })
            .collect()
    }
}

impl Emitter for RecordingEmitter {
    fn record(&self, shard_id: &str, record: Record) -> Delivery {
        let mut events = self.events.lock();
        let seen = events
            .iter()
            .filter(|e| matches!(e, Recorded::Record { .. }))
            .count();
        events.push(Recorded::Record {
            shard_id: shard_id.to_string(),
            record,
        });

        match self.decline_after {
            Some(limit) if seen >= limit => Delivery::Declined,
            _ => Delivery::Accepted,
        }
    }

    fn error(&self, error: SubscriberError) {
        self.events.lock().push(Recorded::Error(error));
    }

    fn cycle_complete(&self, summary: &CycleSummary) {
        self.events
            .lock()
            .push(Recorded::CycleComplete(summary.clone()));
    }
}
