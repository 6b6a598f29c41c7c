//! Record stream adapter
//!
//! Exposes a [`Subscriber`] as a `futures::Stream`. Items queue up between
//! the engine and the consumer; the queue depth is tracked with an atomic
//! counter and drives a high/low watermark pause switch, so a slow consumer
//! stops polling instead of growing the queue without bound.

use crate::engine::{CycleSummary, Delivery, Emitter, PollControl};
use crate::error::SubscriberError;
use crate::record::Record;
use crate::service::ChangeLogService;
use crate::subscriber::Subscriber;

use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::trace;

/// Queue depth at which polling pauses
pub const DEFAULT_HIGH_WATERMARK: usize = 16;

/// A record together with the shard it was read from
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub shard_id: String,
    pub record: Record,
}

type StreamItem = Result<StreamRecord, SubscriberError>;

struct StreamEmitter {
    tx: mpsc::UnboundedSender<StreamItem>,
    control: PollControl,
    queued: Arc<AtomicUsize>,
    high_watermark: usize,
}

impl StreamEmitter {
    /// Queue an item and return the depth including it
    fn enqueue(&self, item: StreamItem) -> Option<usize> {
        let depth = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        // Raised before the item is visible, so the consumer that drains it
        // always sees the pause
        if depth >= self.high_watermark {
            self.control.pause();
        }
        if self.tx.send(item).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(depth)
    }
}

impl Emitter for StreamEmitter {
    fn record(&self, shard_id: &str, record: Record) -> Delivery {
        let item = Ok(StreamRecord {
            shard_id: shard_id.to_string(),
            record,
        });
        match self.enqueue(item) {
            Some(depth) if depth < self.high_watermark => Delivery::Accepted,
            _ => Delivery::Declined,
        }
    }

    fn error(&self, error: SubscriberError) {
        let _ = self.enqueue(Err(error));
    }

    fn cycle_complete(&self, summary: &CycleSummary) {
        trace!(
            records = summary.records_emitted,
            queued = self.queued.load(Ordering::SeqCst),
            "Cycle delivered to stream"
        );
    }
}

/// `Stream` of records (and engine errors) from a [`Subscriber`].
///
/// Polling starts on the first `poll_next`; dropping the stream stops the
/// subscriber. The stream ends if the subscriber cannot start at all.
///
/// The stream owns the subscriber's pause flag: whenever the queue is at or
/// below the low watermark a raised flag is lowered again.
pub struct RecordStream<S: ChangeLogService> {
    subscriber: Arc<Subscriber<S>>,
    control: PollControl,
    pending_emitter: Option<StreamEmitter>,
    rx: mpsc::UnboundedReceiver<StreamItem>,
    queued: Arc<AtomicUsize>,
    low_watermark: usize,
}

impl<S: ChangeLogService> RecordStream<S> {
    pub fn new(subscriber: Arc<Subscriber<S>>) -> Self {
        Self::with_watermarks(subscriber, DEFAULT_HIGH_WATERMARK, DEFAULT_HIGH_WATERMARK / 2)
    }

    /// Pause at `high` queued items, resume once drained to `low`
    pub fn with_watermarks(subscriber: Arc<Subscriber<S>>, high: usize, low: usize) -> Self {
        let high = high.max(1);
        let low = low.min(high - 1);
        let (tx, rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let control = subscriber.control();

        Self {
            subscriber,
            pending_emitter: Some(StreamEmitter {
                tx,
                control: control.clone(),
                queued: Arc::clone(&queued),
                high_watermark: high,
            }),
            control,
            rx,
            queued,
            low_watermark: low,
        }
    }

    /// Items waiting to be consumed
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn subscriber(&self) -> &Arc<Subscriber<S>> {
        &self.subscriber
    }
}

impl<S: ChangeLogService> Stream for RecordStream<S> {
    type Item = StreamItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(emitter) = this.pending_emitter.take() {
            if let Err(e) = this.subscriber.start(Arc::new(emitter)) {
                return Poll::Ready(Some(Err(e)));
            }
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                let depth = this.queued.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
                this.resume_if_drained(depth);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => {
                // A pause raised after the queue drained wakes us up again
                this.control.register(cx.waker());
                this.resume_if_drained(this.queued.load(Ordering::SeqCst));
                Poll::Pending
            }
        }
    }
}

impl<S: ChangeLogService> RecordStream<S> {
    fn resume_if_drained(&self, depth: usize) {
        if depth <= self.low_watermark && self.control.is_paused() {
            trace!(depth, "Queue drained, resuming polling");
            self.control.resume();
        }
    }
}

impl<S: ChangeLogService> Drop for RecordStream<S> {
    fn drop(&mut self) {
        self.subscriber.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ShardDescriptor, ShardPage};
    use crate::subscriber::SubscriberOptions;
    use crate::testing::MockChangeLog;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;

    const ARN: &str = "urn:test:test";

    fn subscriber(mock: &Arc<MockChangeLog>) -> Arc<Subscriber<MockChangeLog>> {
        let options = SubscriberOptions::for_stream(ARN).with_interval(Duration::from_millis(100));
        Arc::new(Subscriber::new(options, Arc::clone(mock)).unwrap())
    }

    fn mock_with_records(count: usize) -> Arc<MockChangeLog> {
        let mock = Arc::new(MockChangeLog::new());
        mock.push_page(
            None,
            ShardPage {
                shards: vec![ShardDescriptor::open("456")],
                last_evaluated_shard_id: None,
            },
        );
        mock.set_cursor("456", "C0");
        let records = (0..count).map(|n| json!({ "n": n })).collect();
        mock.set_read("C0", records, Some("C1"));
        mock.set_read("C1", vec![json!({ "n": "late" })], Some("C1"));
        mock
    }

    #[tokio::test(start_paused = true)]
    async fn yields_records_with_their_shard() {
        let mock = mock_with_records(2);
        let mut stream = RecordStream::new(subscriber(&mock));

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.shard_id, "456");
        assert_eq!(first.record.payload()["n"], 0);

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.record.payload()["n"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_at_high_watermark_and_resumes_when_drained() {
        let mock = mock_with_records(4);
        let sub = subscriber(&mock);
        let control = sub.control();
        let mut stream = RecordStream::with_watermarks(Arc::clone(&sub), 3, 1);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.record.payload()["n"], 0);
        assert!(control.is_paused());
        assert_eq!(stream.queued(), 3);

        // Paused: further ticks do not read
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(mock.read_requests(), vec!["C0"]);

        stream.next().await.unwrap().unwrap();
        assert!(control.is_paused());
        stream.next().await.unwrap().unwrap();
        assert!(!control.is_paused());
        stream.next().await.unwrap().unwrap();

        let late = stream.next().await.unwrap().unwrap();
        assert_eq!(late.record.payload()["n"], "late");
        assert_eq!(mock.read_requests(), vec!["C0", "C1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_errors_are_stream_items() {
        let mock = mock_with_records(0);
        mock.fail_read("C0", "throttled");
        let mut stream = RecordStream::new(subscriber(&mock));

        let item = stream.next().await.unwrap();
        assert!(matches!(item, Err(SubscriberError::ShardRead { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_ends_when_subscriber_cannot_start() {
        let mock = mock_with_records(1);
        mock.set_table("credentials", None);
        let options = SubscriberOptions::for_table("credentials");
        let sub = Arc::new(Subscriber::new(options, Arc::clone(&mock)).unwrap());
        let mut stream = RecordStream::new(sub);

        assert!(matches!(
            stream.next().await,
            Some(Err(SubscriberError::StreamNotEnabled { .. }))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_polled_before_first_read() {
        let mock = mock_with_records(1);
        let sub = subscriber(&mock);
        let mut task = tokio_test::task::spawn(RecordStream::new(Arc::clone(&sub)));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(mock.list_requests().is_empty());
        assert!(!sub.is_running());

        tokio_test::assert_pending!(task.poll_next());
        assert!(sub.is_running());
    }

    #[tokio::test]
    async fn pause_raised_after_drain_is_lowered_again() {
        let mock = mock_with_records(0);
        let sub = subscriber(&mock);
        let control = sub.control();
        let mut stream = RecordStream::with_watermarks(Arc::clone(&sub), 2, 0);
        // Drive the emitter by hand; the subscriber is never started
        let emitter = stream.pending_emitter.take().unwrap();

        let record = || Record::new(json!({ "n": 1 }));
        assert_eq!(emitter.record("456", record()), Delivery::Accepted);
        assert_eq!(emitter.record("456", record()), Delivery::Declined);
        assert!(control.is_paused());

        let mut task = tokio_test::task::spawn(stream);
        assert!(tokio_test::assert_ready!(task.poll_next()).is_some());
        assert!(tokio_test::assert_ready!(task.poll_next()).is_some());
        assert!(!control.is_paused());
        tokio_test::assert_pending!(task.poll_next());

        // The engine raises the flag once its emit loop is over
        control.pause();
        assert!(task.is_woken());
        tokio_test::assert_pending!(task.poll_next());
        assert!(!control.is_paused());
        assert_eq!(task.queued(), 0);
    }

    #[tokio::test]
    async fn pause_is_raised_before_the_crossing_item_is_seen() {
        let mock = mock_with_records(0);
        let sub = subscriber(&mock);
        let control = sub.control();
        let mut stream = RecordStream::with_watermarks(Arc::clone(&sub), 1, 0);
        let emitter = stream.pending_emitter.take().unwrap();

        assert_eq!(
            emitter.record("456", Record::new(json!({}))),
            Delivery::Declined
        );
        // Paused without any help from the engine, lowered by the drain
        assert!(control.is_paused());
        stream.next().await.unwrap().unwrap();
        assert!(!control.is_paused());
        drop(emitter);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_stream_stops_the_subscriber() {
        let mock = mock_with_records(1);
        let sub = subscriber(&mock);
        let mut stream = RecordStream::new(Arc::clone(&sub));
        stream.next().await.unwrap().unwrap();

        drop(stream);
        sub.stopped().await;
        assert!(!sub.is_running());
    }
}
