//! Output boundary of the poll engine
//!
//! Three signals leave the engine: one per record, one per engine-level
//! failure, and one when a cycle's work is done.

use crate::error::SubscriberError;
use crate::record::Record;
use tokio::sync::mpsc;

/// Whether the downstream consumer accepted a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// Record was taken, but the consumer wants polling paused until it resumes
    Declined,
}

/// How a poll cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// All passes read and advanced successfully
    Completed,
    /// A read or a catalog resolution failed; the cycle was abandoned
    Failed,
    /// Nothing to read (no open shards)
    Idle,
}

impl CycleOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Idle => "idle",
        }
    }
}

/// What one poll cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    /// Read passes over the tracked set (more than one after a re-resolution)
    pub passes: u32,
    pub shards_read: usize,
    pub records_emitted: usize,
    pub resolutions: u32,
    pub outcome: CycleOutcome,
}

impl CycleSummary {
    pub(crate) fn new() -> Self {
        Self {
            passes: 0,
            shards_read: 0,
            records_emitted: 0,
            resolutions: 0,
            outcome: CycleOutcome::Idle,
        }
    }
}

/// Receives everything the engine produces
///
/// Calls are made synchronously from the engine task, in order per shard.
pub trait Emitter: Send + Sync {
    /// One record, in the order the service returned it
    fn record(&self, shard_id: &str, record: Record) -> Delivery;

    /// An engine-level failure; the cycle it happened in is abandoned
    fn error(&self, error: SubscriberError);

    /// The cycle's work is finished
    fn cycle_complete(&self, _summary: &CycleSummary) {}
}

/// Tagged engine output
#[derive(Debug)]
pub enum SubscriberEvent {
    Record { shard_id: String, record: Record },
    Error(SubscriberError),
    CycleComplete(CycleSummary),
}

/// Forwards engine output over an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<SubscriberEvent>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SubscriberEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Emitter for ChannelEmitter {
    fn record(&self, shard_id: &str, record: Record) -> Delivery {
        let event = SubscriberEvent::Record {
            shard_id: shard_id.to_string(),
            record,
        };
        match self.tx.send(event) {
            Ok(()) => Delivery::Accepted,
            // Receiver gone: nobody is listening, stop polling
            Err(_) => Delivery::Declined,
        }
    }

    fn error(&self, error: SubscriberError) {
        let _ = self.tx.send(SubscriberEvent::Error(error));
    }

    fn cycle_complete(&self, summary: &CycleSummary) {
        let _ = self.tx.send(SubscriberEvent::CycleComplete(summary.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn channel_emitter_forwards_in_order() {
        let (emitter, mut rx) = ChannelEmitter::new();

        assert_eq!(
            emitter.record("456", Record::new(json!({ "n": 1 }))),
            Delivery::Accepted
        );
        emitter.error(SubscriberError::MissingStreamIdentity);
        emitter.cycle_complete(&CycleSummary::new());

        assert!(matches!(
            rx.recv().await,
            Some(SubscriberEvent::Record { ref shard_id, .. }) if shard_id == "456"
        ));
        assert!(matches!(rx.recv().await, Some(SubscriberEvent::Error(_))));
        assert!(matches!(rx.recv().await, Some(SubscriberEvent::CycleComplete(_))));
    }

    #[test]
    fn closed_channel_declines_records() {
        let (emitter, rx) = ChannelEmitter::new();
        drop(rx);
        assert_eq!(
            emitter.record("456", Record::new(json!({}))),
            Delivery::Declined
        );
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(CycleOutcome::Completed.as_label(), "completed");
        assert_eq!(CycleOutcome::Failed.as_label(), "failed");
        assert_eq!(CycleOutcome::Idle.as_label(), "idle");
    }
}
