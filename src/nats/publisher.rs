//! NATS record publisher
//!
//! Publishes record envelopes to NATS JetStream.

use crate::error::SubscriberError;
use crate::events::RecordEnvelope;
use async_nats::jetstream::{self, Context as JsContext};
use async_nats::Client;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// JetStream stream holding published change records
pub const CHANGES_STREAM: &str = "CHANGES";

/// NATS publisher for change records
pub struct NatsPublisher {
    client: Client,
    jetstream: JsContext,
    subject_prefix: String,
    connected: AtomicBool,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
}

impl NatsPublisher {
    /// Connect to NATS server
    pub async fn connect(
        servers: &str,
        subject_prefix: &str,
    ) -> Result<Arc<Self>, SubscriberError> {
        info!(servers, "Connecting to NATS");

        let client = async_nats::connect(servers)
            .await
            .map_err(|e| SubscriberError::NatsConnectionFailed(Box::new(e)))?;

        let jetstream = jetstream::new(client.clone());

        info!("Connected to NATS JetStream");

        Ok(Arc::new(Self {
            client,
            jetstream,
            subject_prefix: subject_prefix.to_string(),
            connected: AtomicBool::new(true),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        }))
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
            && self.client.connection_state() == async_nats::connection::State::Connected
    }

    /// Get total messages published
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// Get total publish failures
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    pub fn jetstream(&self) -> &JsContext {
        &self.jetstream
    }

    /// Publish a record envelope to its subject
    pub async fn publish_record(&self, envelope: &RecordEnvelope) -> Result<(), SubscriberError> {
        let subject = route_subject(&self.subject_prefix, envelope);
        let payload =
            serde_json::to_vec(envelope).map_err(|source| SubscriberError::SerializationFailed {
                shard_id: envelope.shard_id.clone(),
                source,
            })?;

        debug!(
            event_type = %envelope.event_type,
            subject = %subject,
            event_id = %envelope.event_id,
            "Publishing record"
        );

        let published = match self.jetstream.publish(subject.clone(), payload.into()).await {
            Ok(ack) => ack.await,
            Err(e) => Err(e),
        };

        match published {
            Ok(ack) => {
                self.messages_published.fetch_add(1, Ordering::Relaxed);
                debug!(
                    subject = %subject,
                    stream = %ack.stream,
                    seq = ack.sequence,
                    "Record published"
                );
                Ok(())
            }
            Err(e) => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
                warn!(subject = %subject, error = %e, "Failed to publish record");
                Err(SubscriberError::NatsPublishFailed {
                    subject,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Graceful shutdown
    pub async fn close(&self) {
        info!("Closing NATS connection");
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "Failed to flush NATS connection");
        }
    }
}

/// Subject for an envelope: `{prefix}.{event_type}`
pub fn route_subject(prefix: &str, envelope: &RecordEnvelope) -> String {
    format!("{prefix}.{}", envelope.event_type)
}

/// Ensure the records stream exists
///
/// This is typically run during startup or by a separate setup job.
pub async fn ensure_stream(js: &JsContext, subject_prefix: &str) -> Result<(), SubscriberError> {
    use async_nats::jetstream::stream::{Config, RetentionPolicy, StorageType};

    // File storage, 24h retention so consumers can catch up after restarts
    let config = Config {
        name: CHANGES_STREAM.to_string(),
        subjects: vec![format!("{subject_prefix}.>")],
        retention: RetentionPolicy::Limits,
        max_age: Duration::from_secs(24 * 60 * 60),
        storage: StorageType::File,
        ..Default::default()
    };

    match js.get_or_create_stream(config).await {
        Ok(_) => {
            info!(stream = CHANGES_STREAM, "NATS stream configured");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Failed to create {CHANGES_STREAM} stream");
            Err(SubscriberError::NatsConnectionFailed(Box::new(e)))
        }
    }
}
