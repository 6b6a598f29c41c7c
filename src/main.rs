//! Changefeed Subscriber binary
//!
//! Follows one change stream and:
//! - Polls every open shard on a fixed interval
//! - Publishes records to NATS JetStream (or logs them in local mode)
//! - Exposes health/ready endpoints for Kubernetes
//! - Exports Prometheus metrics for observability

use anyhow::Result;
use changefeed_subscriber::config::SubscriberConfig;
use changefeed_subscriber::events::build_envelope;
use changefeed_subscriber::health::{self, AppState};
use changefeed_subscriber::metrics::{self, SubscriberMetrics};
use changefeed_subscriber::nats::{self, NatsPublisher};
use changefeed_subscriber::{HttpChangeLog, RecordStream, Subscriber};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let config = SubscriberConfig::from_env()?;

    // Initialize tracing with configured log level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("changefeed_subscriber={}", config.log_level).parse()?)
                .add_directive("async_nats=warn".parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .json()
        .init();

    let stream_label = config.stream_label();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        stream = %stream_label,
        interval = ?config.poll_interval,
        "Starting Changefeed Subscriber"
    );

    // Initialize metrics
    let subscriber_metrics = match SubscriberMetrics::install() {
        Ok(m) => {
            info!("Prometheus metrics initialized");
            Some(Arc::new(m))
        }
        Err(e) => {
            error!(error = %e, "Failed to install Prometheus recorder - metrics disabled");
            None
        }
    };

    // Connect to NATS if configured
    let nats = if let Some(ref url) = config.nats_url {
        match NatsPublisher::connect(url, &config.nats_subject_prefix).await {
            Ok(publisher) => {
                info!(url = %url, "Connected to NATS");
                if let Err(e) =
                    nats::ensure_stream(publisher.jetstream(), &config.nats_subject_prefix).await
                {
                    warn!(error = %e, "Could not ensure NATS stream - publishing anyway");
                }
                metrics::set_nats_connected(true);
                Some(publisher)
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to NATS - running in local mode");
                metrics::set_nats_connected(false);
                None
            }
        }
    } else {
        info!("No NATS_URL configured - running in local mode");
        None
    };

    // Build the subscriber (fails fast without a stream identity)
    let service = Arc::new(HttpChangeLog::new(config.service_config())?);
    let subscriber = Arc::new(Subscriber::new(config.subscriber_options(), service)?);

    // Start health server
    let app_state = AppState {
        stream: stream_label.clone(),
        shard_state: subscriber.state(),
        nats: nats.clone(),
        metrics: subscriber_metrics.clone(),
    };

    let health_router = health::router(app_state);
    let addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();

    info!(port = config.http_port, "Starting HTTP server");

    let http_server = axum::serve(tokio::net::TcpListener::bind(addr).await?, health_router);

    let records = RecordStream::new(Arc::clone(&subscriber));

    // Run everything concurrently
    tokio::select! {
        _ = forward_records(records, &stream_label, nats.clone()) => {
            warn!("Record stream ended");
        }
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    // Graceful shutdown
    info!("Shutting down subscriber...");

    subscriber.stop();
    subscriber.stopped().await;

    if let Some(ref nats) = nats {
        nats.close().await;
    }

    info!("Subscriber shutdown complete");
    Ok(())
}

/// Drain the record stream into NATS, or the log when running locally
async fn forward_records(
    mut records: RecordStream<HttpChangeLog>,
    stream_label: &str,
    nats: Option<Arc<NatsPublisher>>,
) {
    while let Some(item) = records.next().await {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, error_type = e.error_type_label(), "Subscriber error");
                continue;
            }
        };

        let envelope = build_envelope(stream_label, &item.shard_id, &item.record);

        match nats {
            Some(ref nats) => {
                let start = Instant::now();
                match nats.publish_record(&envelope).await {
                    Ok(()) => metrics::record_publish(start.elapsed()),
                    Err(e) => {
                        metrics::record_error(&e);
                        warn!(shard_id = %item.shard_id, error = %e, "Failed to publish record");
                    }
                }
            }
            None => info!(
                shard_id = %envelope.shard_id,
                event_type = %envelope.event_type,
                sequence_number = ?envelope.sequence_number,
                "Record received"
            ),
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
