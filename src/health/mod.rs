//! Health check endpoints

use crate::metrics::{self, SubscriberMetrics};
use crate::nats::NatsPublisher;
use crate::shard::ShardState;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub stream: String,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub stream: String,
    pub shards_tracked: usize,
    pub records_emitted: u64,
    pub shards: Vec<ShardReadiness>,
    pub cycles: u64,
    pub resolutions: u64,
    pub seconds_since_last_cycle: Option<u64>,
    /// Absent in local mode
    pub nats: Option<NatsStatus>,
}

/// One tracked shard as reported by `/ready`
#[derive(Debug, Serialize)]
pub struct ShardReadiness {
    pub shard_id: String,
    pub exhausted: bool,
    pub records_emitted: u64,
}

/// Publisher status as reported by `/ready`
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NatsStatus {
    pub connected: bool,
    pub messages_published: u64,
    pub publish_failures: u64,
}

impl NatsStatus {
    pub fn of(publisher: &NatsPublisher) -> Self {
        Self {
            connected: publisher.is_connected(),
            messages_published: publisher.messages_published(),
            publish_failures: publisher.publish_failures(),
        }
    }
}

/// Application state for health endpoints
#[derive(Clone)]
pub struct AppState {
    pub stream: String,
    pub shard_state: ShardState,
    pub nats: Option<Arc<NatsPublisher>>,
    pub metrics: Option<Arc<SubscriberMetrics>>,
}

/// Create the health check router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health endpoint - always returns 200 if process is running
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        stream: state.stream,
    })
}

/// Readiness endpoint - returns 200 once a tracked set is present
async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let nats = state.nats.as_deref().map(NatsStatus::of);
    let response = ready_response(&state.stream, &state.shard_state, nats);

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

fn ready_response(
    stream: &str,
    shard_state: &ShardState,
    nats: Option<NatsStatus>,
) -> ReadyResponse {
    let shards = shard_state
        .shard_ids()
        .into_iter()
        .map(|shard_id| ShardReadiness {
            exhausted: shard_state.is_exhausted(&shard_id).unwrap_or(false),
            records_emitted: shard_state.records_emitted(&shard_id).unwrap_or(0),
            shard_id,
        })
        .collect();

    ReadyResponse {
        ready: shard_state.is_active() && nats.map_or(true, |n| n.connected),
        stream: stream.to_string(),
        shards_tracked: shard_state.shard_count(),
        records_emitted: shard_state.total_records_emitted(),
        shards,
        cycles: shard_state.cycles(),
        resolutions: shard_state.resolutions(),
        seconds_since_last_cycle: shard_state.seconds_since_last_cycle(),
        nats,
    }
}

/// Metrics endpoint - returns Prometheus format metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(ref nats) = state.nats {
        metrics::set_nats_connected(nats.is_connected());
    }

    let body = state
        .metrics
        .as_ref()
        .map(|m| m.render())
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
}
