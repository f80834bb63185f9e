//! Liveness, readiness and a JSON metrics snapshot on their own listener.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use catalog::health::HealthSnapshot;
use catalog::{EventPublisher, Health};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct MetricsState {
    pub health: Arc<Health>,
    pub publisher: Arc<EventPublisher>,
}

#[derive(Serialize)]
pub struct ProbeResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub health: HealthSnapshot,
    pub publisher_backlog: usize,
}

pub fn build_metrics_router(state: MetricsState) -> Router {
    Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health/live
async fn live(State(state): State<MetricsState>) -> (StatusCode, Json<ProbeResponse>) {
    probe(state.health.is_live(), "live", "not_live")
}

/// GET /health/ready
async fn ready(State(state): State<MetricsState>) -> (StatusCode, Json<ProbeResponse>) {
    probe(state.health.is_ready(), "ready", "not_ready")
}

/// GET /metrics
async fn metrics(State(state): State<MetricsState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        health: state.health.snapshot(),
        publisher_backlog: state.publisher.backlog(),
    })
}

fn probe(ok: bool, up: &'static str, down: &'static str) -> (StatusCode, Json<ProbeResponse>) {
    if ok {
        (StatusCode::OK, Json(ProbeResponse { status: up }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ProbeResponse { status: down }),
        )
    }
}
