//! Health endpoints.
//!
//! - `GET /health` - Liveness probe, plain status code
//! - `GET /ready` - Readiness probe, JSON `{"status", "workers"}`
//!
//! The service is ready once the worker pool is up and the listener is bound,
//! and stops being ready as soon as shutdown begins.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Liveness flag plus the worker count that readiness reports.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    /// Zero until startup finishes and again once shutdown begins.
    ready_workers: AtomicUsize,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Live, not ready.
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready_workers: AtomicUsize::new(0),
        }
    }

    /// Mark ready with `workers` media workers serving rooms. A count of zero
    /// leaves the service not ready.
    pub fn set_ready(&self, workers: usize) {
        self.ready_workers.store(workers, Ordering::SeqCst);
    }

    pub fn set_not_ready(&self) {
        self.ready_workers.store(0, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.workers() > 0
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.ready_workers.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Serialize)]
struct ReadinessBody {
    status: &'static str,
    workers: usize,
}

/// Router serving `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let workers = state.workers();
    if workers > 0 {
        (
            StatusCode::OK,
            Json(ReadinessBody {
                status: "ready",
                workers,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessBody {
                status: "not_ready",
                workers,
            }),
        )
    }
}
