//! HTTP routes for the SFU service.
//!
//! Defines the Axum router and application state.

pub mod rooms;

use crate::observability::{health_router, HealthState};
use crate::signaling::{ws::ws_handler, SignalingServices};
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers.
pub struct AppState {
    /// Registry, workers, recorder and chat shared with every connection.
    pub services: Arc<SignalingServices>,

    pub health: Arc<HealthState>,
}

/// Build the application routes.
///
/// - `/health`, `/ready` - probes
/// - `/metrics` - Prometheus scrape endpoint
/// - `/ws` - signaling WebSocket
/// - `/api/rooms/:room_id/participants` - current peers of a room
/// - `/api/rooms/:room_id/messages` - chat history page
/// - TraceLayer for request logging
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let api_routes = Router::new()
        .route("/ws", get(ws_handler))
        .route(
            "/api/rooms/:room_id/participants",
            get(rooms::participants),
        )
        .route("/api/rooms/:room_id/messages", get(rooms::messages))
        .with_state(Arc::clone(&state));

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    health_router(Arc::clone(&state.health))
        .merge(metrics_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
}

/// `GET /metrics`
#[tracing::instrument(skip_all, name = "sfu.metrics.scrape")]
async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
