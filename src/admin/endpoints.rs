//! # Management API Endpoints
//!
//! HTTP endpoints for the front end and operators: pool statistics, the
//! per-server listing, algorithm management, and Prometheus metrics. Response
//! shapes follow the statistics payload of the stats reporter so the dashboard
//! can poll `/api/server-stats` directly.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::load_balancing::{LoadBalancingAlgorithm, StrategyManager};
use crate::registry::ServerRegistry;
use crate::stats::{StatsReporter, StatsSnapshot};

/// Shared state for the management endpoints
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<ServerRegistry>,
    pub strategies: Arc<StrategyManager>,
    pub stats: Arc<StatsReporter>,
    /// Present when a Prometheus recorder was installed at startup; absent in
    /// embedded/test setups
    pub metrics_handle: Option<PrometheusHandle>,
}

/// Management API router
pub struct AdminRouter;

impl AdminRouter {
    /// Create the management router with all endpoints
    pub fn create_router(state: AdminState) -> Router {
        Router::new()
            .route("/api/server-stats", get(get_server_stats))
            .route("/api/servers", get(list_servers))
            .route("/api/algorithm", get(get_algorithm).post(set_algorithm))
            .route("/metrics", get(render_metrics))
            .route("/health", get(gateway_health))
            .with_state(state)
    }
}

// ============================================================================
// Statistics Endpoints
// ============================================================================

/// Get the full statistics snapshot for the dashboard
async fn get_server_stats(State(state): State<AdminState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

/// List all servers with their live routing state
async fn list_servers(State(state): State<AdminState>) -> Json<ServerListResponse> {
    let servers = state
        .registry
        .snapshot()
        .into_iter()
        .map(|s| ServerEntry {
            server_id: s.id,
            address: s.address.to_string(),
            healthy: s.healthy,
            latency_ms: s.latency_ms,
            cpu_percent: s.cpu_percent,
            memory_percent: s.memory_percent,
            active_connections: s.active_connections,
            weight: s.weight,
        })
        .collect();

    Json(ServerListResponse { servers })
}

// ============================================================================
// Algorithm Management Endpoints
// ============================================================================

/// Get the currently active algorithm and the available set
async fn get_algorithm(State(state): State<AdminState>) -> Json<CurrentAlgorithmResponse> {
    Json(CurrentAlgorithmResponse {
        algorithm: state.strategies.current().name().to_string(),
        available_algorithms: state
            .strategies
            .available()
            .into_iter()
            .map(String::from)
            .collect(),
    })
}

/// Switch the active algorithm by name
///
/// Switching resets the incoming algorithm's selection state, so a stale
/// cursor or credit balance never biases the fresh algorithm.
async fn set_algorithm(
    State(state): State<AdminState>,
    Json(request): Json<SwitchAlgorithmRequest>,
) -> Result<Json<SwitchAlgorithmResponse>, (StatusCode, Json<ErrorResponse>)> {
    let algorithm: LoadBalancingAlgorithm = request.algorithm.parse().map_err(|e: String| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Invalid algorithm".to_string(),
                details: Some(e),
            }),
        )
    })?;

    let previous = state.strategies.switch(algorithm);
    info!(previous = %previous, algorithm = %algorithm, "Algorithm switched via management API");

    Ok(Json(SwitchAlgorithmResponse {
        algorithm: algorithm.name().to_string(),
        previous_algorithm: previous.name().to_string(),
        status: "updated".to_string(),
    }))
}

// ============================================================================
// Observability Endpoints
// ============================================================================

/// Prometheus metrics exposition
async fn render_metrics(State(state): State<AdminState>) -> Response {
    let body = state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response()
}

/// Liveness of the gateway itself (not of the backend pool)
async fn gateway_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ServerListResponse {
    servers: Vec<ServerEntry>,
}

#[derive(Debug, Serialize)]
struct ServerEntry {
    server_id: String,
    address: String,
    healthy: bool,
    latency_ms: f64,
    cpu_percent: f64,
    memory_percent: f64,
    active_connections: u64,
    weight: u32,
}

#[derive(Debug, Serialize)]
struct CurrentAlgorithmResponse {
    algorithm: String,
    available_algorithms: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SwitchAlgorithmRequest {
    algorithm: String,
}

#[derive(Debug, Serialize)]
struct SwitchAlgorithmResponse {
    algorithm: String,
    previous_algorithm: String,
    status: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    details: Option<String>,
}
