//! # HTTP Server Module
//!
//! This module assembles the gateway's HTTP surface with the Axum framework:
//! the `/predict` dispatch entry point plus the management API, wired to the
//! shared registry, strategy manager, dispatcher, and stats reporter. It also
//! owns the health monitor's lifecycle so that serving and probing start and
//! stop together.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap},
    response::Response,
    routing::post,
    Router,
};
use bytes::Bytes;
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::admin::{AdminRouter, AdminState};
use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::dispatch::Dispatcher;
use crate::health::HealthMonitor;
use crate::load_balancing::{LoadBalancingAlgorithm, StrategyManager};
use crate::registry::ServerRegistry;
use crate::stats::StatsReporter;

/// Server runtime settings resolved from the gateway configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind_addr: SocketAddr,
}

/// Shared state for the dispatch entry point
#[derive(Clone)]
struct DispatchState {
    dispatcher: Arc<Dispatcher>,
}

/// The assembled gateway: routing engine components plus the HTTP surface
pub struct GatewayServer {
    config: GatewayConfig,
    server_config: ServerConfig,
    registry: Arc<ServerRegistry>,
    strategies: Arc<StrategyManager>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<StatsReporter>,
    metrics_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer")
            .field("bind_addr", &self.server_config.bind_addr)
            .finish_non_exhaustive()
    }
}

impl GatewayServer {
    /// Wire up the engine components from a validated configuration
    pub fn new(
        config: GatewayConfig,
        metrics_handle: Option<PrometheusHandle>,
    ) -> GatewayResult<Self> {
        let bind_addr: SocketAddr =
            format!("{}:{}", config.server.bind_address, config.server.port)
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid bind address: {}", e)))?;

        let registry = Arc::new(ServerRegistry::new(
            &config.backends,
            config.health.failure_threshold,
            config.health.success_threshold,
            config.health.ema_alpha,
        ));
        let strategies = Arc::new(StrategyManager::new(LoadBalancingAlgorithm::RoundRobin));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            strategies.clone(),
            config.dispatch.clone(),
        )?);
        let stats = Arc::new(StatsReporter::new(registry.clone(), strategies.clone()));

        Ok(Self {
            config,
            server_config: ServerConfig { bind_addr },
            registry,
            strategies,
            dispatcher,
            stats,
            metrics_handle,
        })
    }

    /// Address the server will bind to
    pub fn bind_addr(&self) -> SocketAddr {
        self.server_config.bind_addr
    }

    /// Registry handle, mainly for tests and embedders
    pub fn registry(&self) -> Arc<ServerRegistry> {
        self.registry.clone()
    }

    /// Build the complete Axum application
    ///
    /// CORS stays wide open: the statistics API is polled by a browser
    /// dashboard served from a different origin.
    pub fn app(&self) -> Router {
        let dispatch_routes = Router::new()
            .route("/predict", post(handle_predict))
            .with_state(DispatchState {
                dispatcher: self.dispatcher.clone(),
            });

        let admin_routes = AdminRouter::create_router(AdminState {
            registry: self.registry.clone(),
            strategies: self.strategies.clone(),
            stats: self.stats.clone(),
            metrics_handle: self.metrics_handle.clone(),
        });

        dispatch_routes.merge(admin_routes).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
    }

    /// Serve until the given shutdown future resolves
    ///
    /// Starts the health monitor alongside the listener. On shutdown the
    /// listener drains in-flight requests first, then the monitor is stopped
    /// through its cancellation signal.
    pub async fn start_with_shutdown<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let monitor =
            HealthMonitor::new(self.registry.clone(), self.config.health.clone())?.spawn();

        let listener = TcpListener::bind(self.server_config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Gateway listening");

        let app = self.app();
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Listener drained, stopping health monitor");
        monitor.shutdown().await;
        Ok(())
    }

    /// Serve until SIGINT/SIGTERM
    pub async fn start(self) -> GatewayResult<()> {
        self.start_with_shutdown(shutdown_signal()).await
    }
}

/// Dispatch entry point: forward the classification request to a backend
async fn handle_predict(
    State(state): State<DispatchState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let outcome = state.dispatcher.route(body, content_type).await?;

    let mut response = Response::builder()
        .status(outcome.status)
        .header("x-served-by", outcome.server_id.as_str())
        .header("x-request-id", outcome.request_id.as_str());
    if let Some(content_type) = &outcome.content_type {
        response = response.header(header::CONTENT_TYPE, content_type.as_str());
    }

    response
        .body(Body::from(outcome.body))
        .map_err(|e| GatewayError::Io {
            message: e.to_string(),
        })
}

/// Resolve when the process receives SIGINT or SIGTERM
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
