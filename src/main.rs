//! # Inference Gateway - Main Entry Point
//!
//! Standalone routing service for a pool of image-classification backends.
//! Startup sequence: initialize observability, load and validate configuration,
//! wire the routing engine, then serve until SIGINT/SIGTERM with a graceful
//! drain of in-flight requests and a clean stop of the health monitor.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{error, info};

use inference_gateway::{GatewayConfig, GatewayResult, GatewayServer};

#[tokio::main]
async fn main() -> GatewayResult<()> {
    init_observability();

    info!("🚀 Starting inference gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = install_metrics_recorder();
    let config = load_config().await?;

    info!(
        backends = config.backends.len(),
        bind_address = %config.server.bind_address,
        port = config.server.port,
        "Configuration loaded"
    );
    for backend in &config.backends {
        info!(
            server_id = %backend.server_id(),
            address = %backend.address,
            weight = backend.weight,
            "Registered backend"
        );
    }

    let server = match GatewayServer::new(config, metrics_handle) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start gateway: {}", e);
            std::process::exit(1);
        }
    };

    info!("🌐 Gateway ready on {}", server.bind_addr());
    info!("📊 Stats available on {}/api/server-stats", server.bind_addr());

    server.start().await?;

    info!("✅ Gateway shutdown complete");
    Ok(())
}

/// Initialize logging and tracing
fn init_observability() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inference_gateway=info,tower_http=warn".into()),
        )
        .init();
}

/// Install the Prometheus recorder backing `/metrics`
///
/// A failure here (e.g. a recorder already installed by an embedding process)
/// degrades to running without exposition rather than refusing to start.
fn install_metrics_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!("Failed to install metrics recorder, /metrics will be empty: {}", e);
            None
        }
    }
}

/// Load configuration from `GATEWAY_CONFIG_PATH`, or fall back to defaults
/// plus environment overrides when no file is configured
async fn load_config() -> GatewayResult<GatewayConfig> {
    match std::env::var("GATEWAY_CONFIG_PATH") {
        Ok(path) => {
            info!(config_path = %path, "Loading configuration file");
            GatewayConfig::load_from_file(&path).await
        }
        Err(_) => {
            info!("GATEWAY_CONFIG_PATH not set, using defaults and environment overrides");
            GatewayConfig::from_env()
        }
    }
}
