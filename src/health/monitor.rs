//! # Health Monitor Module
//!
//! Background task that periodically probes every registered backend and feeds
//! the outcomes into the registry's hysteresis state machine.
//!
//! ## Probe Cycle
//!
//! Each cycle probes all servers concurrently. A probe is one
//! `GET http://{address}/health` bounded by the configured per-probe timeout,
//! so a single unreachable backend can never delay the rest of the pool or
//! push the cycle past the interval timer. Exactly one probe per server per
//! cycle keeps health transitions serialized per server.
//!
//! A successful probe parses the backend's payload for load figures (CPU and
//! memory percent); an unparseable payload is tolerated because health is
//! decided by the HTTP status code alone.
//!
//! ## Shutdown
//!
//! The cycle loop selects on a `watch` channel. Once the shutdown signal
//! arrives, no new cycle starts; in-flight probes die at their own timeout.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::core::config::HealthConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{BackendServer, HealthProbeReport, HealthTransition, LoadSample};
use crate::registry::ServerRegistry;

/// Outcome of a single probe against a single server
struct ProbeOutcome {
    id: String,
    ok: bool,
    latency_ms: Option<f64>,
    load: Option<LoadSample>,
}

/// Periodic prober for the backend pool
pub struct HealthMonitor {
    registry: Arc<ServerRegistry>,
    client: reqwest::Client,
    config: HealthConfig,
}

impl HealthMonitor {
    /// Create a monitor over the given registry
    pub fn new(registry: Arc<ServerRegistry>, config: HealthConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .map_err(|e| GatewayError::config(format!("Failed to build probe client: {}", e)))?;

        Ok(Self {
            registry,
            client,
            config,
        })
    }

    /// Spawn the probe cycle loop and return a handle that can stop it
    pub fn spawn(self) -> HealthMonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = self.config.probe_interval;

        info!(
            probe_interval = %humantime::format_duration(interval),
            probe_timeout = %humantime::format_duration(self.config.probe_timeout),
            "Starting health monitor"
        );

        let task = tokio::spawn(self.run(shutdown_rx));

        HealthMonitorHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.probe_interval);
        // A late cycle must not cause a burst of catch-up cycles
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown_rx.changed() => {
                    info!("Health monitor shutting down");
                    break;
                }
            }
        }
    }

    /// Probe every registered server concurrently and apply the outcomes
    pub async fn run_cycle(&self) {
        let servers = self.registry.snapshot();
        if servers.is_empty() {
            return;
        }

        let probes = servers.iter().map(|server| self.probe_server(server));
        let outcomes = join_all(probes).await;

        for outcome in outcomes {
            match self.registry.update_health(
                &outcome.id,
                outcome.ok,
                outcome.latency_ms,
                outcome.load,
            ) {
                Ok(Some(HealthTransition::BecameHealthy)) => {
                    info!(server_id = %outcome.id, "Server became healthy");
                }
                Ok(Some(HealthTransition::BecameUnhealthy)) => {
                    warn!(server_id = %outcome.id, "Server became unhealthy");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(server_id = %outcome.id, error = %e, "Probe result for unknown server dropped");
                }
            }
        }
    }

    /// Probe one server, bounded by the per-probe timeout
    async fn probe_server(&self, server: &BackendServer) -> ProbeOutcome {
        let started = Instant::now();

        let attempt = async {
            let response = self.client.get(server.health_url()).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Ok::<_, reqwest::Error>((status, None));
            }
            let report = response.json::<HealthProbeReport>().await.ok();
            Ok((status, report))
        };

        match tokio::time::timeout(self.config.probe_timeout, attempt).await {
            Ok(Ok((status, Some(report)))) if status.is_success() => {
                let latency_ms = elapsed_ms(started);
                debug!(
                    server_id = %server.id,
                    latency_ms,
                    cpu_percent = report.metrics.cpu_percent,
                    "Probe succeeded"
                );
                ProbeOutcome {
                    id: server.id.clone(),
                    ok: true,
                    latency_ms: Some(latency_ms),
                    load: Some(report.load_sample()),
                }
            }
            Ok(Ok((status, None))) if status.is_success() => {
                // healthy but no usable payload; keep the previous load figures
                ProbeOutcome {
                    id: server.id.clone(),
                    ok: true,
                    latency_ms: Some(elapsed_ms(started)),
                    load: None,
                }
            }
            Ok(Ok((status, _))) => {
                debug!(server_id = %server.id, status = %status, "Probe returned non-success status");
                ProbeOutcome {
                    id: server.id.clone(),
                    ok: false,
                    latency_ms: None,
                    load: None,
                }
            }
            Ok(Err(e)) => {
                debug!(server_id = %server.id, error = %e, "Probe failed");
                ProbeOutcome {
                    id: server.id.clone(),
                    ok: false,
                    latency_ms: None,
                    load: None,
                }
            }
            Err(_) => {
                debug!(
                    server_id = %server.id,
                    timeout = %humantime::format_duration(self.config.probe_timeout),
                    "Probe timed out"
                );
                ProbeOutcome {
                    id: server.id.clone(),
                    ok: false,
                    latency_ms: None,
                    load: None,
                }
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Handle to a running health monitor
pub struct HealthMonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HealthMonitorHandle {
    /// Signal the cycle loop to stop and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    /// Abort the monitor without waiting (used when the runtime is going away)
    pub fn abort(&self) {
        self.task.abort();
    }
}
