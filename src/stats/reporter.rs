//! # Stats Reporter Module
//!
//! Produces the consistent statistics snapshot served to the front end and
//! operators. The whole snapshot is assembled from a single registry read, so
//! no server's fields can be torn mid-update relative to another's, and the
//! aggregate request count always equals the sum of the per-server counts at
//! the snapshot instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::load_balancing::StrategyManager;
use crate::registry::ServerRegistry;

/// Aggregate statistics for the whole pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Name of the currently active selection algorithm
    pub algorithm: String,
    /// Sum of every server's `request_count` at the snapshot instant
    pub total_requests: u64,
    /// Per-server statistics, ordered by server id
    pub servers: Vec<ServerStats>,
}

/// Statistics for one backend server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStats {
    pub server_id: String,
    pub address: String,
    pub healthy: bool,
    pub request_count: u64,
    pub failed_requests: u64,
    pub active_connections: u64,
    pub latency_ms: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub weight: u32,
    pub last_health_check: Option<DateTime<Utc>>,
}

/// Assembles statistics snapshots from registry state
pub struct StatsReporter {
    registry: Arc<ServerRegistry>,
    strategies: Arc<StrategyManager>,
}

impl StatsReporter {
    pub fn new(registry: Arc<ServerRegistry>, strategies: Arc<StrategyManager>) -> Self {
        Self {
            registry,
            strategies,
        }
    }

    /// One consistent snapshot of the pool plus aggregate counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let servers = self.registry.snapshot();
        let total_requests = servers.iter().map(|s| s.total_requests).sum();

        StatsSnapshot {
            algorithm: self.strategies.current().name().to_string(),
            total_requests,
            servers: servers
                .into_iter()
                .map(|s| ServerStats {
                    server_id: s.id,
                    address: s.address.to_string(),
                    healthy: s.healthy,
                    request_count: s.total_requests,
                    failed_requests: s.failed_requests,
                    active_connections: s.active_connections,
                    latency_ms: round2(s.latency_ms),
                    cpu_percent: round2(s.cpu_percent),
                    memory_percent: round2(s.memory_percent),
                    weight: s.weight,
                    last_health_check: s.last_health_check,
                })
                .collect(),
        }
    }
}

/// Round to two decimals for presentation, matching the dashboard's precision
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
