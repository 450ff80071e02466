//! # Core Types Module
//!
//! This module defines the foundational data structures used throughout the gateway:
//! the backend server record tracked by the registry, the health-probe payload
//! reported by inference backends, and the health transition events produced by
//! the hysteresis state machine.
//!
//! ## Ownership Notes
//!
//! `BackendServer` is a plain value type. The registry owns the authoritative
//! copies behind its lock; every reader works on cloned snapshots, so no reader
//! can observe a half-updated record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// One backend inference endpoint and its live routing state
///
/// `id` and `address` are immutable after registration. `healthy` transitions
/// only through the health monitor's hysteresis rule; the dispatcher mutates
/// the connection and request counters but never the health flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendServer {
    /// Unique server identifier (defaults to `ip:port` when not configured)
    pub id: String,

    /// Network location used to reach the backend
    pub address: SocketAddr,

    /// Current routability. Starts `false`: a server is never routed to before
    /// its first successful probe.
    pub healthy: bool,

    /// Consecutive failed probes since the last success
    pub consecutive_failures: u32,

    /// Consecutive successful probes since the last failure
    pub consecutive_successes: u32,

    /// Count of in-flight requests currently dispatched to this server
    pub active_connections: u64,

    /// Exponentially-weighted moving average of observed response latency.
    /// Zero until the first sample; the first sample is taken verbatim.
    pub latency_ms: f64,

    /// Most recent CPU load reported by the backend's health probe
    pub cpu_percent: f64,

    /// Most recent memory load reported by the backend's health probe
    pub memory_percent: f64,

    /// Monotonically increasing count of requests ever dispatched here
    pub total_requests: u64,

    /// Count of dispatch attempts against this server that failed
    pub failed_requests: u64,

    /// Configured routing weight, used by the weighted algorithms
    pub weight: u32,

    /// Timestamp of the last completed health probe
    pub last_health_check: Option<DateTime<Utc>>,
}

impl BackendServer {
    /// Create a new backend record in its initial (unverified, unhealthy) state
    pub fn new(id: impl Into<String>, address: SocketAddr, weight: u32) -> Self {
        Self {
            id: id.into(),
            address,
            healthy: false,
            consecutive_failures: 0,
            consecutive_successes: 0,
            active_connections: 0,
            latency_ms: 0.0,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            total_requests: 0,
            failed_requests: 0,
            weight: weight.max(1),
            last_health_check: None,
        }
    }

    /// Base URL of the backend
    pub fn url(&self) -> String {
        format!("http://{}", self.address)
    }

    /// URL of the backend's health probe endpoint
    pub fn health_url(&self) -> String {
        format!("http://{}/health", self.address)
    }

    /// URL of the backend's classification endpoint
    pub fn predict_url(&self) -> String {
        format!("http://{}/predict", self.address)
    }

    /// Fold a latency sample into the moving average
    ///
    /// `new = alpha * sample + (1 - alpha) * old`; the very first sample seeds
    /// the average directly so a cold server does not appear artificially fast.
    pub fn observe_latency(&mut self, sample_ms: f64, alpha: f64) {
        if self.latency_ms == 0.0 {
            self.latency_ms = sample_ms;
        } else {
            self.latency_ms = alpha * sample_ms + (1.0 - alpha) * self.latency_ms;
        }
    }
}

impl fmt::Display for BackendServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {})",
            self.id,
            self.address,
            if self.healthy { "healthy" } else { "unhealthy" }
        )
    }
}

/// A health-state flip produced by the hysteresis state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// The server crossed the success threshold and is routable again
    BecameHealthy,
    /// The server crossed the failure threshold and was taken out of rotation
    BecameUnhealthy,
}

/// Load figures extracted from a successful health probe
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Payload returned by a backend's `GET /health` endpoint
///
/// Backends report a status string plus a metrics block. Only the fields the
/// routing engine consumes are modeled; everything else in the payload is
/// ignored. A payload that fails to parse does not fail the probe — health is
/// decided by the HTTP status code alone.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthProbeReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub metrics: ProbeMetrics,
}

/// Metrics block within the health probe payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeMetrics {
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_percent: f64,
}

impl HealthProbeReport {
    /// Extract the load sample the registry tracks
    pub fn load_sample(&self) -> LoadSample {
        LoadSample {
            cpu_percent: self.metrics.cpu_percent,
            memory_percent: self.metrics.memory_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: &str) -> BackendServer {
        BackendServer::new(id, "127.0.0.1:5001".parse().unwrap(), 1)
    }

    #[test]
    fn test_new_server_starts_unhealthy() {
        let s = server("127.0.0.1:5001");
        assert!(!s.healthy);
        assert_eq!(s.consecutive_failures, 0);
        assert_eq!(s.consecutive_successes, 0);
        assert!(s.last_health_check.is_none());
    }

    #[test]
    fn test_urls() {
        let s = server("127.0.0.1:5001");
        assert_eq!(s.url(), "http://127.0.0.1:5001");
        assert_eq!(s.health_url(), "http://127.0.0.1:5001/health");
        assert_eq!(s.predict_url(), "http://127.0.0.1:5001/predict");
    }

    #[test]
    fn test_latency_ema_seeds_then_smooths() {
        let mut s = server("127.0.0.1:5001");
        s.observe_latency(100.0, 0.3);
        assert_eq!(s.latency_ms, 100.0);

        s.observe_latency(200.0, 0.3);
        // 0.3 * 200 + 0.7 * 100
        assert!((s.latency_ms - 130.0).abs() < 1e-9);
    }

    #[test]
    fn test_weight_floor() {
        let s = BackendServer::new("a", "127.0.0.1:5001".parse().unwrap(), 0);
        assert_eq!(s.weight, 1);
    }

    #[test]
    fn test_probe_report_tolerates_partial_payload() {
        let report: HealthProbeReport = serde_json::from_str(r#"{"status":"healthy"}"#).unwrap();
        assert_eq!(report.load_sample(), LoadSample::default());

        let report: HealthProbeReport = serde_json::from_str(
            r#"{"status":"healthy","metrics":{"cpu_percent":41.5,"memory_percent":62.0,"disk_percent":10.0}}"#,
        )
        .unwrap();
        assert_eq!(report.load_sample().cpu_percent, 41.5);
        assert_eq!(report.load_sample().memory_percent, 62.0);
    }
}
