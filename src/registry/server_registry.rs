//! # Server Registry Module
//!
//! The registry is the authoritative in-memory table of backend servers and the
//! only shared mutable state in the routing engine. The health monitor, the
//! dispatcher, and the stats reporter all go through the narrow operations
//! defined here; none of them ever holds the registry lock across a network call.
//!
//! ## Concurrency Discipline
//!
//! A single `parking_lot::RwLock` guards the whole table. That is deliberate:
//! the stats-consistency invariant (total requests == sum of per-server counts
//! at one instant) requires a cross-server point-in-time view, which per-entry
//! locking cannot provide. Every operation here is short and CPU-only, so the
//! lock is never contended for longer than a few field updates.
//!
//! The `healthy` flag transitions only inside [`ServerRegistry::update_health`],
//! which the health monitor alone calls. The dispatcher's counter updates cannot
//! flip routability, so a single slow request can never cause a health flap
//! outside the probe cadence.

use std::collections::BTreeMap;

use chrono::Utc;
use metrics::gauge;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::core::config::BackendConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{BackendServer, HealthTransition, LoadSample};

/// Authoritative table of backend servers
///
/// Populated once at startup from static configuration; entries are never added
/// or removed at runtime. A `BTreeMap` keyed by server id gives every snapshot a
/// deterministic ascending-id order, which the selection strategies rely on for
/// reproducible tie-breaking.
pub struct ServerRegistry {
    servers: RwLock<BTreeMap<String, BackendServer>>,
    failure_threshold: u32,
    success_threshold: u32,
    ema_alpha: f64,
}

impl ServerRegistry {
    /// Build the registry from the configured backend pool
    pub fn new(
        backends: &[BackendConfig],
        failure_threshold: u32,
        success_threshold: u32,
        ema_alpha: f64,
    ) -> Self {
        let mut servers = BTreeMap::new();
        for backend in backends {
            let id = backend.server_id();
            servers.insert(
                id.clone(),
                BackendServer::new(id, backend.address, backend.weight),
            );
        }

        info!(server_count = servers.len(), "Server registry initialized");

        Self {
            servers: RwLock::new(servers),
            failure_threshold,
            success_threshold,
            ema_alpha,
        }
    }

    /// Number of registered servers
    pub fn len(&self) -> usize {
        self.servers.read().len()
    }

    /// Whether the registry has no servers at all
    pub fn is_empty(&self) -> bool {
        self.servers.read().is_empty()
    }

    /// Consistent point-in-time view of the healthy subset, ordered by id
    pub fn healthy_snapshot(&self) -> Vec<BackendServer> {
        self.servers
            .read()
            .values()
            .filter(|s| s.healthy)
            .cloned()
            .collect()
    }

    /// Consistent point-in-time view of every server, ordered by id
    pub fn snapshot(&self) -> Vec<BackendServer> {
        self.servers.read().values().cloned().collect()
    }

    /// Record a probe outcome and run the hysteresis state machine
    ///
    /// On success the latency sample feeds the EMA and the load sample replaces
    /// the last-reported figures. Returns `Some` when the server's `healthy`
    /// flag flipped. The health monitor is the only caller; probes are issued
    /// one per server per cycle, so transitions stay serialized per server.
    pub fn update_health(
        &self,
        id: &str,
        probe_ok: bool,
        latency_sample: Option<f64>,
        load_sample: Option<LoadSample>,
    ) -> GatewayResult<Option<HealthTransition>> {
        let mut servers = self.servers.write();
        let server = servers
            .get_mut(id)
            .ok_or_else(|| GatewayError::unknown_server(id))?;

        server.last_health_check = Some(Utc::now());

        let transition = if probe_ok {
            server.consecutive_successes += 1;
            server.consecutive_failures = 0;

            if let Some(sample_ms) = latency_sample {
                server.observe_latency(sample_ms, self.ema_alpha);
            }
            if let Some(load) = load_sample {
                server.cpu_percent = load.cpu_percent;
                server.memory_percent = load.memory_percent;
            }

            if !server.healthy && server.consecutive_successes >= self.success_threshold {
                server.healthy = true;
                Some(HealthTransition::BecameHealthy)
            } else {
                None
            }
        } else {
            server.consecutive_failures += 1;
            server.consecutive_successes = 0;

            if server.healthy && server.consecutive_failures >= self.failure_threshold {
                server.healthy = false;
                Some(HealthTransition::BecameUnhealthy)
            } else {
                None
            }
        };

        gauge!("lb_server_health", "server_id" => server.id.clone())
            .set(if server.healthy { 1.0 } else { 0.0 });

        Ok(transition)
    }

    /// Adjust a server's in-flight connection count
    ///
    /// Negative deltas saturate at zero; the count can never go below it.
    pub fn increment_active(&self, id: &str, delta: i64) -> GatewayResult<()> {
        let mut servers = self.servers.write();
        let server = servers
            .get_mut(id)
            .ok_or_else(|| GatewayError::unknown_server(id))?;

        if delta >= 0 {
            server.active_connections += delta as u64;
        } else {
            server.active_connections = server
                .active_connections
                .saturating_sub(delta.unsigned_abs());
        }
        Ok(())
    }

    /// Bump a server's completed-request counter
    pub fn increment_requests(&self, id: &str) -> GatewayResult<()> {
        let mut servers = self.servers.write();
        let server = servers
            .get_mut(id)
            .ok_or_else(|| GatewayError::unknown_server(id))?;
        server.total_requests += 1;
        Ok(())
    }

    /// Fold a dispatch round-trip into a server's latency moving average
    pub fn record_latency(&self, id: &str, sample_ms: f64) -> GatewayResult<()> {
        let mut servers = self.servers.write();
        let server = servers
            .get_mut(id)
            .ok_or_else(|| GatewayError::unknown_server(id))?;
        server.observe_latency(sample_ms, self.ema_alpha);
        Ok(())
    }

    /// Record a failed dispatch attempt against a server
    ///
    /// Touches only the failure counter. Routability stays with the health
    /// monitor's probe verdicts.
    pub fn record_failure(&self, id: &str) -> GatewayResult<()> {
        let mut servers = self.servers.write();
        let server = servers
            .get_mut(id)
            .ok_or_else(|| GatewayError::unknown_server(id))?;
        server.failed_requests += 1;
        debug!(server_id = %id, failed_requests = server.failed_requests, "Recorded dispatch failure");
        Ok(())
    }

    /// Log-and-continue helper for flows where an unknown id must not be fatal
    pub fn log_unknown(result: GatewayResult<()>, operation: &str) {
        if let Err(e) = result {
            warn!(operation, error = %e, "Registry operation on unknown server ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(n: usize) -> ServerRegistry {
        let backends: Vec<BackendConfig> = (0..n)
            .map(|i| BackendConfig {
                id: None,
                address: format!("127.0.0.1:{}", 5001 + i).parse().unwrap(),
                weight: 1,
            })
            .collect();
        ServerRegistry::new(&backends, 3, 1, 0.3)
    }

    fn probe_ok(reg: &ServerRegistry, id: &str) -> Option<HealthTransition> {
        reg.update_health(id, true, Some(10.0), Some(LoadSample::default()))
            .unwrap()
    }

    fn probe_fail(reg: &ServerRegistry, id: &str) -> Option<HealthTransition> {
        reg.update_health(id, false, None, None).unwrap()
    }

    #[test]
    fn test_servers_start_unverified() {
        let reg = registry_with(2);
        assert_eq!(reg.len(), 2);
        assert!(reg.healthy_snapshot().is_empty());
        assert_eq!(reg.snapshot().len(), 2);
    }

    #[test]
    fn test_snapshot_ordering_is_deterministic() {
        let backends = vec![
            BackendConfig {
                id: Some("zeta".into()),
                address: "127.0.0.1:5001".parse().unwrap(),
                weight: 1,
            },
            BackendConfig {
                id: Some("alpha".into()),
                address: "127.0.0.1:5002".parse().unwrap(),
                weight: 1,
            },
        ];
        let reg = ServerRegistry::new(&backends, 3, 1, 0.3);
        let ids: Vec<String> = reg.snapshot().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn test_hysteresis_failure_threshold() {
        let reg = registry_with(1);
        let id = "127.0.0.1:5001";

        assert_eq!(probe_ok(&reg, id), Some(HealthTransition::BecameHealthy));

        // F - 1 failures keep the server routable
        assert_eq!(probe_fail(&reg, id), None);
        assert_eq!(probe_fail(&reg, id), None);
        assert!(reg.snapshot()[0].healthy);

        // the F-th consecutive failure flips it
        assert_eq!(probe_fail(&reg, id), Some(HealthTransition::BecameUnhealthy));
        assert!(!reg.snapshot()[0].healthy);
        assert!(reg.healthy_snapshot().is_empty());
    }

    #[test]
    fn test_hysteresis_success_resets_failure_streak() {
        let reg = registry_with(1);
        let id = "127.0.0.1:5001";

        probe_ok(&reg, id);
        probe_fail(&reg, id);
        probe_fail(&reg, id);
        // success wipes the streak; two more failures are again below threshold
        probe_ok(&reg, id);
        assert_eq!(probe_fail(&reg, id), None);
        assert_eq!(probe_fail(&reg, id), None);
        assert!(reg.snapshot()[0].healthy);
    }

    #[test]
    fn test_recovery_threshold() {
        let backends = vec![BackendConfig {
            id: None,
            address: "127.0.0.1:5001".parse().unwrap(),
            weight: 1,
        }];
        // stricter recovery: two consecutive successes required
        let reg = ServerRegistry::new(&backends, 3, 2, 0.3);
        let id = "127.0.0.1:5001";

        assert_eq!(probe_ok(&reg, id), None);
        assert_eq!(probe_ok(&reg, id), Some(HealthTransition::BecameHealthy));

        for _ in 0..3 {
            probe_fail(&reg, id);
        }
        assert!(!reg.snapshot()[0].healthy);

        assert_eq!(probe_ok(&reg, id), None);
        assert_eq!(probe_ok(&reg, id), Some(HealthTransition::BecameHealthy));
    }

    #[test]
    fn test_latency_ema_applied_on_probe() {
        let reg = registry_with(1);
        let id = "127.0.0.1:5001";

        reg.update_health(id, true, Some(100.0), None).unwrap();
        assert_eq!(reg.snapshot()[0].latency_ms, 100.0);

        reg.update_health(id, true, Some(200.0), None).unwrap();
        assert!((reg.snapshot()[0].latency_ms - 130.0).abs() < 1e-9);
    }

    #[test]
    fn test_active_connections_saturate_at_zero() {
        let reg = registry_with(1);
        let id = "127.0.0.1:5001";

        reg.increment_active(id, 2).unwrap();
        reg.increment_active(id, -1).unwrap();
        reg.increment_active(id, -5).unwrap();
        assert_eq!(reg.snapshot()[0].active_connections, 0);
    }

    #[test]
    fn test_unknown_server_is_an_error_not_a_panic() {
        let reg = registry_with(1);
        assert!(matches!(
            reg.increment_requests("10.9.9.9:1"),
            Err(GatewayError::UnknownServer { .. })
        ));
        assert!(reg.update_health("10.9.9.9:1", true, None, None).is_err());
        assert!(reg.record_failure("10.9.9.9:1").is_err());
    }

    #[test]
    fn test_counters_accumulate() {
        let reg = registry_with(1);
        let id = "127.0.0.1:5001";

        reg.increment_requests(id).unwrap();
        reg.increment_requests(id).unwrap();
        reg.record_failure(id).unwrap();

        let server = &reg.snapshot()[0];
        assert_eq!(server.total_requests, 2);
        assert_eq!(server.failed_requests, 1);
    }
}
