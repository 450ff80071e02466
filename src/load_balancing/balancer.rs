//! # Load Balancer Module
//!
//! This module provides the selection strategies the dispatcher chooses backend
//! servers with, plus the manager that switches between them at runtime.
//!
//! ## Selection Contract
//!
//! Every strategy selects from a registry snapshot of the *healthy* servers,
//! ordered ascending by id. Selection is deterministic: given an identical
//! snapshot and internal state, the chosen server is explainable by the
//! algorithm's documented rule. None of the strategies consults randomness.
//!
//! ## State Ownership
//!
//! Stateful algorithms (the round-robin cursor, the weighted-round-robin credit
//! counters) own their state inside the strategy instance. Switching the active
//! algorithm constructs a fresh instance, so stale cursors or credits can never
//! bias the new algorithm's progress.

use async_trait::async_trait;
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::core::types::BackendServer;
use crate::load_balancing::strategies::LoadBalancingAlgorithm;

/// Core trait for selection strategies
///
/// `select` receives the healthy snapshot and returns an index into it. The
/// dispatcher guarantees a non-empty slice; `None` is only ever returned on an
/// empty one, and callers treat it as "nothing to route to" rather than a bug.
#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    /// Select a server from the healthy snapshot
    async fn select(&self, servers: &[BackendServer]) -> Option<usize>;

    /// The algorithm this strategy implements
    fn algorithm(&self) -> LoadBalancingAlgorithm;

    /// Reset internal state (cursor, credits) to the initial position
    async fn reset(&self);
}

/// Round-robin selection with an atomic cursor
///
/// Fairness rule: over any window of `len` consecutive calls against a stable
/// healthy set, every server is chosen exactly once.
pub struct RoundRobinStrategy {
    cursor: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SelectionStrategy for RoundRobinStrategy {
    async fn select(&self, servers: &[BackendServer]) -> Option<usize> {
        if servers.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % servers.len();
        Some(index)
    }

    fn algorithm(&self) -> LoadBalancingAlgorithm {
        LoadBalancingAlgorithm::RoundRobin
    }

    async fn reset(&self) {
        self.cursor.store(0, Ordering::Relaxed);
    }
}

/// Least-connections selection
///
/// Chooses the server with the minimum `active_connections`; ties break to the
/// ascending id, which is the snapshot order.
pub struct LeastConnectionsStrategy;

#[async_trait]
impl SelectionStrategy for LeastConnectionsStrategy {
    async fn select(&self, servers: &[BackendServer]) -> Option<usize> {
        servers
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.active_connections
                    .cmp(&b.active_connections)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|(index, _)| index)
    }

    fn algorithm(&self) -> LoadBalancingAlgorithm {
        LoadBalancingAlgorithm::LeastConnections
    }

    async fn reset(&self) {}
}

/// Latency-weighted selection
///
/// Approximates the fastest-responding backend by choosing the minimum
/// `latency_ms`; ties break to the ascending id. A server with no samples yet
/// (latency 0.0) naturally sorts first, which routes early traffic toward
/// freshly recovered servers until their average settles.
pub struct LatencyWeightedStrategy;

#[async_trait]
impl SelectionStrategy for LatencyWeightedStrategy {
    async fn select(&self, servers: &[BackendServer]) -> Option<usize> {
        servers
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.latency_ms
                    .partial_cmp(&b.latency_ms)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|(index, _)| index)
    }

    fn algorithm(&self) -> LoadBalancingAlgorithm {
        LoadBalancingAlgorithm::LatencyWeighted
    }

    async fn reset(&self) {}
}

/// Weighted round-robin selection with per-server credit counters
///
/// Each server starts a cycle with `weight` credits. Selection takes the server
/// with the highest remaining `credit / weight` ratio (ties break to the
/// ascending id) and decrements its credit; when every credit is spent the
/// cycle refills. Over a full cycle each server is therefore chosen exactly
/// `weight` times out of `sum(weights)` selections.
pub struct WeightedRoundRobinStrategy {
    credits: Mutex<HashMap<String, u32>>,
}

impl WeightedRoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            credits: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for WeightedRoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SelectionStrategy for WeightedRoundRobinStrategy {
    async fn select(&self, servers: &[BackendServer]) -> Option<usize> {
        if servers.is_empty() {
            return None;
        }

        let mut credits = self.credits.lock();

        // prune servers that left the healthy set; seed servers that joined it
        credits.retain(|id, _| servers.iter().any(|s| &s.id == id));
        for server in servers {
            credits.entry(server.id.clone()).or_insert(server.weight);
        }

        if credits.values().all(|&c| c == 0) {
            for server in servers {
                credits.insert(server.id.clone(), server.weight);
            }
        }

        let mut best: Option<(usize, f64)> = None;
        for (index, server) in servers.iter().enumerate() {
            let credit = credits[&server.id];
            if credit == 0 {
                continue;
            }
            let ratio = credit as f64 / server.weight as f64;
            // strict comparison keeps the earlier (lower-id) server on ties
            if best.map_or(true, |(_, best_ratio)| ratio > best_ratio) {
                best = Some((index, ratio));
            }
        }

        best.map(|(index, _)| {
            let id = &servers[index].id;
            *credits.get_mut(id).expect("credit seeded above") -= 1;
            index
        })
    }

    fn algorithm(&self) -> LoadBalancingAlgorithm {
        LoadBalancingAlgorithm::WeightedRoundRobin
    }

    async fn reset(&self) {
        self.credits.lock().clear();
    }
}

/// Manager that owns the active strategy and switches between algorithms
///
/// Switching installs a freshly constructed strategy instance, so every switch
/// resets per-algorithm state to its initial position.
pub struct StrategyManager {
    current: RwLock<Arc<dyn SelectionStrategy>>,
}

impl StrategyManager {
    /// Create a manager with the given initial algorithm
    pub fn new(initial: LoadBalancingAlgorithm) -> Self {
        gauge!("lb_algorithm_current", "algorithm" => initial.name()).set(1.0);
        Self {
            current: RwLock::new(Self::make_strategy(initial)),
        }
    }

    fn make_strategy(algorithm: LoadBalancingAlgorithm) -> Arc<dyn SelectionStrategy> {
        match algorithm {
            LoadBalancingAlgorithm::RoundRobin => Arc::new(RoundRobinStrategy::new()),
            LoadBalancingAlgorithm::LeastConnections => Arc::new(LeastConnectionsStrategy),
            LoadBalancingAlgorithm::LatencyWeighted => Arc::new(LatencyWeightedStrategy),
            LoadBalancingAlgorithm::WeightedRoundRobin => {
                Arc::new(WeightedRoundRobinStrategy::new())
            }
        }
    }

    /// Currently active algorithm
    pub fn current(&self) -> LoadBalancingAlgorithm {
        self.current.read().algorithm()
    }

    /// Names of every available algorithm
    pub fn available(&self) -> Vec<&'static str> {
        LoadBalancingAlgorithm::ALL.iter().map(|a| a.name()).collect()
    }

    /// Switch the active algorithm, returning the one that was replaced
    pub fn switch(&self, algorithm: LoadBalancingAlgorithm) -> LoadBalancingAlgorithm {
        let fresh = Self::make_strategy(algorithm);
        let previous = {
            let mut current = self.current.write();
            let previous = current.algorithm();
            *current = fresh;
            previous
        };

        counter!("lb_algorithm_switches_total").increment(1);
        gauge!("lb_algorithm_current", "algorithm" => previous.name()).set(0.0);
        gauge!("lb_algorithm_current", "algorithm" => algorithm.name()).set(1.0);

        debug!(
            previous = %previous,
            algorithm = %algorithm,
            "Switched load balancing algorithm"
        );
        previous
    }

    /// Select a server from the healthy snapshot using the active strategy
    pub async fn select(&self, servers: &[BackendServer]) -> Option<usize> {
        let strategy = self.current.read().clone();
        strategy.select(servers).await
    }
}
