//! # Inference Gateway Library
//!
//! A load-balancing gateway that routes image-classification requests across a
//! pool of backend inference servers. The library provides the complete routing
//! engine: the server registry, the health monitor, the pluggable selection
//! strategies, the dispatcher, and the statistics reporter.
//!
//! ## Architecture Overview
//!
//! The gateway is built around a small set of modules:
//! - `core`: error types, configuration, and the backend data model
//! - `registry`: the authoritative, lock-protected table of backend servers
//! - `health`: the background prober and hysteresis-driven health tracking
//! - `load_balancing`: the interchangeable selection algorithms and their manager
//! - `dispatch`: request forwarding with timeout, retry, and failover
//! - `stats`: consistent statistics snapshots for the front end
//! - `admin`: the management HTTP surface (stats, algorithm switching, metrics)
//! - `gateway`: server assembly and lifecycle
//!
//! ## Concurrency Model
//!
//! Three activity classes run concurrently — the probe cycle, per-request
//! dispatch, and statistics reads. The registry is the sole shared mutable
//! resource; each of its operations is internally atomic, and no registry lock
//! is ever held across a network call, so a slow backend cannot stall
//! unrelated registry operations.

/// Core functionality: error types, configuration, and the backend data model
pub mod core;

/// Authoritative in-memory table of backend servers and their live state
pub mod registry;

/// Background health probing with hysteresis
pub mod health;

/// Selection strategies for distributing requests across the healthy pool
pub mod load_balancing;

/// Request forwarding with timeout, bounded retry, and failover
pub mod dispatch;

/// Consistent statistics snapshots for external consumption
pub mod stats;

/// Management API: statistics, algorithm switching, Prometheus metrics
pub mod admin;

/// Server assembly and lifecycle
pub mod gateway;

// Re-export commonly used types so embedders don't need the full module paths

/// Main error and result types used throughout the gateway
pub use crate::core::error::{GatewayError, GatewayResult};

/// Main configuration structure for the gateway
pub use crate::core::config::GatewayConfig;

/// The backend server record tracked by the registry
pub use crate::core::types::BackendServer;

/// The registry, strategy manager, and reporter at the heart of the engine
pub use crate::load_balancing::{LoadBalancingAlgorithm, StrategyManager};
pub use crate::registry::ServerRegistry;
pub use crate::stats::StatsReporter;

/// Server entry points
pub use crate::gateway::server::{GatewayServer, ServerConfig};
