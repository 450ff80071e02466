//! # Load Balancing Algorithms
//!
//! Tagged set of the selection algorithms the gateway supports. The wire names
//! (`round_robin`, `least_connections`, `latency_weighted`,
//! `weighted_round_robin`) are the same strings the management API accepts and
//! reports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The selection algorithms the gateway can switch between at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingAlgorithm {
    /// Cycle through the healthy set with a monotonic cursor
    RoundRobin,
    /// Route to the server with the fewest in-flight requests
    LeastConnections,
    /// Route to the server with the lowest observed latency average
    LatencyWeighted,
    /// Cycle through the healthy set in proportion to configured weights
    WeightedRoundRobin,
}

impl LoadBalancingAlgorithm {
    /// Every supported algorithm, in presentation order
    pub const ALL: [LoadBalancingAlgorithm; 4] = [
        Self::RoundRobin,
        Self::LeastConnections,
        Self::LatencyWeighted,
        Self::WeightedRoundRobin,
    ];

    /// Wire/config name of the algorithm
    pub fn name(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastConnections => "least_connections",
            Self::LatencyWeighted => "latency_weighted",
            Self::WeightedRoundRobin => "weighted_round_robin",
        }
    }

    /// Human-readable description for the management API
    pub fn description(&self) -> &'static str {
        match self {
            Self::RoundRobin => {
                "Distributes requests evenly across all healthy servers in a circular fashion"
            }
            Self::LeastConnections => {
                "Routes requests to the server with the fewest active connections"
            }
            Self::LatencyWeighted => {
                "Routes requests to the server with the lowest average response latency"
            }
            Self::WeightedRoundRobin => {
                "Distributes requests in proportion to configured server weights"
            }
        }
    }
}

impl fmt::Display for LoadBalancingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LoadBalancingAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(Self::RoundRobin),
            "least_connections" => Ok(Self::LeastConnections),
            "latency_weighted" => Ok(Self::LatencyWeighted),
            "weighted_round_robin" => Ok(Self::WeightedRoundRobin),
            other => Err(format!("Unknown load balancing algorithm: {}", other)),
        }
    }
}
