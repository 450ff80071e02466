//! # Configuration Module
//!
//! This module handles gateway configuration: the static backend pool, the
//! health-probe cadence and hysteresis thresholds, and the dispatch timeouts.
//!
//! ## Key Features
//! - YAML configuration parsing with serde
//! - Environment variable override support (`GATEWAY_*`)
//! - Comprehensive validation with detailed error messages
//! - Sensible development defaults when no file is provided

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::core::error::{GatewayError, GatewayResult};

/// Main gateway configuration structure
///
/// Represents the complete configuration for the routing engine. Uses serde
/// for deserialization from YAML files, with environment overrides applied on
/// top of whatever was loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, port)
    pub server: ListenerConfig,

    /// Health monitoring configuration (probe cadence, hysteresis, EMA)
    pub health: HealthConfig,

    /// Dispatch configuration (forward timeout, retry budget)
    pub dispatch: DispatchConfig,

    /// Static backend pool, populated at startup and fixed for the process
    /// lifetime (scale changes require a restart)
    pub backends: Vec<BackendConfig>,
}

/// Listener settings for the gateway's own HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Address to bind the HTTP listener to
    pub bind_address: String,

    /// Port for the request and management API
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between probe cycles
    #[serde(with = "humantime_serde")]
    pub probe_interval: Duration,

    /// Per-probe timeout; must stay below the probe interval so one cycle's
    /// stragglers cannot bleed into the next
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Consecutive probe failures before a healthy server is taken out of rotation
    pub failure_threshold: u32,

    /// Consecutive probe successes before an unhealthy server is routable again
    pub success_threshold: u32,

    /// Smoothing factor for the latency moving average, in (0, 1]
    pub ema_alpha: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            failure_threshold: 3,
            success_threshold: 1,
            ema_alpha: 0.3,
        }
    }
}

/// Dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Timeout for a single forwarded classification request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Retries after a failed attempt (1 retry = 2 total attempts)
    pub max_retries: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(3),
            max_retries: 1,
        }
    }
}

/// One statically configured backend server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique identifier; defaults to the address string when omitted
    #[serde(default)]
    pub id: Option<String>,

    /// Socket address of the backend
    pub address: SocketAddr,

    /// Routing weight for the weighted algorithms
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl BackendConfig {
    /// Effective server id for this backend
    pub fn server_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }
}

impl Default for GatewayConfig {
    /// Development defaults: two local inference backends, matching the pool
    /// the original deployment falls back to when none is configured.
    fn default() -> Self {
        Self {
            server: ListenerConfig::default(),
            health: HealthConfig::default(),
            dispatch: DispatchConfig::default(),
            backends: vec![
                BackendConfig {
                    id: None,
                    address: "127.0.0.1:5001".parse().expect("valid default address"),
                    weight: 1,
                },
                BackendConfig {
                    id: None,
                    address: "127.0.0.1:5002".parse().expect("valid default address"),
                    weight: 1,
                },
            ],
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file, apply env overrides, and validate
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            GatewayError::config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let mut config: GatewayConfig = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from defaults plus environment overrides only
    pub fn from_env() -> GatewayResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Variables follow the pattern `GATEWAY_<FIELD>`, e.g. `GATEWAY_PORT=9090`
    /// or `GATEWAY_BACKEND_SERVERS=10.0.0.1:5001,10.0.0.2:5001`.
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        use std::env;

        if let Ok(addr) = env::var("GATEWAY_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(port) = env::var("GATEWAY_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_PORT: {}", e)))?;
        }

        if let Ok(interval) = env::var("GATEWAY_PROBE_INTERVAL") {
            self.health.probe_interval = humantime::parse_duration(&interval).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_PROBE_INTERVAL: {}", e))
            })?;
        }

        if let Ok(timeout) = env::var("GATEWAY_PROBE_TIMEOUT") {
            self.health.probe_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_PROBE_TIMEOUT: {}", e))
            })?;
        }

        if let Ok(threshold) = env::var("GATEWAY_FAILURE_THRESHOLD") {
            self.health.failure_threshold = threshold.parse().map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_FAILURE_THRESHOLD: {}", e))
            })?;
        }

        if let Ok(threshold) = env::var("GATEWAY_SUCCESS_THRESHOLD") {
            self.health.success_threshold = threshold.parse().map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_SUCCESS_THRESHOLD: {}", e))
            })?;
        }

        if let Ok(alpha) = env::var("GATEWAY_EMA_ALPHA") {
            self.health.ema_alpha = alpha
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_EMA_ALPHA: {}", e)))?;
        }

        if let Ok(timeout) = env::var("GATEWAY_REQUEST_TIMEOUT") {
            self.dispatch.request_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_REQUEST_TIMEOUT: {}", e))
            })?;
        }

        if let Ok(retries) = env::var("GATEWAY_MAX_RETRIES") {
            self.dispatch.max_retries = retries
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_MAX_RETRIES: {}", e)))?;
        }

        if let Ok(servers) = env::var("GATEWAY_BACKEND_SERVERS") {
            self.backends = Self::parse_backend_list(&servers)?;
        }

        Ok(())
    }

    /// Parse a `host:port,host:port` backend list (the original deployment's
    /// `BACKEND_SERVERS` format); ids default to the address string, weight to 1
    pub fn parse_backend_list(list: &str) -> GatewayResult<Vec<BackendConfig>> {
        let mut backends = Vec::new();
        for entry in list.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let address: SocketAddr = entry.parse().map_err(|e| {
                GatewayError::config(format!("Invalid backend address '{}': {}", entry, e))
            })?;
            backends.push(BackendConfig {
                id: None,
                address,
                weight: 1,
            });
        }
        Ok(backends)
    }

    /// Validate the configuration, returning a precise message on the first problem
    pub fn validate(&self) -> GatewayResult<()> {
        if self.backends.is_empty() {
            return Err(GatewayError::config("At least one backend server is required"));
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            let id = backend.server_id();
            if !seen.insert(id.clone()) {
                return Err(GatewayError::config(format!("Duplicate backend id: {}", id)));
            }
            if backend.weight == 0 {
                return Err(GatewayError::config(format!(
                    "Backend {} has zero weight; weights must be >= 1",
                    id
                )));
            }
        }

        if self.health.probe_interval.is_zero() {
            return Err(GatewayError::config("Probe interval must be non-zero"));
        }

        if self.health.probe_timeout >= self.health.probe_interval {
            return Err(GatewayError::config(format!(
                "Probe timeout ({}) must be shorter than the probe interval ({})",
                humantime::format_duration(self.health.probe_timeout),
                humantime::format_duration(self.health.probe_interval),
            )));
        }

        if self.health.failure_threshold == 0 || self.health.success_threshold == 0 {
            return Err(GatewayError::config(
                "Failure and success thresholds must be >= 1",
            ));
        }

        if !(self.health.ema_alpha > 0.0 && self.health.ema_alpha <= 1.0) {
            return Err(GatewayError::config(format!(
                "EMA alpha must be in (0, 1], got {}",
                self.health.ema_alpha
            )));
        }

        if self.dispatch.request_timeout.is_zero() {
            return Err(GatewayError::config("Request timeout must be non-zero"));
        }

        Ok(())
    }
}
