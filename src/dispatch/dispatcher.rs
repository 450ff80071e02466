//! # Dispatcher Module
//!
//! Request forwarding with failover. The dispatcher takes a healthy-servers
//! snapshot, asks the active strategy for a candidate, forwards the
//! classification request with a bounded timeout, and updates the registry
//! counters according to the outcome.
//!
//! ## Failure Semantics
//!
//! A timeout, a connect error, or a 5xx response is a failed *attempt*: the
//! failure is recorded against the server and a different healthy candidate is
//! tried, sequentially, up to the configured retry budget. A 4xx response is
//! an *answered* request — the backend rejected the input — and is passed
//! through to the caller verbatim; retrying a request-shaped error against
//! another replica cannot change the answer.
//!
//! The dispatcher never mutates `healthy`. A slow or failing request only
//! bumps counters; taking a server out of rotation stays with the health
//! monitor's probe cadence.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use bytes::Bytes;
use metrics::counter;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::config::DispatchConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::BackendServer;
use crate::load_balancing::StrategyManager;
use crate::registry::ServerRegistry;

/// A completed dispatch, annotated with the serving server
#[derive(Debug)]
pub struct DispatchOutcome {
    /// Gateway-assigned request id (echoed as `x-request-id`)
    pub request_id: String,
    /// Id of the server that produced the response (echoed as `x-served-by`)
    pub server_id: String,
    /// Status code returned by the backend
    pub status: StatusCode,
    /// Response body, passed through opaquely
    pub body: Bytes,
    /// Content type reported by the backend
    pub content_type: Option<String>,
    /// Round-trip time of the winning attempt
    pub latency_ms: f64,
    /// Total attempts made, including the winning one
    pub attempts: u32,
}

/// Response of a single forward attempt that the backend actually answered
struct ForwardResponse {
    status: StatusCode,
    body: Bytes,
    content_type: Option<String>,
}

/// Routes classification requests across the healthy backend pool
pub struct Dispatcher {
    registry: Arc<ServerRegistry>,
    strategies: Arc<StrategyManager>,
    client: reqwest::Client,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher over the given registry and strategy manager
    pub fn new(
        registry: Arc<ServerRegistry>,
        strategies: Arc<StrategyManager>,
        config: DispatchConfig,
    ) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::config(format!("Failed to build dispatch client: {}", e)))?;

        Ok(Self {
            registry,
            strategies,
            client,
            config,
        })
    }

    /// Route a classification request to a backend, failing over on errors
    ///
    /// Returns `NoHealthyServers` without touching the network when the pool is
    /// empty, and `AllAttemptsFailed` once the retry budget is exhausted.
    pub async fn route(&self, body: Bytes, content_type: Option<&str>) -> GatewayResult<DispatchOutcome> {
        let request_id = Uuid::new_v4().to_string();
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut tried: HashSet<String> = HashSet::new();
        let mut attempts = 0u32;

        while attempts < max_attempts {
            let candidates: Vec<BackendServer> = self
                .registry
                .healthy_snapshot()
                .into_iter()
                .filter(|s| !tried.contains(&s.id))
                .collect();

            let Some(index) = self.strategies.select(&candidates).await else {
                // empty pool: a definite service-unavailable on the first
                // attempt, otherwise everything viable has been tried
                if attempts == 0 {
                    return Err(GatewayError::NoHealthyServers);
                }
                break;
            };
            let server = candidates[index].clone();
            attempts += 1;

            ServerRegistry::log_unknown(
                self.registry.increment_active(&server.id, 1),
                "increment_active",
            );
            let started = Instant::now();
            let result = self.forward(&server, body.clone(), content_type).await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            ServerRegistry::log_unknown(
                self.registry.increment_active(&server.id, -1),
                "increment_active",
            );

            match result {
                Ok(response) => {
                    ServerRegistry::log_unknown(
                        self.registry.increment_requests(&server.id),
                        "increment_requests",
                    );
                    ServerRegistry::log_unknown(
                        self.registry.record_latency(&server.id, latency_ms),
                        "record_latency",
                    );

                    counter!(
                        "lb_requests_total",
                        "server_id" => server.id.clone(),
                        "algorithm" => self.strategies.current().name()
                    )
                    .increment(1);

                    debug!(
                        request_id = %request_id,
                        server_id = %server.id,
                        status = %response.status,
                        latency_ms,
                        attempts,
                        "Request dispatched"
                    );

                    return Ok(DispatchOutcome {
                        request_id,
                        server_id: server.id,
                        status: response.status,
                        body: response.body,
                        content_type: response.content_type,
                        latency_ms,
                        attempts,
                    });
                }
                Err(e) => {
                    ServerRegistry::log_unknown(
                        self.registry.record_failure(&server.id),
                        "record_failure",
                    );
                    counter!("lb_dispatch_failures_total", "server_id" => server.id.clone())
                        .increment(1);

                    warn!(
                        request_id = %request_id,
                        server_id = %server.id,
                        error = %e,
                        attempt = attempts,
                        "Dispatch attempt failed"
                    );
                    tried.insert(server.id);
                }
            }
        }

        Err(GatewayError::AllAttemptsFailed { attempts })
    }

    /// Forward the request to one backend
    ///
    /// 5xx responses are mapped to an error so the caller's retry loop treats
    /// them like transport failures.
    async fn forward(
        &self,
        server: &BackendServer,
        body: Bytes,
        content_type: Option<&str>,
    ) -> GatewayResult<ForwardResponse> {
        let mut request = self.client.post(server.predict_url()).body(body);
        if let Some(content_type) = content_type {
            request = request.header(reqwest::header::CONTENT_TYPE, content_type);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout {
                    timeout_ms: self.config.request_timeout.as_millis() as u64,
                }
            } else {
                GatewayError::from(e)
            }
        })?;
        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            return Err(GatewayError::HttpClient {
                message: format!("backend {} returned {}", server.id, status),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response.bytes().await.map_err(GatewayError::from)?;

        Ok(ForwardResponse {
            status,
            body,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BackendConfig;
    use crate::load_balancing::LoadBalancingAlgorithm;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dispatcher_over(addresses: &[SocketAddr]) -> (Dispatcher, Arc<ServerRegistry>) {
        let backends: Vec<BackendConfig> = addresses
            .iter()
            .map(|&address| BackendConfig {
                id: None,
                address,
                weight: 1,
            })
            .collect();
        let registry = Arc::new(ServerRegistry::new(&backends, 3, 1, 0.3));
        // probe verdict: every configured server is routable
        for server in registry.snapshot() {
            registry.update_health(&server.id, true, Some(5.0), None).unwrap();
        }
        let strategies = Arc::new(StrategyManager::new(LoadBalancingAlgorithm::RoundRobin));
        let config = DispatchConfig {
            request_timeout: Duration::from_millis(500),
            max_retries: 1,
        };
        let dispatcher = Dispatcher::new(registry.clone(), strategies, config).unwrap();
        (dispatcher, registry)
    }

    #[tokio::test]
    async fn test_successful_dispatch_updates_counters() {
        let backend = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"label": "cat", "confidence": 0.93})),
            )
            .mount(&backend)
            .await;

        let (dispatcher, registry) = dispatcher_over(&[*backend.address()]);
        let outcome = dispatcher
            .route(Bytes::from_static(b"{}"), Some("application/json"))
            .await
            .unwrap();

        assert_eq!(outcome.status, StatusCode::OK);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.server_id, backend.address().to_string());

        let server = &registry.snapshot()[0];
        assert_eq!(server.total_requests, 1);
        assert_eq!(server.failed_requests, 0);
        assert_eq!(server.active_connections, 0);
        assert!(server.latency_ms > 0.0);
    }

    #[tokio::test]
    async fn test_client_errors_pass_through_without_retry() {
        let backend = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({"error": "not an image"})))
            .expect(1)
            .mount(&backend)
            .await;

        let (dispatcher, registry) = dispatcher_over(&[*backend.address()]);
        let outcome = dispatcher.route(Bytes::from_static(b"junk"), None).await.unwrap();

        assert_eq!(outcome.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(outcome.attempts, 1);
        // the backend answered; that is a served request, not a failure
        assert_eq!(registry.snapshot()[0].total_requests, 1);
        assert_eq!(registry.snapshot()[0].failed_requests, 0);
    }

    #[tokio::test]
    async fn test_no_healthy_servers_short_circuits() {
        let backend = MockServer::start().await;
        // zero requests may reach the backend
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&backend)
            .await;

        let backends = vec![BackendConfig {
            id: None,
            address: *backend.address(),
            weight: 1,
        }];
        // never probed healthy: fail-closed
        let registry = Arc::new(ServerRegistry::new(&backends, 3, 1, 0.3));
        let strategies = Arc::new(StrategyManager::new(LoadBalancingAlgorithm::RoundRobin));
        let dispatcher = Dispatcher::new(
            registry,
            strategies,
            DispatchConfig {
                request_timeout: Duration::from_millis(500),
                max_retries: 1,
            },
        )
        .unwrap();

        let err = dispatcher.route(Bytes::new(), None).await.unwrap_err();
        assert!(matches!(err, GatewayError::NoHealthyServers));
    }

    #[tokio::test]
    async fn test_all_attempts_failed_after_retry_budget() {
        let failing = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&failing)
            .await;

        let (dispatcher, registry) = dispatcher_over(&[*failing.address()]);
        let err = dispatcher.route(Bytes::new(), None).await.unwrap_err();

        // one server, one retry budget: the retry has nowhere else to go
        assert!(matches!(err, GatewayError::AllAttemptsFailed { attempts: 1 }));
        assert_eq!(registry.snapshot()[0].failed_requests, 1);
        assert_eq!(registry.snapshot()[0].total_requests, 0);
    }
}
