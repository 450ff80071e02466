//! # Dispatch Integration Tests
//!
//! End-to-end tests of the dispatcher against real HTTP backends (wiremock):
//! failover across the pool, fairness of round-robin distribution, and the
//! stats-consistency invariant under concurrent dispatch and probing.

use bytes::Bytes;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use inference_gateway::core::config::{BackendConfig, DispatchConfig, HealthConfig};
use inference_gateway::dispatch::Dispatcher;
use inference_gateway::health::HealthMonitor;
use inference_gateway::{GatewayError, LoadBalancingAlgorithm, ServerRegistry, StatsReporter, StrategyManager};

fn backend(id: &str, address: SocketAddr) -> BackendConfig {
    BackendConfig {
        id: Some(id.to_string()),
        address,
        weight: 1,
    }
}

fn dispatch_config() -> DispatchConfig {
    DispatchConfig {
        request_timeout: Duration::from_millis(500),
        max_retries: 1,
    }
}

/// Registry with every backend already verified healthy by a probe verdict
fn healthy_registry(backends: &[BackendConfig]) -> Arc<ServerRegistry> {
    let registry = Arc::new(ServerRegistry::new(backends, 3, 1, 0.3));
    for server in registry.snapshot() {
        registry
            .update_health(&server.id, true, Some(5.0), None)
            .unwrap();
    }
    registry
}

async fn mock_backend(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({"label": "cat"})))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_failover_retries_a_different_server() {
    let failing = mock_backend(500).await;
    let ok_one = mock_backend(200).await;
    let ok_two = mock_backend(200).await;

    // ids sort the failing backend first so round-robin picks it initially
    let backends = vec![
        backend("a-failing", *failing.address()),
        backend("b-ok", *ok_one.address()),
        backend("c-ok", *ok_two.address()),
    ];
    let registry = healthy_registry(&backends);
    let strategies = Arc::new(StrategyManager::new(LoadBalancingAlgorithm::RoundRobin));
    let dispatcher = Dispatcher::new(registry.clone(), strategies, dispatch_config()).unwrap();

    let outcome = dispatcher
        .route(Bytes::from_static(b"{}"), Some("application/json"))
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert_ne!(outcome.server_id, "a-failing");
    assert!(outcome.status.is_success());

    // the failed attempt is recorded, not hidden; health is untouched
    let snapshot = registry.snapshot();
    let failed = snapshot.iter().find(|s| s.id == "a-failing").unwrap();
    assert_eq!(failed.failed_requests, 1);
    assert!(failed.healthy, "dispatch failures must not flip health");
}

#[tokio::test]
async fn test_round_robin_serves_every_backend_once_per_window() {
    let one = mock_backend(200).await;
    let two = mock_backend(200).await;
    let three = mock_backend(200).await;

    let backends = vec![
        backend("a", *one.address()),
        backend("b", *two.address()),
        backend("c", *three.address()),
    ];
    let registry = healthy_registry(&backends);
    let strategies = Arc::new(StrategyManager::new(LoadBalancingAlgorithm::RoundRobin));
    let dispatcher = Dispatcher::new(registry, strategies, dispatch_config()).unwrap();

    let mut served: HashMap<String, u32> = HashMap::new();
    for _ in 0..6 {
        let outcome = dispatcher.route(Bytes::new(), None).await.unwrap();
        *served.entry(outcome.server_id).or_default() += 1;
    }

    assert_eq!(served.len(), 3);
    for (_, count) in served {
        assert_eq!(count, 2);
    }
}

#[tokio::test]
async fn test_no_healthy_servers_makes_no_network_call() {
    let untouched = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&untouched)
        .await;

    // never probed: fail-closed means not routable
    let backends = vec![backend("a", *untouched.address())];
    let registry = Arc::new(ServerRegistry::new(&backends, 3, 1, 0.3));
    let strategies = Arc::new(StrategyManager::new(LoadBalancingAlgorithm::RoundRobin));
    let dispatcher = Dispatcher::new(registry, strategies, dispatch_config()).unwrap();

    let err = dispatcher.route(Bytes::new(), None).await.unwrap_err();
    assert!(matches!(err, GatewayError::NoHealthyServers));
    // wiremock verifies expect(0) on drop
}

#[tokio::test]
async fn test_stats_stay_consistent_under_concurrent_load() {
    let one = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"label": "dog"})))
        .mount(&one)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "healthy",
            "metrics": {"cpu_percent": 10.0, "memory_percent": 20.0}
        })))
        .mount(&one)
        .await;
    let two = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"label": "dog"})))
        .mount(&two)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "healthy",
            "metrics": {"cpu_percent": 30.0, "memory_percent": 40.0}
        })))
        .mount(&two)
        .await;

    let backends = vec![backend("a", *one.address()), backend("b", *two.address())];
    let registry = healthy_registry(&backends);
    let strategies = Arc::new(StrategyManager::new(LoadBalancingAlgorithm::RoundRobin));
    let dispatcher = Arc::new(
        Dispatcher::new(registry.clone(), strategies.clone(), dispatch_config()).unwrap(),
    );
    let reporter = Arc::new(StatsReporter::new(registry.clone(), strategies));
    let monitor = Arc::new(
        HealthMonitor::new(
            registry.clone(),
            HealthConfig {
                probe_interval: Duration::from_millis(50),
                probe_timeout: Duration::from_millis(40),
                failure_threshold: 3,
                success_threshold: 1,
                ema_alpha: 0.3,
            },
        )
        .unwrap(),
    );

    let mut tasks = Vec::new();

    // concurrent dispatchers
    for _ in 0..8 {
        let dispatcher = dispatcher.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                dispatcher.route(Bytes::new(), None).await.unwrap();
            }
        }));
    }

    // concurrent probe cycles
    {
        let monitor = monitor.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                monitor.run_cycle().await;
            }
        }));
    }

    // concurrent stats reads: the invariant must hold at every instant
    {
        let reporter = reporter.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                let snapshot = reporter.snapshot();
                let sum: u64 = snapshot.servers.iter().map(|s| s.request_count).sum();
                assert_eq!(snapshot.total_requests, sum);
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    let snapshot = reporter.snapshot();
    assert_eq!(snapshot.total_requests, 80);
    assert_eq!(
        snapshot.total_requests,
        snapshot.servers.iter().map(|s| s.request_count).sum::<u64>()
    );
    // no request left marked in-flight
    assert!(snapshot.servers.iter().all(|s| s.active_connections == 0));
}
