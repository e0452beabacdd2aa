//! Integration tests for the store-backed decision components.
//!
//! These tests require Docker (via testcontainers) and are skipped in
//! environments without Docker by simply failing at container startup.
//!
//! Run with: `cargo test --test redis_integration`

use themis_gateway::config::{CircuitBreakerConfig, StoreConfig};
use themis_gateway::error::LimiterError;
use themis_gateway::health::{HealthService, HealthStatus};
use themis_gateway::limiter::{AbuseGuard, AbuseStatus, SlidingWindowCounter};
use themis_gateway::store::StoreClient;

use std::time::Duration;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};

/// Start a Redis container and return a connected client.
async fn start_store() -> (StoreClient, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379_u16.tcp())
        .start()
        .await
        .expect("failed to start redis container");

    let host = container.get_host().await.expect("get host");
    let port = container.get_host_port_ipv4(6379).await.expect("get port");

    let store_cfg = StoreConfig {
        host: host.to_string(),
        port,
        db: 0,
        // Generous deadline for CI machines; production runs single-digit ms.
        timeout: 1000,
        max_connections: 8,
    };
    // High failure threshold so the readiness loop below cannot trip the
    // breaker before Redis is accepting connections.
    let breaker_cfg = CircuitBreakerConfig {
        failure_threshold: 1000,
        success_threshold: 1,
        open_duration_secs: 1,
    };

    let client = StoreClient::new(&store_cfg, breaker_cfg).expect("create store client");

    for _ in 0..50 {
        if client.ping().await.unwrap_or(false) {
            return (client, container);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    panic!("redis container did not become ready");
}

fn abuse_guard(client: &StoreClient) -> AbuseGuard {
    AbuseGuard::new(
        client.clone(),
        themis_gateway::config::AbuseConfig {
            max_attempts: 10,
            attempt_window_secs: 300,
            block_duration_secs: 900,
        },
    )
}

#[tokio::test]
async fn test_window_burst_then_reject() {
    let (client, _container) = start_store().await;
    let window = SlidingWindowCounter::new(client);

    // Free tier in NORMAL: burst of 20 admits exactly 20.
    for i in 0..20 {
        let decision = window.hit("alice", 60, 20).await.unwrap();
        assert!(decision.allowed, "request {} should be admitted", i);
        assert_eq!(decision.limit, 20);
        assert_eq!(decision.remaining, 20 - i - 1);
    }

    let decision = window.hit("alice", 60, 20).await.unwrap();
    assert!(!decision.allowed, "21st request should be rejected");
    assert_eq!(decision.limit, 20);
    assert_eq!(decision.remaining, 0);

    let now_secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    assert!(decision.reset_at > now_secs);
    assert!(decision.reset_at <= now_secs + 61);
}

#[tokio::test]
async fn test_window_degraded_free_limit() {
    let (client, _container) = start_store().await;
    let window = SlidingWindowCounter::new(client);

    // Free tier under DEGRADED health: the effective limit drops to 2.
    assert!(window.hit("alice-degraded", 60, 2).await.unwrap().allowed);
    assert!(window.hit("alice-degraded", 60, 2).await.unwrap().allowed);
    let third = window.hit("alice-degraded", 60, 2).await.unwrap();
    assert!(!third.allowed);
    assert_eq!(third.limit, 2);
}

#[tokio::test]
async fn test_window_pro_sla_under_degraded() {
    let (client, _container) = start_store().await;
    let window = SlidingWindowCounter::new(client);

    // Pro tier keeps its base quota of 100 under DEGRADED health.
    for _ in 0..100 {
        assert!(window.hit("bob", 60, 100).await.unwrap().allowed);
    }
    let rejected = window.hit("bob", 60, 100).await.unwrap();
    assert!(!rejected.allowed);
    assert_eq!(rejected.limit, 100);
}

#[tokio::test]
async fn test_window_zero_limit_admits_nothing() {
    let (client, _container) = start_store().await;
    let window = SlidingWindowCounter::new(client);

    let decision = window.hit("suspended-user", 60, 0).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);
}

#[tokio::test]
async fn test_window_users_are_independent() {
    let (client, _container) = start_store().await;
    let window = SlidingWindowCounter::new(client);

    assert!(window.hit("user-a", 60, 1).await.unwrap().allowed);
    assert!(!window.hit("user-a", 60, 1).await.unwrap().allowed);

    assert!(window.hit("user-b", 60, 1).await.unwrap().allowed);
}

#[tokio::test]
async fn test_window_slides_after_expiry() {
    let (client, _container) = start_store().await;
    let window = SlidingWindowCounter::new(client);

    assert!(window.hit("slider", 1, 2).await.unwrap().allowed);
    assert!(window.hit("slider", 1, 2).await.unwrap().allowed);
    assert!(!window.hit("slider", 1, 2).await.unwrap().allowed);

    // After the window passes, the trimmed log frees both slots.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(window.hit("slider", 1, 2).await.unwrap().allowed);
}

#[tokio::test]
async fn test_window_concurrent_admissions_respect_limit() {
    let (client, _container) = start_store().await;
    let window = std::sync::Arc::new(SlidingWindowCounter::new(client));

    // 30 concurrent requests against a limit of 10: the script is the
    // serialization point, so exactly 10 are admitted.
    let mut set = tokio::task::JoinSet::new();
    for _ in 0..30 {
        let window = window.clone();
        set.spawn(async move { window.hit("concurrent-user", 60, 10).await });
    }

    let mut admitted = 0;
    while let Some(result) = set.join_next().await {
        if result.unwrap().unwrap().allowed {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);
}

#[tokio::test]
async fn test_abuse_clear_then_escalation() {
    let (client, _container) = start_store().await;
    let abuse = abuse_guard(&client);
    let addr: std::net::IpAddr = "203.0.113.7".parse().unwrap();

    assert!(matches!(
        abuse.check(addr).await.unwrap(),
        AbuseStatus::Clear
    ));

    // 10 invalid credentials trip the block.
    for _ in 0..10 {
        abuse.record_invalid(addr).await.unwrap();
    }

    match abuse.check(addr).await.unwrap() {
        AbuseStatus::Blocked { retry_after } => {
            let secs = retry_after.as_secs();
            assert!(secs > 880 && secs <= 900, "retry_after was {}s", secs);
        }
        AbuseStatus::Clear => panic!("source should be blocked after 10 invalid attempts"),
    }
}

#[tokio::test]
async fn test_abuse_below_threshold_stays_clear() {
    let (client, _container) = start_store().await;
    let abuse = abuse_guard(&client);
    let addr: std::net::IpAddr = "203.0.113.8".parse().unwrap();

    for _ in 0..9 {
        abuse.record_invalid(addr).await.unwrap();
    }
    assert!(matches!(
        abuse.check(addr).await.unwrap(),
        AbuseStatus::Clear
    ));
}

#[tokio::test]
async fn test_health_set_get_round_trip() {
    let (client, _container) = start_store().await;
    let health = HealthService::new(client, Duration::from_millis(2000));

    assert_eq!(health.get().await, HealthStatus::Normal);

    health
        .set(HealthStatus::Degraded, "ops", "load shed drill", None)
        .await
        .unwrap();
    // The writer's cache converges immediately.
    assert_eq!(health.get().await, HealthStatus::Degraded);

    let record = health.current_record().await.unwrap();
    assert_eq!(record.status, HealthStatus::Degraded);
    assert_eq!(record.updated_by, "ops");
    assert_eq!(record.reason, "load shed drill");
}

#[tokio::test]
async fn test_health_peer_converges_after_cache_expiry() {
    let (client, _container) = start_store().await;
    let writer = HealthService::new(client.clone(), Duration::from_millis(100));
    let reader = HealthService::new(client, Duration::from_millis(100));

    // Prime the reader's cache with NORMAL.
    assert_eq!(reader.get().await, HealthStatus::Normal);

    writer
        .set(HealthStatus::Degraded, "ops", "incident", None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(reader.get().await, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_health_store_ttl_reverts_to_normal() {
    let (client, _container) = start_store().await;
    let health = HealthService::new(client, Duration::from_millis(100));

    health
        .set(HealthStatus::Degraded, "ops", "brief drill", Some(1))
        .await
        .unwrap();
    assert_eq!(health.get().await, HealthStatus::Degraded);

    // The store key expires, so the next refresh sees no record.
    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert_eq!(health.get().await, HealthStatus::Normal);
}

#[tokio::test]
async fn test_store_outage_fails_open_and_fast() {
    // No container — nothing listens on this port.
    let store_cfg = StoreConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        db: 0,
        timeout: 100,
        max_connections: 2,
    };
    let breaker_cfg = CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 1,
        open_duration_secs: 60,
    };
    let client = StoreClient::new(&store_cfg, breaker_cfg).unwrap();
    let window = SlidingWindowCounter::new(client.clone());

    // Failures accumulate until the breaker opens.
    for _ in 0..3 {
        assert!(window.hit("anyone", 60, 10).await.is_err());
    }
    assert!(client.circuit_open());

    // With the circuit open every call fails fast — well inside 2× the
    // per-call deadline — and the caller treats it as fail-open.
    let start = std::time::Instant::now();
    let result = window.hit("anyone", 60, 10).await;
    assert!(start.elapsed() < Duration::from_millis(200));
    match result {
        Err(LimiterError::StoreUnavailable(_)) => {}
        other => panic!("expected StoreUnavailable, got {:?}", other.map(|d| d.allowed)),
    }

    // The health path degrades to NORMAL instead of erroring.
    let health = HealthService::new(client, Duration::from_millis(100));
    assert_eq!(health.get().await, HealthStatus::Normal);
}

#[tokio::test]
async fn test_client_get_set_incr() {
    let (client, _container) = start_store().await;

    assert_eq!(client.get("missing-key").await.unwrap(), None);

    client
        .set("greeting", "hello", Some(Duration::from_secs(60)))
        .await
        .unwrap();
    assert_eq!(
        client.get("greeting").await.unwrap(),
        Some("hello".to_string())
    );

    let first = client
        .incr_with_expiry("counter", Duration::from_secs(60))
        .await
        .unwrap();
    let second = client
        .incr_with_expiry("counter", Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 2);
}
