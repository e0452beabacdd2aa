use super::snapshot::{credential_format_ok, ConfigSnapshot};
use super::GatewayConfig;
use crate::health::HealthStatus;
use std::path::Path;

const SAMPLE: &str = r#"
[tiers.free]
base_limit = 10
burst_limit = 20
degraded_limit = 2
window_minutes = 1

[tiers.pro]
base_limit = 100
burst_limit = 150
degraded_limit = 100
window_minutes = 1

[tiers.enterprise]
base_limit = 1000
burst_limit = 1000
degraded_limit = 1000
window_minutes = 1

[users]
alice = "free"
bob = "pro"
carol = "enterprise"

[api_keys]
"free-key-0001" = "alice"
"pro-key-00001" = "bob"
"ent-key-00001" = "carol"
"#;

fn sample_config() -> GatewayConfig {
    toml::from_str(SAMPLE).unwrap()
}

#[test]
fn test_load_toml_config() {
    let cfg = GatewayConfig::load(Path::new("config.toml")).unwrap();
    assert!(!cfg.tiers.is_empty());
    assert!(!cfg.store.host.is_empty());
}

#[test]
fn test_parse_sample() {
    let cfg = sample_config();
    assert_eq!(cfg.tiers.len(), 3);
    assert_eq!(cfg.users.len(), 3);
    assert_eq!(cfg.api_keys.len(), 3);
    assert_eq!(cfg.tiers["free"].burst_limit, 20);
    assert_eq!(cfg.users["bob"], "pro");
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_deserialize_defaults() {
    let cfg = sample_config();
    assert_eq!(cfg.store.host, "127.0.0.1");
    assert_eq!(cfg.store.port, 6379);
    assert_eq!(cfg.store.db, 0);
    assert_eq!(cfg.store.timeout, 5);
    assert_eq!(cfg.store.max_connections, 50);
    assert_eq!(cfg.limiter.api_key_header, "X-API-Key");
    assert_eq!(cfg.limiter.exempt_paths, vec!["/health", "/docs"]);
    assert_eq!(cfg.abuse.max_attempts, 10);
    assert_eq!(cfg.abuse.attempt_window_secs, 300);
    assert_eq!(cfg.abuse.block_duration_secs, 900);
    assert_eq!(cfg.health.cache_ttl_ms, 2000);
    assert_eq!(cfg.breaker.failure_threshold, 5);
    assert_eq!(cfg.breaker.success_threshold, 1);
    assert_eq!(cfg.breaker.open_duration_secs, 30);
}

#[test]
fn test_store_url() {
    let cfg = sample_config();
    assert_eq!(cfg.store.url(), "redis://127.0.0.1:6379/0");
}

#[test]
fn test_validate_degraded_above_base_fails() {
    let mut cfg = sample_config();
    cfg.tiers.get_mut("free").unwrap().degraded_limit = 50;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_base_above_burst_fails() {
    let mut cfg = sample_config();
    cfg.tiers.get_mut("pro").unwrap().base_limit = 200;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_zero_window_fails() {
    let mut cfg = sample_config();
    cfg.tiers.get_mut("free").unwrap().window_minutes = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_unknown_tier_fails() {
    let mut cfg = sample_config();
    cfg.users.insert("dave".into(), "platinum".into());
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_api_key_unknown_user_fails() {
    let mut cfg = sample_config();
    cfg.api_keys.insert("orphan-key-001".into(), "nobody".into());
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_short_api_key_fails() {
    let mut cfg = sample_config();
    cfg.api_keys.insert("short".into(), "alice".into());
    assert!(cfg.validate().is_err());
}

#[test]
fn test_credential_format_rules() {
    assert!(credential_format_ok("free-key-0001"));
    assert!(credential_format_ok("12345678")); // exactly 8
    assert!(credential_format_ok(&"k".repeat(128)));
    // Printable ASCII includes space.
    assert!(credential_format_ok("has a space!"));

    assert!(!credential_format_ok(""));
    assert!(!credential_format_ok("1234567")); // 7 chars
    assert!(!credential_format_ok(&"k".repeat(129)));
    assert!(!credential_format_ok("ünïcode-key"));
    assert!(!credential_format_ok("tab\tkey-0001"));
}

#[test]
fn test_snapshot_resolution() {
    let snapshot = ConfigSnapshot::compile(&sample_config()).unwrap();

    let user = snapshot.resolve("pro-key-00001").unwrap();
    assert_eq!(user.user_id, "bob");
    assert_eq!(user.tier.name, "pro");

    assert!(snapshot.resolve("unknown-key-0001").is_none());
    // Wrong format misses without a map lookup.
    assert!(snapshot.resolve("short").is_none());
    assert!(snapshot.resolve("").is_none());
}

#[test]
fn test_window_normalized_to_seconds() {
    let mut cfg = sample_config();
    cfg.tiers.get_mut("free").unwrap().window_minutes = 2;
    let snapshot = ConfigSnapshot::compile(&cfg).unwrap();
    assert_eq!(snapshot.tier("free").unwrap().window_seconds, 120);
}

#[test]
fn test_effective_limit_normal_is_burst() {
    let snapshot = ConfigSnapshot::compile(&sample_config()).unwrap();
    let free = snapshot.tier("free").unwrap();
    let pro = snapshot.tier("pro").unwrap();
    let enterprise = snapshot.tier("enterprise").unwrap();

    assert_eq!(free.effective_limit(HealthStatus::Normal), 20);
    assert_eq!(pro.effective_limit(HealthStatus::Normal), 150);
    assert_eq!(enterprise.effective_limit(HealthStatus::Normal), 1000);
}

#[test]
fn test_effective_limit_degraded_sheds_free_only() {
    let snapshot = ConfigSnapshot::compile(&sample_config()).unwrap();
    let free = snapshot.tier("free").unwrap();
    let pro = snapshot.tier("pro").unwrap();
    let enterprise = snapshot.tier("enterprise").unwrap();

    // The shed-eligible tier (degraded < base) drops to its degraded limit;
    // paid tiers fall back to base, never below.
    assert_eq!(free.effective_limit(HealthStatus::Degraded), 2);
    assert_eq!(pro.effective_limit(HealthStatus::Degraded), 100);
    assert_eq!(enterprise.effective_limit(HealthStatus::Degraded), 1000);
}

#[test]
fn test_zero_limit_tier_is_valid() {
    let mut cfg = sample_config();
    cfg.tiers.insert(
        "suspended".into(),
        super::TierConfig {
            base_limit: 0,
            burst_limit: 0,
            degraded_limit: 0,
            window_minutes: 1,
        },
    );
    let snapshot = ConfigSnapshot::compile(&cfg).unwrap();
    // A limit of 0 admits nothing, even in NORMAL.
    assert_eq!(
        snapshot.tier("suspended").unwrap().effective_limit(HealthStatus::Normal),
        0
    );
}

#[test]
fn test_exempt_paths() {
    let snapshot = ConfigSnapshot::compile(&sample_config()).unwrap();
    assert!(snapshot.is_exempt("/health"));
    assert!(snapshot.is_exempt("/docs"));
    assert!(!snapshot.is_exempt("/api/v1/things"));

    let mut cfg = sample_config();
    cfg.limiter.exempt_paths = vec!["/status".into()];
    let snapshot = ConfigSnapshot::compile(&cfg).unwrap();
    assert!(snapshot.is_exempt("/status"));
    assert!(!snapshot.is_exempt("/health"));
}

#[test]
fn test_env_overrides() {
    let toml_str = r#"
[store]
host = "redis.internal"
port = 6380
"#;
    let tmp = std::env::temp_dir().join("themis_test_env_override.toml");
    std::fs::write(&tmp, toml_str).unwrap();

    std::env::set_var("STORE_HOST", "10.1.2.3");
    std::env::set_var("STORE_TIMEOUT", "25");
    let cfg = GatewayConfig::load(&tmp).unwrap();
    std::env::remove_var("STORE_HOST");
    std::env::remove_var("STORE_TIMEOUT");
    std::fs::remove_file(&tmp).ok();

    assert_eq!(cfg.store.host, "10.1.2.3");
    assert_eq!(cfg.store.timeout, 25);
    // Non-overridden file values survive.
    assert_eq!(cfg.store.port, 6380);
}

#[test]
fn test_load_json_config() {
    let json = r#"{
        "tiers": {
            "free": {"base_limit": 10, "burst_limit": 20, "degraded_limit": 2, "window_minutes": 1}
        },
        "users": {"alice": "free"},
        "api_keys": {"free-key-0001": "alice"}
    }"#;
    let tmp = std::env::temp_dir().join("themis_test_config.json");
    std::fs::write(&tmp, json).unwrap();
    let cfg = GatewayConfig::load(&tmp).unwrap();
    std::fs::remove_file(&tmp).ok();

    assert_eq!(cfg.tiers.len(), 1);
    assert_eq!(cfg.api_keys["free-key-0001"], "alice");
}

#[test]
fn test_unsupported_format() {
    let tmp = std::env::temp_dir().join("themis_test.yml");
    std::fs::write(&tmp, "key: value").unwrap();
    assert!(GatewayConfig::load(&tmp).is_err());
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_zero_store_timeout_fails() {
    let mut cfg = sample_config();
    cfg.store.timeout = 0;
    assert!(cfg.validate().is_err());
}
