use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Deserialize a `T` that implements `Default` — treats JSON `null` the same as
/// a missing field (returns `T::default()`).  Use with:
///   `#[serde(default, deserialize_with = "deserialize_null_default")]`
fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Named quota classes. Every user references one of these.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub tiers: HashMap<String, TierConfig>,

    /// `user_id → tier name`.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub users: HashMap<String, String>,

    /// `credential → user_id`. Keys are opaque API credentials.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub api_keys: HashMap<String, String>,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub limiter: LimiterConfig,

    #[serde(default)]
    pub abuse: AbuseConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub breaker: CircuitBreakerConfig,
}

/// Per-tier quota definition. Limits are requests per window.
///
/// Invariant (enforced at load): `degraded_limit ≤ base_limit ≤ burst_limit`.
/// `window_minutes` is the on-disk unit; it is normalized to seconds when the
/// snapshot is compiled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub base_limit: u64,

    pub burst_limit: u64,

    pub degraded_limit: u64,

    #[serde(default = "default_window_minutes")]
    pub window_minutes: u64,
}

fn default_window_minutes() -> u64 {
    1
}

/// Connection parameters for the coordinating store (Redis).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_host")]
    pub host: String,

    #[serde(default = "default_store_port")]
    pub port: u16,

    #[serde(default)]
    pub db: i64,

    /// Per-call deadline in milliseconds. Exhaustion counts as a store
    /// failure and feeds the circuit breaker.
    #[serde(default = "default_store_timeout_ms")]
    pub timeout: u64,

    #[serde(default = "default_store_max_connections")]
    pub max_connections: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_store_host(),
            port: default_store_port(),
            db: 0,
            timeout: default_store_timeout_ms(),
            max_connections: default_store_max_connections(),
        }
    }
}

fn default_store_host() -> String {
    "127.0.0.1".to_string()
}

fn default_store_port() -> u16 {
    6379
}

fn default_store_timeout_ms() -> u64 {
    5
}

fn default_store_max_connections() -> usize {
    50
}

impl StoreConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Request-facing knobs of the decision pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Header carrying the credential.
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// Paths that bypass the limiter entirely (liveness probes, docs).
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            api_key_header: default_api_key_header(),
            exempt_paths: default_exempt_paths(),
        }
    }
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

fn default_exempt_paths() -> Vec<String> {
    vec!["/health".to_string(), "/docs".to_string()]
}

/// Invalid-credential suppression: counts failures per source address and
/// escalates to a temporary block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseConfig {
    /// Invalid attempts within the window that trigger a block.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u64,

    /// Rolling attempt-window TTL in seconds.
    #[serde(default = "default_attempt_window_secs")]
    pub attempt_window_secs: u64,

    /// Block TTL in seconds.
    #[serde(default = "default_block_duration_secs")]
    pub block_duration_secs: u64,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_window_secs: default_attempt_window_secs(),
            block_duration_secs: default_block_duration_secs(),
        }
    }
}

fn default_max_attempts() -> u64 {
    10
}

fn default_attempt_window_secs() -> u64 {
    300
}

fn default_block_duration_secs() -> u64 {
    900
}

/// Health-state read caching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// How long a health read is served from the in-process cache (ms).
    /// Fleet-wide convergence after a write is bounded by 2× this value.
    #[serde(default = "default_health_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: default_health_cache_ttl_ms(),
        }
    }
}

fn default_health_cache_ttl_ms() -> u64 {
    2000
}

/// Circuit breaker guarding every store call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Successes in half-open before closing again.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Seconds the breaker stays open before allowing a probe.
    #[serde(default = "default_open_duration_secs")]
    pub open_duration_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            open_duration_secs: default_open_duration_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    1
}

fn default_open_duration_secs() -> u64 {
    30
}
