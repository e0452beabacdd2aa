use crate::error::LimiterError;
use crate::store::StoreClient;
use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Well-known store key holding the fleet-wide health record.
pub const HEALTH_KEY: &str = "health:system";

/// Global health regime. DEGRADED sheds load from shed-eligible tiers;
/// NORMAL permits the burst ceiling for everyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "DEGRADED")]
    Degraded,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Normal => write!(f, "NORMAL"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
        }
    }
}

/// The persisted health record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub updated_by: String,
    pub reason: String,
    /// Epoch seconds.
    pub updated_at: u64,
    /// When set and elapsed, the effective status reverts to NORMAL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl HealthRecord {
    pub fn effective_status(&self, now_secs: u64) -> HealthStatus {
        match self.expires_at {
            Some(expires) if now_secs >= expires => HealthStatus::Normal,
            _ => self.status,
        }
    }

    fn normal_default() -> Self {
        Self {
            status: HealthStatus::Normal,
            updated_by: "system".to_string(),
            reason: "no health record set".to_string(),
            updated_at: epoch_secs(),
            expires_at: None,
        }
    }
}

struct CachedStatus {
    status: HealthStatus,
    fetched_at: Instant,
}

/// Store-backed health state with a short per-instance cache.
///
/// Reads within the cache TTL are served locally; a write converges
/// fleet-wide within 2× the TTL. When the store is unreachable the service
/// reports NORMAL — a DEGRADED signal is only honored when observable, and
/// an unreachable store already fails the rate path open via the breaker.
pub struct HealthService {
    store: StoreClient,
    cache_ttl: Duration,
    cached: ArcSwapOption<CachedStatus>,
    /// At most one in-flight refresh per instance; concurrent readers on an
    /// expired cache reuse the stale value instead of piling on the store.
    refresh_mu: Mutex<()>,
}

impl HealthService {
    pub fn new(store: StoreClient, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache_ttl,
            cached: ArcSwapOption::const_empty(),
            refresh_mu: Mutex::new(()),
        }
    }

    /// Effective health status, cached for up to the configured TTL.
    pub async fn get(&self) -> HealthStatus {
        if let Some(cached) = self.cached.load_full() {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                return cached.status;
            }
        }

        match self.refresh_mu.try_lock() {
            Ok(_guard) => self.refresh().await,
            Err(_) => self
                .cached
                .load_full()
                .map(|c| c.status)
                .unwrap_or(HealthStatus::Normal),
        }
    }

    /// Write a new health record, optionally expiring the store key after
    /// `ttl_seconds`. The local cache converges immediately; other instances
    /// converge within their own cache TTL.
    pub async fn set(
        &self,
        status: HealthStatus,
        updated_by: &str,
        reason: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<HealthRecord, LimiterError> {
        let now = epoch_secs();
        let record = HealthRecord {
            status,
            updated_by: updated_by.to_string(),
            reason: reason.to_string(),
            updated_at: now,
            expires_at: ttl_seconds.map(|t| now + t),
        };
        let raw = serde_json::to_string(&record)
            .map_err(|e| LimiterError::Internal(format!("health record encode: {}", e)))?;

        self.store
            .set(HEALTH_KEY, &raw, ttl_seconds.map(Duration::from_secs))
            .await?;

        self.cached.store(Some(Arc::new(CachedStatus {
            status,
            fetched_at: Instant::now(),
        })));

        tracing::info!(
            "health: status set to {}, updated_by={}, reason={}",
            status,
            updated_by,
            reason
        );
        Ok(record)
    }

    /// The full persisted record, read through to the store (admin surface).
    pub async fn current_record(&self) -> Result<HealthRecord, LimiterError> {
        match self.store.get(HEALTH_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| LimiterError::Internal(format!("health record parse: {}", e))),
            None => Ok(HealthRecord::normal_default()),
        }
    }

    async fn refresh(&self) -> HealthStatus {
        let status = match self.store.get(HEALTH_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<HealthRecord>(&raw) {
                Ok(record) => {
                    metrics::counter!(
                        "limiter_health_refresh_total",
                        "result" => "success",
                    )
                    .increment(1);
                    record.effective_status(epoch_secs())
                }
                Err(e) => {
                    tracing::warn!("health: record parse failed, assuming NORMAL: {}", e);
                    metrics::counter!(
                        "limiter_health_refresh_total",
                        "result" => "error",
                    )
                    .increment(1);
                    HealthStatus::Normal
                }
            },
            Ok(None) => {
                metrics::counter!(
                    "limiter_health_refresh_total",
                    "result" => "success",
                )
                .increment(1);
                HealthStatus::Normal
            }
            Err(e) => {
                // Degraded observability: the DEGRADED signal is not honored
                // when it cannot be observed.
                tracing::warn!("health: refresh failed, assuming NORMAL: {}", e);
                metrics::counter!(
                    "limiter_health_refresh_total",
                    "result" => "error",
                )
                .increment(1);
                HealthStatus::Normal
            }
        };

        self.cached.store(Some(Arc::new(CachedStatus {
            status,
            fetched_at: Instant::now(),
        })));
        status
    }
}

/// Default `updated_by` for health writes that do not name an operator.
pub fn default_updated_by() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
