use crate::config::{ConfigSnapshot, GatewayConfig};
use crate::health::HealthService;
use crate::limiter::{AbuseGuard, SlidingWindowCounter};
use crate::metrics::Metrics;
use crate::store::StoreClient;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// Shared gateway state, cheaply cloneable.
///
/// The compiled snapshot is read lock-free via `ArcSwap`; reload mutations
/// are serialized through `reload_mu` so concurrent reload triggers (admin
/// and watcher) cannot interleave. Store connection parameters are fixed at
/// startup — a reload refreshes tiers, users and credentials only.
#[derive(Clone)]
pub struct AppState {
    config: Arc<ArcSwap<GatewayConfig>>,
    snapshot: Arc<ArcSwap<ConfigSnapshot>>,
    pub store: StoreClient,
    pub health: Arc<HealthService>,
    pub abuse: Arc<AbuseGuard>,
    pub window: Arc<SlidingWindowCounter>,
    pub metrics: Metrics,
    config_path: Arc<PathBuf>,
    /// Admin key guarding mutating admin endpoints; `None` disables auth.
    admin_key: Option<Arc<String>>,
    reload_mu: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: GatewayConfig, config_path: PathBuf) -> Result<Self> {
        let snapshot = ConfigSnapshot::compile(&config)?;

        let store = StoreClient::new(&config.store, config.breaker.clone())?;
        info!("store: pool created, url={}", config.store.url());

        let health = Arc::new(HealthService::new(
            store.clone(),
            Duration::from_millis(config.health.cache_ttl_ms),
        ));
        let abuse = Arc::new(AbuseGuard::new(store.clone(), config.abuse.clone()));
        let window = Arc::new(SlidingWindowCounter::new(store.clone()));

        let metrics = Metrics::install();
        metrics::gauge!("limiter_config_api_keys").set(snapshot.credential_count() as f64);

        let admin_key = std::env::var("ADMIN_KEY").ok().map(Arc::new);
        if admin_key.is_none() {
            info!("admin: ADMIN_KEY not set, mutating endpoints are unauthenticated");
        }

        Ok(Self {
            config: Arc::new(ArcSwap::new(Arc::new(config))),
            snapshot: Arc::new(ArcSwap::new(Arc::new(snapshot))),
            store,
            health,
            abuse,
            window,
            metrics,
            config_path: Arc::new(config_path),
            admin_key,
            reload_mu: Arc::new(Mutex::new(())),
        })
    }

    /// The current compiled snapshot. Readers see either the prior or the
    /// new snapshot, never a blend.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.snapshot.load_full()
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.load_full()
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    pub fn admin_key(&self) -> Option<&str> {
        self.admin_key.as_deref().map(|s| s.as_str())
    }

    /// Re-read and re-compile the configuration file, publishing the new
    /// snapshot atomically. A failed reload leaves the prior snapshot in
    /// force.
    pub async fn reload(&self, source: &'static str) -> Result<()> {
        let _guard = self.reload_mu.lock().await;

        let result = (|| -> Result<()> {
            let config = GatewayConfig::load(&self.config_path)?;
            let snapshot = ConfigSnapshot::compile(&config)?;

            metrics::gauge!("limiter_config_api_keys").set(snapshot.credential_count() as f64);
            self.snapshot.store(Arc::new(snapshot));
            self.config.store(Arc::new(config));
            Ok(())
        })();

        match &result {
            Ok(()) => {
                metrics::counter!(
                    "limiter_config_reloads_total",
                    "source" => source, "result" => "success",
                )
                .increment(1);
                info!("config: reloaded, source={}", source);
            }
            Err(e) => {
                metrics::counter!(
                    "limiter_config_reloads_total",
                    "source" => source, "result" => "error",
                )
                .increment(1);
                tracing::warn!(
                    "config: reload failed, prior snapshot retained, source={}, error={}",
                    source,
                    e
                );
            }
        }
        result
    }
}
