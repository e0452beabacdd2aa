pub mod snapshot;
pub mod types;

#[cfg(test)]
mod tests;

pub use snapshot::{credential_format_ok, CompiledTier, ConfigSnapshot, ResolvedUser};
pub use types::*;

use anyhow::Result;
use std::path::Path;

impl GatewayConfig {
    /// Load configuration from a file and apply environment variable
    /// overrides for store connection settings. A missing file yields the
    /// built-in defaults — the gateway starts with zero configuration for
    /// local development (no tiers, every credential invalid).
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: GatewayConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            GatewayConfig::default()
        };

        config.apply_env_overrides();

        config.validate()?;
        tracing::info!(
            "config: loaded, tiers={}, users={}, api_keys={}",
            config.tiers.len(),
            config.users.len(),
            config.api_keys.len(),
        );
        Ok(config)
    }

    /// Apply environment variable overrides for store connection settings.
    /// Quota config (tiers, users, api_keys) comes exclusively from the file.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("STORE_HOST") {
            self.store.host = v;
        }
        if let Ok(v) = std::env::var("STORE_PORT") {
            if let Ok(n) = v.parse::<u16>() {
                self.store.port = n;
            }
        }
        if let Ok(v) = std::env::var("STORE_DB") {
            if let Ok(n) = v.parse::<i64>() {
                self.store.db = n;
            }
        }
        if let Ok(v) = std::env::var("STORE_TIMEOUT") {
            if let Ok(n) = v.parse::<u64>() {
                self.store.timeout = n;
            }
        }
    }

    /// Full validation is the snapshot compile — tier invariants, tier
    /// references, credential formats. Fatal at startup; at reload the
    /// caller keeps the prior snapshot instead.
    pub fn validate(&self) -> Result<()> {
        if self.store.max_connections == 0 {
            anyhow::bail!("store.max_connections must be positive");
        }
        if self.store.timeout == 0 {
            anyhow::bail!("store.timeout must be positive (milliseconds)");
        }
        ConfigSnapshot::compile(self).map(|_| ())
    }
}
