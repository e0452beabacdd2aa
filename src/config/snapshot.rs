use crate::config::{GatewayConfig, TierConfig};
use crate::health::HealthStatus;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A tier with its per-health-state limits precomputed at compile time,
/// selected by [`HealthStatus`] — no string branching on the hot path.
///
/// A tier is shed-eligible when `degraded_limit < base_limit` (the "free"
/// semantic): under DEGRADED health it drops to `degraded_limit`. Tiers whose
/// degraded limit equals their base keep `base_limit` under DEGRADED, which
/// preserves the paid-tier SLA floor.
#[derive(Debug)]
pub struct CompiledTier {
    pub name: String,
    pub window_seconds: u64,
    normal_limit: u64,
    degraded_limit: u64,
}

impl CompiledTier {
    fn compile(name: &str, tier: &TierConfig) -> Self {
        Self {
            name: name.to_string(),
            window_seconds: tier.window_minutes * 60,
            normal_limit: tier.burst_limit,
            degraded_limit: if tier.degraded_limit < tier.base_limit {
                tier.degraded_limit
            } else {
                tier.base_limit
            },
        }
    }

    pub fn effective_limit(&self, health: HealthStatus) -> u64 {
        match health {
            HealthStatus::Normal => self.normal_limit,
            HealthStatus::Degraded => self.degraded_limit,
        }
    }
}

/// A credential resolved to its owner and tier.
#[derive(Debug, Clone)]
pub struct ResolvedUser {
    pub user_id: String,
    pub tier: Arc<CompiledTier>,
}

/// Immutable compiled view of the configuration, published whole via
/// `ArcSwap`. Readers observe either the prior or the new snapshot, never a
/// blend; a failed compile leaves the prior snapshot in force.
pub struct ConfigSnapshot {
    tiers: HashMap<String, Arc<CompiledTier>>,
    credentials: HashMap<String, ResolvedUser>,
    exempt_paths: HashSet<String>,
    api_key_header: String,
}

impl ConfigSnapshot {
    /// Validate the raw configuration and compile the lookup maps.
    ///
    /// All-or-nothing: any invalid tier, dangling tier reference, or
    /// malformed credential fails the whole compile.
    pub fn compile(config: &GatewayConfig) -> anyhow::Result<Self> {
        let mut tiers: HashMap<String, Arc<CompiledTier>> = HashMap::new();
        for (name, tier) in &config.tiers {
            if tier.base_limit > tier.burst_limit {
                anyhow::bail!(
                    "tier '{}': base_limit {} exceeds burst_limit {}",
                    name,
                    tier.base_limit,
                    tier.burst_limit
                );
            }
            if tier.degraded_limit > tier.base_limit {
                anyhow::bail!(
                    "tier '{}': degraded_limit {} exceeds base_limit {}",
                    name,
                    tier.degraded_limit,
                    tier.base_limit
                );
            }
            if tier.window_minutes == 0 {
                anyhow::bail!("tier '{}': window_minutes must be positive", name);
            }
            tiers.insert(name.clone(), Arc::new(CompiledTier::compile(name, tier)));
        }

        let mut user_tiers: HashMap<&str, Arc<CompiledTier>> = HashMap::new();
        for (user_id, tier_name) in &config.users {
            if user_id.is_empty() {
                anyhow::bail!("user id cannot be empty");
            }
            let tier = tiers
                .get(tier_name)
                .ok_or_else(|| {
                    anyhow::anyhow!("user '{}': unknown tier '{}'", user_id, tier_name)
                })?
                .clone();
            user_tiers.insert(user_id.as_str(), tier);
        }

        let mut credentials: HashMap<String, ResolvedUser> = HashMap::new();
        for (credential, user_id) in &config.api_keys {
            if !credential_format_ok(credential) {
                anyhow::bail!(
                    "api key for user '{}': credential must be 8-128 printable ASCII chars",
                    user_id
                );
            }
            let tier = user_tiers
                .get(user_id.as_str())
                .ok_or_else(|| anyhow::anyhow!("api key references unknown user '{}'", user_id))?
                .clone();
            credentials.insert(
                credential.clone(),
                ResolvedUser {
                    user_id: user_id.clone(),
                    tier,
                },
            );
        }

        Ok(Self {
            tiers,
            credentials,
            exempt_paths: config.limiter.exempt_paths.iter().cloned().collect(),
            api_key_header: config.limiter.api_key_header.clone(),
        })
    }

    /// Map a credential to its user and tier. Wrong-format credentials miss
    /// without touching any map.
    pub fn resolve(&self, credential: &str) -> Option<&ResolvedUser> {
        if !credential_format_ok(credential) {
            return None;
        }
        self.credentials.get(credential)
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.contains(path)
    }

    pub fn api_key_header(&self) -> &str {
        &self.api_key_header
    }

    pub fn tier(&self, name: &str) -> Option<&Arc<CompiledTier>> {
        self.tiers.get(name)
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }
}

/// Credential format rule: non-empty, 8-128 chars, printable ASCII
/// (0x21-0x7E plus space). Failing requests short-circuit to "invalid
/// credential" with no store I/O.
pub fn credential_format_ok(credential: &str) -> bool {
    (8..=128).contains(&credential.len())
        && credential.bytes().all(|b| b.is_ascii_graphic() || b == b' ')
}
