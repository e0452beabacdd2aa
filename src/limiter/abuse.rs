use crate::config::AbuseConfig;
use crate::error::LimiterError;
use crate::store::{scripts, StoreClient};
use std::net::IpAddr;
use std::time::Duration;

/// Whether a source address may proceed to credential validation.
#[derive(Debug, Clone, Copy)]
pub enum AbuseStatus {
    Clear,
    Blocked {
        /// Remaining block TTL, surfaced as `Retry-After`.
        retry_after: Duration,
    },
}

/// Per-source-address suppression of credential scanning.
///
/// Counters live in the shared store so a scan spread across the fleet is
/// still caught: `attempts:{addr}` counts invalid credentials within a
/// rolling window, `blocked:{addr}` is the escalation flag with its own TTL.
/// Blocked sources are rejected before credential validation and never touch
/// any user's quota.
pub struct AbuseGuard {
    store: StoreClient,
    config: AbuseConfig,
    check_script: redis::Script,
    record_script: redis::Script,
}

impl AbuseGuard {
    pub fn new(store: StoreClient, config: AbuseConfig) -> Self {
        Self {
            store,
            config,
            check_script: redis::Script::new(scripts::ABUSE_CHECK),
            record_script: redis::Script::new(scripts::ABUSE_RECORD),
        }
    }

    /// One store round trip: blocked flag plus its remaining TTL.
    pub async fn check(&self, addr: IpAddr) -> Result<AbuseStatus, LimiterError> {
        let blocked_key = format!("blocked:{}", addr);
        let reply = self
            .store
            .eval_script("abuse_check", &self.check_script, &[&blocked_key], &[])
            .await?;

        if reply.first() == Some(&1) {
            let retry_after =
                Duration::from_millis(reply.get(1).copied().unwrap_or(0).max(0) as u64);
            return Ok(AbuseStatus::Blocked { retry_after });
        }
        Ok(AbuseStatus::Clear)
    }

    /// Record one invalid-credential event, escalating to a block at the
    /// attempt threshold. Valid credentials never decrement the counter.
    pub async fn record_invalid(&self, addr: IpAddr) -> Result<(), LimiterError> {
        let attempts_key = format!("attempts:{}", addr);
        let blocked_key = format!("blocked:{}", addr);

        let args = [
            self.config.attempt_window_secs.to_string(),
            self.config.max_attempts.to_string(),
            self.config.block_duration_secs.to_string(),
        ];
        let reply = self
            .store
            .eval_script(
                "abuse_record",
                &self.record_script,
                &[&attempts_key, &blocked_key],
                &args,
            )
            .await?;

        metrics::counter!("limiter_invalid_credential_total").increment(1);

        let attempts = reply.first().copied().unwrap_or(0);
        if reply.get(1) == Some(&1) {
            metrics::counter!("limiter_blocked_sources_total").increment(1);
            tracing::warn!(
                "abuse: source blocked, addr={}, attempts={}, block_secs={}",
                addr,
                attempts,
                self.config.block_duration_secs
            );
        }
        Ok(())
    }
}
