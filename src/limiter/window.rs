use crate::error::LimiterError;
use crate::store::{scripts, StoreClient};
use std::time::{SystemTime, UNIX_EPOCH};

/// Outcome of one sliding-window admission attempt.
#[derive(Debug, Clone, Copy)]
pub struct WindowDecision {
    pub allowed: bool,
    /// The limit that was enforced.
    pub limit: u64,
    /// Admissions left in the current window.
    pub remaining: u64,
    /// Epoch seconds at which the window frees a slot.
    pub reset_at: u64,
}

/// Sliding-window log counter, executed atomically server-side.
///
/// The script is the serialization point for concurrent requests of the same
/// user: trim, count, insert and expire happen in one call, so two instances
/// can never both admit past the limit. Window state lives under
/// `rl:{user_id}:{window_seconds}` with a TTL slightly longer than the
/// window, so idle users cost nothing.
pub struct SlidingWindowCounter {
    store: StoreClient,
    script: redis::Script,
}

impl SlidingWindowCounter {
    pub fn new(store: StoreClient) -> Self {
        Self {
            store,
            script: redis::Script::new(scripts::SLIDING_WINDOW),
        }
    }

    /// Attempt to admit one request for `user_id` under `limit` per
    /// `window_seconds`.
    ///
    /// The event id is unique per request so two admissions in the same
    /// millisecond cannot collide in the sorted set. An admitted event stays
    /// in the window even if the caller is cancelled afterwards —
    /// retracting it would break the atomicity of the decision.
    pub async fn hit(
        &self,
        user_id: &str,
        window_seconds: u64,
        limit: u64,
    ) -> Result<WindowDecision, LimiterError> {
        let key = format!("rl:{}:{}", user_id, window_seconds);
        let now_ms = epoch_ms();
        let event_id = format!("{}:{:08x}", now_ms, rand::random::<u32>());

        let args = [
            window_seconds.to_string(),
            limit.to_string(),
            now_ms.to_string(),
            event_id,
        ];
        let reply = self
            .store
            .eval_script("window", &self.script, &[&key], &args)
            .await?;

        if reply.len() != 4 {
            return Err(LimiterError::Internal(format!(
                "window script returned {} values, expected 4",
                reply.len()
            )));
        }

        Ok(WindowDecision {
            allowed: reply[0] == 1,
            limit: reply[1].max(0) as u64,
            remaining: reply[2].max(0) as u64,
            // Round the reset up to whole seconds so Retry-After never
            // undershoots the actual slot release.
            reset_at: (reply[3].max(0) as u64).div_ceil(1000),
        })
    }
}

pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
