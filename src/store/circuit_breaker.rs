use crate::config::CircuitBreakerConfig;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Availability guard for the coordinating store.
///
/// One breaker covers every store call the gateway makes — window scripts,
/// abuse counters and health reads alike. `failure_threshold` consecutive
/// errors or deadline misses trip it; for the next `open_duration_secs`
/// every call fails fast with `StoreUnavailable`, which the rate path turns
/// into fail-open admission and the health path into "assume NORMAL". Once
/// the cooldown passes, a single call goes out as a probe and
/// `success_threshold` probe successes restore normal service.
pub struct CircuitBreaker {
    /// Encoded state, one of the `STATE_*` values below.
    state: AtomicU8,
    /// Uninterrupted failures while closed; any success resets it.
    failure_streak: AtomicU32,
    /// Successes accumulated by the current probe run.
    probe_successes: AtomicU32,
    /// When the breaker last tripped; gates the cooldown.
    tripped_at: Mutex<Option<Instant>>,
    config: CircuitBreakerConfig,
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Answer to "may this store call go out?".
pub enum BreakerCheck {
    /// Store considered healthy.
    Allowed,
    /// Cooldown expired — this call doubles as the recovery probe.
    Probe,
    /// Breaker open — fail fast without touching the store.
    Rejected,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            failure_streak: AtomicU32::new(0),
            probe_successes: AtomicU32::new(0),
            tripped_at: Mutex::new(None),
            config,
        }
    }

    /// Gate a store call. Must be paired with `record_success` /
    /// `record_failure` for the call's outcome unless `Rejected`.
    pub fn check(&self) -> BreakerCheck {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => {
                if self.cooldown_elapsed() && self.begin_probe() {
                    BreakerCheck::Probe
                } else {
                    BreakerCheck::Rejected
                }
            }
            // Calls overlapping an in-flight probe also go out; their
            // outcomes count toward success_threshold.
            STATE_HALF_OPEN => BreakerCheck::Probe,
            _ => BreakerCheck::Allowed,
        }
    }

    pub fn record_success(&self) {
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED => {
                self.failure_streak.store(0, Ordering::Relaxed);
            }
            STATE_HALF_OPEN => {
                let run = self.probe_successes.fetch_add(1, Ordering::Relaxed) + 1;
                if run >= self.config.success_threshold {
                    self.failure_streak.store(0, Ordering::Relaxed);
                    self.state.store(STATE_CLOSED, Ordering::Release);
                    tracing::info!("store breaker: closed, store reachable again");
                }
            }
            _ => {}
        }
    }

    pub fn record_failure(&self) {
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED => {
                let streak = self.failure_streak.fetch_add(1, Ordering::Relaxed) + 1;
                if streak >= self.config.failure_threshold {
                    self.trip();
                    tracing::warn!(
                        "store breaker: open after {} straight failures, shedding store calls for {}s",
                        streak,
                        self.config.open_duration_secs
                    );
                }
            }
            STATE_HALF_OPEN => {
                self.probe_successes.store(0, Ordering::Relaxed);
                self.trip();
                tracing::warn!("store breaker: probe failed, store still unavailable");
            }
            _ => {}
        }
    }

    /// Whether calls currently fail fast (readiness reporting). Reports
    /// closed once the cooldown has passed, since the next call will probe.
    pub fn is_open(&self) -> bool {
        if self.state.load(Ordering::Acquire) != STATE_OPEN {
            return false;
        }
        !self.cooldown_elapsed()
    }

    fn cooldown_elapsed(&self) -> bool {
        let tripped_at = self.tripped_at.lock().unwrap();
        match *tripped_at {
            Some(at) => at.elapsed() >= Duration::from_secs(self.config.open_duration_secs),
            None => false,
        }
    }

    /// The CAS elects exactly one caller as the probe; losers keep failing
    /// fast until the probe settles the state one way or the other.
    fn begin_probe(&self) -> bool {
        let elected = self
            .state
            .compare_exchange(
                STATE_OPEN,
                STATE_HALF_OPEN,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if elected {
            self.probe_successes.store(0, Ordering::Relaxed);
        }
        elected
    }

    fn trip(&self) {
        self.state.store(STATE_OPEN, Ordering::Release);
        *self.tripped_at.lock().unwrap() = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(
        failure_threshold: u32,
        success_threshold: u32,
        open_duration_secs: u64,
    ) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            success_threshold,
            open_duration_secs,
        })
    }

    #[test]
    fn test_healthy_store_calls_pass() {
        let b = breaker(5, 1, 30);
        assert!(matches!(b.check(), BreakerCheck::Allowed));
        b.record_success();
        assert!(matches!(b.check(), BreakerCheck::Allowed));
        assert!(!b.is_open());
    }

    #[test]
    fn test_outage_sheds_calls_at_threshold() {
        let b = breaker(5, 1, 30);

        for i in 0..4 {
            b.record_failure();
            assert!(
                matches!(b.check(), BreakerCheck::Allowed),
                "call after failure {} must still go out",
                i + 1
            );
        }

        // Fifth straight failure: shed everything.
        b.record_failure();
        assert!(matches!(b.check(), BreakerCheck::Rejected));
        assert!(b.is_open());
    }

    #[test]
    fn test_flaky_store_never_trips() {
        // Intermittent errors with successes in between keep the streak
        // below the threshold indefinitely.
        let b = breaker(3, 1, 30);
        for _ in 0..10 {
            b.record_failure();
            b.record_failure();
            b.record_success();
        }
        assert!(matches!(b.check(), BreakerCheck::Allowed));
    }

    #[test]
    fn test_cooldown_gates_the_probe() {
        let b = breaker(1, 1, 3600);
        b.record_failure();

        // Cooldown far from over: every call fails fast.
        assert!(matches!(b.check(), BreakerCheck::Rejected));
        assert!(matches!(b.check(), BreakerCheck::Rejected));
        assert!(b.is_open());
    }

    #[test]
    fn test_probe_success_restores_service() {
        let b = breaker(1, 1, 0);
        b.record_failure();
        std::thread::sleep(Duration::from_millis(5));

        // Cooldown (0s) over: one caller gets the probe slot.
        assert!(matches!(b.check(), BreakerCheck::Probe));
        b.record_success();

        assert!(matches!(b.check(), BreakerCheck::Allowed));
        assert!(!b.is_open());
    }

    #[test]
    fn test_failed_probe_keeps_shedding() {
        let b = breaker(1, 1, 0);
        b.record_failure();
        std::thread::sleep(Duration::from_millis(5));

        assert!(matches!(b.check(), BreakerCheck::Probe));
        b.record_failure();

        // Tripped again: a fresh cooldown starts, after which the next call
        // is another probe rather than unrestricted traffic.
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(b.check(), BreakerCheck::Probe));
    }

    #[test]
    fn test_recovery_needs_the_full_success_run() {
        let b = breaker(1, 3, 0);
        b.record_failure();
        std::thread::sleep(Duration::from_millis(5));

        assert!(matches!(b.check(), BreakerCheck::Probe));
        b.record_success();
        b.record_success();
        // Two of three: still probing.
        assert!(matches!(b.check(), BreakerCheck::Probe));

        b.record_success();
        assert!(matches!(b.check(), BreakerCheck::Allowed));
    }

    #[test]
    fn test_success_resets_streak_after_recovery() {
        let b = breaker(2, 1, 0);
        b.record_failure();
        b.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(b.check(), BreakerCheck::Probe));
        b.record_success();

        // The old streak must not linger: one new failure alone cannot trip
        // a freshly recovered breaker.
        b.record_failure();
        assert!(matches!(b.check(), BreakerCheck::Allowed));
    }
}
