use crate::config::{CircuitBreakerConfig, StoreConfig};
use crate::error::LimiterError;
use crate::store::circuit_breaker::{BreakerCheck, CircuitBreaker};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::error::Elapsed;

fn store_err(e: redis::RedisError) -> LimiterError {
    LimiterError::StoreUnavailable(e.to_string())
}

/// Pooled client for the coordinating store.
///
/// Every call is wrapped in the per-call deadline and the shared circuit
/// breaker: deadline exhaustion and transport errors count as failures, and
/// while the breaker is open every call fails fast with
/// [`LimiterError::StoreUnavailable`] so the hot path never waits on an
/// impaired store.
///
/// Cheaply cloneable — the pool and breaker are reference-counted.
#[derive(Clone)]
pub struct StoreClient {
    pool: Pool,
    deadline: Duration,
    breaker: Arc<CircuitBreaker>,
}

impl StoreClient {
    pub fn new(store: &StoreConfig, breaker: CircuitBreakerConfig) -> anyhow::Result<Self> {
        let deadline = Duration::from_millis(store.timeout);
        let pool = Config::from_url(store.url())
            .builder()
            .map(|b| {
                b.max_size(store.max_connections)
                    .wait_timeout(Some(deadline))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| anyhow::anyhow!("store pool config: {}", e))?
            .map_err(|e| anyhow::anyhow!("store pool: {}", e))?;

        Ok(Self {
            pool,
            deadline,
            breaker: Arc::new(CircuitBreaker::new(breaker)),
        })
    }

    /// Evaluate a server-side script. Scripts are cached by SHA and
    /// re-uploaded once on "script not loaded".
    ///
    /// All limiter scripts return flat integer arrays.
    pub async fn eval_script(
        &self,
        op: &'static str,
        script: &redis::Script,
        keys: &[&str],
        args: &[String],
    ) -> Result<Vec<i64>, LimiterError> {
        self.guard()?;
        let outcome = tokio::time::timeout(self.deadline, async {
            let mut conn = self.connection().await?;
            let mut invocation = script.prepare_invoke();
            for key in keys {
                invocation.key(*key);
            }
            for arg in args {
                invocation.arg(arg.as_str());
            }
            let result: Vec<i64> = invocation
                .invoke_async(&mut conn)
                .await
                .map_err(store_err)?;
            Ok(result)
        })
        .await;
        self.settle(op, outcome)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, LimiterError> {
        self.guard()?;
        let outcome = tokio::time::timeout(self.deadline, async {
            let mut conn = self.connection().await?;
            let value: Option<String> = conn.get(key).await.map_err(store_err)?;
            Ok(value)
        })
        .await;
        self.settle("get", outcome)
    }

    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), LimiterError> {
        self.guard()?;
        let outcome = tokio::time::timeout(self.deadline, async {
            let mut conn = self.connection().await?;
            match ttl {
                Some(d) => {
                    let () = conn
                        .set_ex(key, value, d.as_secs().max(1))
                        .await
                        .map_err(store_err)?;
                }
                None => {
                    let () = conn.set(key, value).await.map_err(store_err)?;
                }
            }
            Ok(())
        })
        .await;
        self.settle("set", outcome)
    }

    /// Atomic increment that refreshes the key TTL, returning the new count.
    pub async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, LimiterError> {
        self.guard()?;
        let outcome = tokio::time::timeout(self.deadline, async {
            let mut conn = self.connection().await?;
            let (count,): (i64,) = redis::pipe()
                .atomic()
                .incr(key, 1)
                .expire(key, ttl.as_secs().max(1) as i64)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;
            Ok(count)
        })
        .await;
        self.settle("incr", outcome)
    }

    pub async fn ping(&self) -> Result<bool, LimiterError> {
        self.guard()?;
        let outcome = tokio::time::timeout(self.deadline, async {
            let mut conn = self.connection().await?;
            let pong: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;
            Ok(pong)
        })
        .await;
        self.settle("ping", outcome).map(|p| p == "PONG")
    }

    /// Whether the breaker currently fails fast (readiness reporting).
    pub fn circuit_open(&self) -> bool {
        self.breaker.is_open()
    }

    fn guard(&self) -> Result<(), LimiterError> {
        match self.breaker.check() {
            BreakerCheck::Allowed | BreakerCheck::Probe => Ok(()),
            BreakerCheck::Rejected => {
                metrics::counter!("limiter_circuit_rejected_total").increment(1);
                Err(LimiterError::StoreUnavailable("circuit open".to_string()))
            }
        }
    }

    async fn connection(&self) -> Result<Connection, LimiterError> {
        self.pool
            .get()
            .await
            .map_err(|e| LimiterError::StoreUnavailable(format!("pool: {}", e)))
    }

    fn settle<T>(
        &self,
        op: &'static str,
        outcome: Result<Result<T, LimiterError>, Elapsed>,
    ) -> Result<T, LimiterError> {
        match outcome {
            Ok(Ok(value)) => {
                self.breaker.record_success();
                metrics::counter!(
                    "limiter_store_calls_total",
                    "op" => op, "result" => "success",
                )
                .increment(1);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.breaker.record_failure();
                metrics::counter!(
                    "limiter_store_calls_total",
                    "op" => op, "result" => "error",
                )
                .increment(1);
                Err(e)
            }
            Err(_) => {
                self.breaker.record_failure();
                metrics::counter!(
                    "limiter_store_calls_total",
                    "op" => op, "result" => "timeout",
                )
                .increment(1);
                Err(LimiterError::StoreUnavailable(format!(
                    "{} deadline exceeded",
                    op
                )))
            }
        }
    }
}
