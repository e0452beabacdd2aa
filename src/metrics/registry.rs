use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for latency metrics (seconds). The decision
/// path targets single-digit milliseconds, so the low end is fine-grained.
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`,
/// `gauge!`, `histogram!`) can be used anywhere in the codebase. The
/// `PrometheusHandle` is retained solely for rendering `/metrics`.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric
    /// descriptions. Must be called **once** at startup before any
    /// `counter!` / `gauge!` / `histogram!` calls.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        // --- Describe all metrics (adds HELP / TYPE lines) ---

        // request path
        describe_counter!(
            "limiter_http_requests_total",
            Unit::Count,
            "Total HTTP requests that received a limiter decision"
        );
        describe_histogram!(
            "limiter_http_request_duration_seconds",
            Unit::Seconds,
            "Total request duration including the downstream handler"
        );
        describe_gauge!(
            "limiter_requests_in_flight",
            Unit::Count,
            "Requests currently inside the decision pipeline"
        );
        describe_counter!(
            "limiter_decisions_total",
            Unit::Count,
            "Decision outcomes: allowed, limited, blocked, invalid, failopen, error"
        );

        // store
        describe_counter!(
            "limiter_store_calls_total",
            Unit::Count,
            "Store calls by operation and result"
        );
        describe_counter!(
            "limiter_circuit_rejected_total",
            Unit::Count,
            "Store calls rejected fast by the open circuit breaker"
        );

        // abuse suppression
        describe_counter!(
            "limiter_invalid_credential_total",
            Unit::Count,
            "Invalid-credential events recorded"
        );
        describe_counter!(
            "limiter_blocked_sources_total",
            Unit::Count,
            "Source addresses escalated to a temporary block"
        );

        // health
        describe_counter!(
            "limiter_health_refresh_total",
            Unit::Count,
            "Health-state cache refreshes by result"
        );

        // config
        describe_counter!(
            "limiter_config_reloads_total",
            Unit::Count,
            "Config reload events by source and result"
        );
        describe_gauge!(
            "limiter_config_api_keys",
            Unit::Count,
            "Credentials in the active snapshot"
        );

        // connections
        describe_gauge!(
            "limiter_connections_active",
            Unit::Count,
            "Active downstream connections"
        );
        describe_counter!(
            "limiter_connections_total",
            Unit::Count,
            "Total connections accepted"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
