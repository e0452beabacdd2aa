use bytes::Bytes;
use http::header::HeaderName;
use http::{HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use std::net::IpAddr;
use std::time::Instant;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

pub const H_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const H_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const H_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const H_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const H_RATELIMIT_DEGRADED: HeaderName = HeaderName::from_static("x-ratelimit-degraded");

/// Per-request context that flows through the decision phases.
/// Carries request metadata and accumulates state across the pipeline.
pub struct RequestContext {
    pub method: String,
    pub path: String,
    /// The downstream client IP (TCP peer or trusted X-Forwarded-For).
    pub client_ip: IpAddr,
    pub request_id: String,
    /// Tier name once the credential is resolved, empty before that.
    pub tier_name: String,
    pub start: Instant,
    /// Set when a store call failed and enforcement was skipped (fail-open).
    pub degraded: bool,
}

impl RequestContext {
    pub fn new(method: String, path: String, client_ip: IpAddr) -> Self {
        metrics::gauge!("limiter_requests_in_flight").increment(1.0);
        Self {
            method,
            path,
            client_ip,
            request_id: format!("{:016x}", rand::random::<u64>()),
            tier_name: String::new(),
            start: Instant::now(),
            degraded: false,
        }
    }

    /// Build a JSON response and record metrics in one place. This is the
    /// exit point for every decision the limiter answers itself (401, 429,
    /// 500); pass-through responses go through [`RequestContext::finalize`].
    pub fn json_response(&self, status: StatusCode, body: String) -> hyper::Response<BoxBody> {
        self.record_metrics(status.as_u16());

        let mut resp = hyper::Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(full_body(body))
            .unwrap();
        if let Ok(v) = HeaderValue::from_str(&self.request_id) {
            resp.headers_mut().insert(H_REQUEST_ID, v);
        }
        resp
    }

    /// Annotate a downstream (pass-through) response and record final
    /// metrics. Called exactly once per admitted request.
    pub fn finalize(&self, resp: &mut hyper::Response<BoxBody>) {
        if let Ok(v) = HeaderValue::from_str(&self.request_id) {
            resp.headers_mut().insert(H_REQUEST_ID, v);
        }
        self.record_metrics(resp.status().as_u16());
    }

    fn record_metrics(&self, status: u16) {
        let mut buf = itoa::Buffer::new();
        let status_str = buf.format(status);

        metrics::counter!(
            "limiter_http_requests_total",
            "method" => self.method.clone(),
            "status_code" => status_str.to_owned(),
            "tier" => self.tier_name.clone(),
        )
        .increment(1);

        metrics::histogram!(
            "limiter_http_request_duration_seconds",
            "tier" => self.tier_name.clone(),
        )
        .record(self.start.elapsed().as_secs_f64());

        metrics::gauge!("limiter_requests_in_flight").decrement(1.0);
    }
}
