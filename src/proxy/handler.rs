use crate::config::{ConfigSnapshot, ResolvedUser};
use crate::error::LimiterError;
use crate::limiter::{AbuseStatus, WindowDecision};
use crate::proxy::context::{
    RequestContext, H_RATELIMIT_DEGRADED, H_RATELIMIT_LIMIT, H_RATELIMIT_REMAINING,
    H_RATELIMIT_RESET,
};
use crate::proxy::{BoxBody, Downstream};
use crate::server::AppState;
use http::header::RETRY_AFTER;
use http::{HeaderValue, StatusCode};
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Decide one inbound request through a phased pipeline:
///
/// 1. EXEMPT       — allowlisted paths pass through untouched
/// 2. ABUSE        — blocked source addresses rejected before validation
/// 3. RESOLVE      — credential → (user, tier), invalid feeds suppression
/// 4. HEALTH       — cached fleet-wide health selects the limit table row
/// 5. WINDOW       — atomic sliding-window admission against the store
/// 6. ANNOTATE     — rate headers on the way out, 429 with Retry-After
///
/// Store unavailability at phase 2 or 5 fails open: the request is admitted
/// and the response carries `X-RateLimit-Degraded: true`.
pub async fn handle_request<D: Downstream>(
    req: Request<Incoming>,
    state: AppState,
    peer_addr: SocketAddr,
    downstream: Arc<D>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let snapshot = state.snapshot();

    // Exempt paths bypass the limiter entirely — no decision recorded.
    if snapshot.is_exempt(req.uri().path()) {
        return Ok(downstream.handle(req).await);
    }

    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    let mut ctx = RequestContext::new(method, path, client_ip(req.headers(), peer_addr));

    if let Some(resp) = phase_abuse_check(&state, &mut ctx).await {
        return Ok(resp);
    }

    let user = match phase_resolve(&snapshot, &req, &state, &mut ctx).await {
        Ok(user) => user,
        Err(resp) => return Ok(resp),
    };
    ctx.tier_name = user.tier.name.clone();

    let health = state.health.get().await;
    let limit = user.tier.effective_limit(health);

    match state
        .window
        .hit(&user.user_id, user.tier.window_seconds, limit)
        .await
    {
        Ok(decision) if decision.allowed => {
            metrics::counter!("limiter_decisions_total", "outcome" => "allowed").increment(1);
            let mut resp = downstream.handle(req).await;
            apply_rate_headers(&mut resp, &decision);
            if ctx.degraded {
                resp.headers_mut()
                    .insert(H_RATELIMIT_DEGRADED, HeaderValue::from_static("true"));
            }
            ctx.finalize(&mut resp);
            Ok(resp)
        }
        Ok(decision) => {
            metrics::counter!("limiter_decisions_total", "outcome" => "limited").increment(1);
            debug!(
                "proxy: rate limited, user={}, tier={}, limit={}, request_id={}",
                user.user_id, user.tier.name, decision.limit, ctx.request_id
            );
            Ok(rate_limited_response(&ctx, &user, &decision))
        }
        Err(LimiterError::StoreUnavailable(msg)) => {
            // Fail-open: availability over strict enforcement when the
            // store is impaired.
            warn!(
                "proxy: window check unavailable, admitting, request_id={}, error={}",
                ctx.request_id, msg
            );
            metrics::counter!("limiter_decisions_total", "outcome" => "failopen").increment(1);
            let mut resp = downstream.handle(req).await;
            resp.headers_mut()
                .insert(H_RATELIMIT_DEGRADED, HeaderValue::from_static("true"));
            ctx.finalize(&mut resp);
            Ok(resp)
        }
        Err(e) => {
            error!(
                "proxy: window check failed, request_id={}, error={}",
                ctx.request_id, e
            );
            metrics::counter!("limiter_decisions_total", "outcome" => "error").increment(1);
            Ok(ctx.json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"error":"internal"}"#.to_string(),
            ))
        }
    }
}

/// Determine the real client IP: trust the left-most X-Forwarded-For entry
/// if present (assumes a trusted reverse proxy in front), otherwise fall
/// back to the TCP peer address.
fn client_ip(headers: &http::HeaderMap, peer_addr: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
        .unwrap_or_else(|| peer_addr.ip())
}

/// Blocked sources are rejected with the remaining block TTL; an
/// unavailable store skips suppression and marks the decision degraded.
async fn phase_abuse_check(
    state: &AppState,
    ctx: &mut RequestContext,
) -> Option<Response<BoxBody>> {
    match state.abuse.check(ctx.client_ip).await {
        Ok(AbuseStatus::Clear) => None,
        Ok(AbuseStatus::Blocked { retry_after }) => {
            metrics::counter!("limiter_decisions_total", "outcome" => "blocked").increment(1);
            warn!(
                "proxy: blocked source rejected, addr={}, request_id={}",
                ctx.client_ip, ctx.request_id
            );
            let secs = retry_after.as_millis().div_ceil(1000).max(1) as u64;
            let mut resp = ctx.json_response(
                StatusCode::TOO_MANY_REQUESTS,
                format!(
                    r#"{{"error":"{}","retry_after":{}}}"#,
                    LimiterError::Blocked.code(),
                    secs
                ),
            );
            resp.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs));
            Some(resp)
        }
        Err(LimiterError::StoreUnavailable(msg)) => {
            warn!(
                "proxy: abuse check unavailable, continuing, request_id={}, error={}",
                ctx.request_id, msg
            );
            ctx.degraded = true;
            None
        }
        Err(e) => {
            error!(
                "proxy: abuse check failed, request_id={}, error={}",
                ctx.request_id, e
            );
            Some(ctx.json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"error":"internal"}"#.to_string(),
            ))
        }
    }
}

/// Credential extraction and resolution. Invalid credentials are counted
/// against the source address before the 401 goes out.
async fn phase_resolve(
    snapshot: &ConfigSnapshot,
    req: &Request<Incoming>,
    state: &AppState,
    ctx: &mut RequestContext,
) -> Result<ResolvedUser, Response<BoxBody>> {
    let credential = req
        .headers()
        .get(snapshot.api_key_header())
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if let Some(user) = snapshot.resolve(credential) {
        return Ok(user.clone());
    }

    match state.abuse.record_invalid(ctx.client_ip).await {
        Ok(()) => {}
        Err(LimiterError::StoreUnavailable(msg)) => {
            warn!(
                "proxy: invalid-credential event not recorded, request_id={}, error={}",
                ctx.request_id, msg
            );
            ctx.degraded = true;
        }
        Err(e) => {
            error!(
                "proxy: abuse record failed, request_id={}, error={}",
                ctx.request_id, e
            );
        }
    }

    metrics::counter!("limiter_decisions_total", "outcome" => "invalid").increment(1);
    debug!(
        "proxy: invalid credential, addr={}, request_id={}",
        ctx.client_ip, ctx.request_id
    );
    Err(ctx.json_response(
        StatusCode::UNAUTHORIZED,
        format!(r#"{{"error":"{}"}}"#, LimiterError::InvalidCredential.code()),
    ))
}

fn apply_rate_headers(resp: &mut Response<BoxBody>, decision: &WindowDecision) {
    let headers = resp.headers_mut();
    headers.insert(H_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(H_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(H_RATELIMIT_RESET, HeaderValue::from(decision.reset_at));
}

fn rate_limited_response(
    ctx: &RequestContext,
    user: &ResolvedUser,
    decision: &WindowDecision,
) -> Response<BoxBody> {
    let now_secs = crate::limiter::window::epoch_ms() / 1000;
    let retry_after = decision.reset_at.saturating_sub(now_secs).max(1);

    let body = format!(
        r#"{{"error":"{}","tier":"{}","limit":{},"retry_after":{}}}"#,
        LimiterError::LimitExceeded.code(),
        user.tier.name,
        decision.limit,
        retry_after
    );
    let mut resp = ctx.json_response(StatusCode::TOO_MANY_REQUESTS, body);
    apply_rate_headers(&mut resp, decision);
    resp.headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after));
    resp
}
