use super::AppState;
use crate::health::{default_updated_by, HealthStatus};
use bytes::Bytes;
use http::Method;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

fn json(status: StatusCode, body: String) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full_body(body))
        .unwrap()
}

/// `POST /admin/health` payload.
#[derive(Deserialize)]
struct HealthUpdate {
    status: HealthStatus,
    #[serde(default)]
    ttl_seconds: Option<u64>,
    #[serde(default)]
    updated_by: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

pub async fn handle_admin(
    req: Request<Incoming>,
    state: AppState,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match path.as_str() {
        "/health" | "/healthz" => Ok(json(StatusCode::OK, r#"{"status":"ok"}"#.to_string())),

        "/ready" | "/readyz" => {
            let snapshot = state.snapshot();
            let store_ok = state.store.ping().await.unwrap_or(false);
            Ok(json(
                StatusCode::OK,
                format!(
                    r#"{{"status":"ready","tiers":{},"api_keys":{},"store_ok":{},"store_circuit_open":{}}}"#,
                    snapshot.tier_count(),
                    snapshot.credential_count(),
                    store_ok,
                    state.store.circuit_open(),
                ),
            ))
        }

        "/metrics" => {
            let body = state.metrics.render();
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap())
        }

        "/admin/health" if method == Method::GET => match state.health.current_record().await {
            Ok(record) => Ok(json(
                StatusCode::OK,
                serde_json::to_string(&record).unwrap_or_default(),
            )),
            Err(e) => Ok(json(
                StatusCode::SERVICE_UNAVAILABLE,
                format!(r#"{{"error":"{}"}}"#, e.code()),
            )),
        },

        "/admin/health" if method == Method::POST => {
            if let Some(resp) = check_admin_key(&req, &state) {
                return Ok(resp);
            }
            let body = req.into_body().collect().await?.to_bytes();
            let update: HealthUpdate = match serde_json::from_slice(&body) {
                Ok(u) => u,
                Err(e) => {
                    return Ok(json(
                        StatusCode::BAD_REQUEST,
                        format!(r#"{{"error":"invalid payload: {}"}}"#, e),
                    ))
                }
            };

            let updated_by = update.updated_by.unwrap_or_else(default_updated_by);
            let reason = update.reason.unwrap_or_default();
            match state
                .health
                .set(update.status, &updated_by, &reason, update.ttl_seconds)
                .await
            {
                Ok(record) => Ok(json(
                    StatusCode::OK,
                    serde_json::to_string(&record).unwrap_or_default(),
                )),
                Err(e) => Ok(json(
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!(r#"{{"error":"{}"}}"#, e.code()),
                )),
            }
        }

        "/admin/config/reload" if method == Method::POST => {
            if let Some(resp) = check_admin_key(&req, &state) {
                return Ok(resp);
            }
            match state.reload("admin").await {
                Ok(()) => {
                    let snapshot = state.snapshot();
                    Ok(json(
                        StatusCode::OK,
                        format!(
                            r#"{{"status":"reloaded","tiers":{},"api_keys":{}}}"#,
                            snapshot.tier_count(),
                            snapshot.credential_count(),
                        ),
                    ))
                }
                Err(e) => Ok(json(
                    StatusCode::BAD_REQUEST,
                    format!(r#"{{"error":"config_invalid","detail":"{}"}}"#, e),
                )),
            }
        }

        _ => Ok(json(
            StatusCode::NOT_FOUND,
            r#"{"error":"not found"}"#.to_string(),
        )),
    }
}

/// Mutating admin endpoints require `X-Admin-Key` when `ADMIN_KEY` is set.
fn check_admin_key(req: &Request<Incoming>, state: &AppState) -> Option<Response<BoxBody>> {
    let expected = state.admin_key()?;
    let presented = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if presented == expected {
        None
    } else {
        Some(json(
            StatusCode::UNAUTHORIZED,
            r#"{"error":"unauthorized"}"#.to_string(),
        ))
    }
}
