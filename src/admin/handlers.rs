//! Admin snapshot handlers.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::State;
use axum::http::Response;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::auth::JwksStats;
use crate::http::observe::RouteLabel;
use crate::http::server::AppState;
use crate::resilience::BreakerStats;

#[derive(Serialize)]
pub struct SystemStatus {
    pub time_unix: u64,
    pub uptime_seconds: u64,
    pub listen_addr: String,
    pub version: &'static str,
    pub auth_mode: String,
    pub rate_backend: String,
    pub routes_configured: usize,
}

fn labeled(name: &str, body: impl IntoResponse) -> Response<Body> {
    let mut response = body.into_response();
    response.extensions_mut().insert(RouteLabel(name.to_string()));
    response
}

pub async fn status(State(state): State<AppState>) -> Response<Body> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    labeled(
        "admin_status",
        Json(SystemStatus {
            time_unix: now,
            uptime_seconds: state.started_at.elapsed().as_secs(),
            listen_addr: state.config.server.addr.clone(),
            version: env!("CARGO_PKG_VERSION"),
            auth_mode: state
                .auth
                .as_ref()
                .map(|a| a.mode().to_string())
                .unwrap_or_default(),
            rate_backend: state.limiter_backend.clone(),
            routes_configured: state.table.len(),
        }),
    )
}

pub async fn routes(State(state): State<AppState>) -> Response<Body> {
    let out: Vec<Value> = state
        .table
        .iter()
        .map(|route| {
            json!({
                "name": route.name,
                "path_prefix": route.path_prefix,
                "upstream": route.upstream.as_str(),
                "strip_prefix": route.strip_prefix,
                "auth_required": route.auth_required,
                "rate_limit": route.rate_limit,
                "concurrency": route.concurrency,
                "circuit_breaker": route.circuit_breaker,
            })
        })
        .collect();
    labeled("admin_routes", Json(out))
}

pub async fn auth(State(state): State<AppState>) -> Response<Body> {
    let mode = state
        .auth
        .as_ref()
        .map(|a| a.mode().to_string())
        .unwrap_or_default();
    let jwks: Option<JwksStats> = state.auth.as_ref().and_then(|a| a.jwks()).map(|v| v.stats());

    let mut out = json!({"mode": mode});
    if let Some(stats) = jwks {
        out["jwks"] = serde_json::to_value(stats).unwrap_or(Value::Null);
    }
    labeled("admin_auth", Json(out))
}

#[derive(Serialize)]
struct LimitRow {
    route: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    concurrency: Option<ConcurrencySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    circuit_breaker: Option<BreakerStats>,
}

#[derive(Serialize)]
struct ConcurrencySnapshot {
    max_in_flight: usize,
    in_flight: usize,
}

pub async fn limits(State(state): State<AppState>) -> Response<Body> {
    let rows: Vec<LimitRow> = state
        .table
        .iter()
        .map(|route| LimitRow {
            route: route.name.clone(),
            concurrency: state
                .semaphores
                .get(&route.name)
                .filter(|sem| sem.enabled())
                .map(|sem| ConcurrencySnapshot {
                    max_in_flight: sem.cap(),
                    in_flight: sem.in_use(),
                }),
            circuit_breaker: state.breakers.get(&route.name).map(|b| b.stats()),
        })
        .collect();
    labeled("admin_limits", Json(rows))
}
