//! Shared utilities for integration testing: mock upstreams and a spawned
//! gateway.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use apigw::config::schema::*;
use apigw::http::server::{build_router, AppState, AuthBackend};
use apigw::ratelimit::{Limiter, MemoryLimiter};

/// Serve an axum app on an ephemeral port, returning its address.
pub async fn spawn_upstream(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An upstream that reports its name and the path it received.
pub fn echo_upstream(name: &'static str) -> Router {
    Router::new().fallback(move |req: Request| async move {
        Json(json!({
            "service": name,
            "path": req.uri().path(),
            "query": req.uri().query().unwrap_or(""),
        }))
    })
}

/// An upstream that sleeps before answering 200.
pub fn sleepy_upstream(delay: Duration) -> Router {
    Router::new().fallback(move || async move {
        tokio::time::sleep(delay).await;
        Json(json!({"ok": true}))
    })
}

/// An upstream whose status code is scripted by request ordinal.
pub fn scripted_upstream(
    script: impl Fn(usize) -> StatusCode + Clone + Send + Sync + 'static,
) -> Router {
    let counter = Arc::new(AtomicUsize::new(0));
    Router::new().fallback(move || {
        let counter = Arc::clone(&counter);
        let script = script.clone();
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            (script(n), Json(json!({"request": n}))).into_response()
        }
    })
}

/// Minimal config wrapping the given routes; memory limiter, no auth.
pub fn config_with(routes: Vec<RouteConfig>) -> Config {
    Config {
        routes,
        ..Config::default()
    }
}

/// A plain route with no protections enabled.
pub fn route(name: &str, prefix: &str, upstream: SocketAddr) -> RouteConfig {
    RouteConfig {
        name: name.to_string(),
        matcher: MatchConfig {
            path_prefix: prefix.to_string(),
        },
        upstream: format!("http://{upstream}"),
        strip_prefix: String::new(),
        auth_required: false,
        rate_limit: RouteRateLimitConfig::default(),
        concurrency: RouteConcurrencyConfig::default(),
        circuit_breaker: RouteCircuitBreakerConfig::default(),
    }
}

pub fn memory_limiter() -> Arc<MemoryLimiter> {
    Arc::new(MemoryLimiter::new(
        Duration::from_secs(300),
        Duration::from_secs(60),
    ))
}

/// Assemble gateway state with explicit collaborators.
pub fn state_with(
    config: Config,
    limiter: Arc<dyn Limiter>,
    auth: Option<AuthBackend>,
    admin_key: Option<String>,
) -> AppState {
    AppState::new(config, limiter, "memory", auth, admin_key, None).unwrap()
}

/// Default state: memory limiter, no auth, no admin key.
pub fn state(config: Config) -> AppState {
    state_with(config, memory_limiter(), None, None)
}

/// Serve the gateway, returning its base URL.
pub async fn spawn_gateway(state: AppState) -> String {
    let app = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    format!("http://{addr}")
}
