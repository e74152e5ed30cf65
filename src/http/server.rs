//! Gateway assembly: shared state, router construction, and serving.

use std::collections::HashMap;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, Response, StatusCode};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;

use crate::admin;
use crate::auth::hmac::HmacValidator;
use crate::auth::jwks::{JwksOptions, JwksValidator};
use crate::auth::{AuthError, BearerValidator};
use crate::config::Config;
use crate::http::observe::{self, RouteLabel, UNKNOWN_ROUTE};
use crate::http::{pipeline, request_id, respond};
use crate::lifecycle::Shutdown;
use crate::net::cidr::CidrParseError;
use crate::net::{CidrSet, IpResolver};
use crate::proxy::{build_client, HttpClient};
use crate::ratelimit::{Limiter, MemoryLimiter, RedisLimiter};
use crate::resilience::{BreakerConfig, CircuitBreaker, Semaphore};
use crate::routing::router::RouterError;
use crate::routing::RouteTable;

/// How long in-flight requests may drain after a shutdown signal.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("server.trusted_proxies: {0}")]
    Cidr(#[from] CidrParseError),

    #[error("auth init failed: {0}")]
    Auth(#[from] AuthError),
}

/// The configured bearer-token backend.
pub enum AuthBackend {
    Hmac(HmacValidator),
    Jwks(Arc<JwksValidator>),
}

impl AuthBackend {
    pub fn validator(&self) -> &dyn BearerValidator {
        match self {
            AuthBackend::Hmac(v) => v,
            AuthBackend::Jwks(v) => v.as_ref(),
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            AuthBackend::Hmac(_) => "hmac",
            AuthBackend::Jwks(_) => "jwks",
        }
    }

    pub fn jwks(&self) -> Option<&JwksValidator> {
        match self {
            AuthBackend::Jwks(v) => Some(v),
            AuthBackend::Hmac(_) => None,
        }
    }
}

/// Application state injected into handlers. Cheap to clone; everything
/// mutable lives behind its own lock with short critical sections.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub table: Arc<RouteTable>,
    pub limiter: Arc<dyn Limiter>,
    pub limiter_backend: String,
    pub auth: Option<Arc<AuthBackend>>,
    pub ip_resolver: IpResolver,
    pub semaphores: Arc<HashMap<String, Arc<Semaphore>>>,
    pub breakers: Arc<HashMap<String, Arc<CircuitBreaker>>>,
    pub client: HttpClient,
    pub metrics: Option<PrometheusHandle>,
    pub admin_key: Option<String>,
    pub started_at: Instant,
    pub max_body_bytes: u64,
    pub response_header_timeout_seconds: u64,
}

impl AppState {
    /// Assemble state from pre-built collaborators. Used directly by tests;
    /// `from_config` wires the production collaborators.
    pub fn new(
        config: Config,
        limiter: Arc<dyn Limiter>,
        limiter_backend: &str,
        auth: Option<AuthBackend>,
        admin_key: Option<String>,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, GatewayError> {
        let table = Arc::new(RouteTable::from_configs(&config.routes)?);

        let trusted = CidrSet::parse(&config.server.trusted_proxies)?;
        let ip_resolver = IpResolver::new(if trusted.is_empty() { None } else { Some(trusted) });

        let mut semaphores = HashMap::new();
        let mut breakers = HashMap::new();
        for route in table.iter() {
            semaphores.insert(
                route.name.clone(),
                Semaphore::new(route.concurrency.max_in_flight),
            );
            if route.circuit_breaker.enabled {
                breakers.insert(
                    route.name.clone(),
                    CircuitBreaker::new(BreakerConfig {
                        failure_threshold: route.circuit_breaker.failure_threshold,
                        open_duration: Duration::from_secs(route.circuit_breaker.open_seconds),
                        half_open_max_in_flight: route.circuit_breaker.half_open_max_in_flight,
                    }),
                );
            }
        }

        let client = build_client(&config.upstream);
        let max_body_bytes = config.server.max_body_bytes;
        let response_header_timeout_seconds = config.upstream.response_header_timeout_seconds;

        Ok(Self {
            config: Arc::new(config),
            table,
            limiter,
            limiter_backend: limiter_backend.to_string(),
            auth: auth.map(Arc::new),
            ip_resolver,
            semaphores: Arc::new(semaphores),
            breakers: Arc::new(breakers),
            client,
            metrics,
            admin_key,
            started_at: Instant::now(),
            max_body_bytes,
            response_header_timeout_seconds,
        })
    }

    /// Wire the production collaborators: limiter backend (with memory
    /// fallback when the shared store is unreachable), auth backend, and the
    /// admin key from the environment.
    pub async fn from_config(
        config: Config,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, GatewayError> {
        let (limiter, backend): (Arc<dyn Limiter>, &str) =
            match config.rate_limit.backend.trim().to_ascii_lowercase().as_str() {
                "redis" => {
                    let redis = &config.rate_limit.redis;
                    match RedisLimiter::connect(&redis.addr, &redis.password, redis.db).await {
                        Ok(limiter) => (Arc::new(limiter), "redis"),
                        Err(err) => {
                            tracing::warn!(
                                addr = %redis.addr,
                                error = %err,
                                "redis unreachable; falling back to memory limiter"
                            );
                            (Arc::new(memory_limiter(&config)), "memory")
                        }
                    }
                }
                _ => (Arc::new(memory_limiter(&config)), "memory"),
            };

        let auth = match config.auth.mode.trim().to_ascii_lowercase().as_str() {
            "jwks" => {
                let jwks = &config.auth.jwks;
                let validator = JwksValidator::new(
                    &jwks.url,
                    JwksOptions {
                        http_timeout: Duration::from_secs(jwks.http_timeout_seconds),
                        cache_ttl: Duration::from_secs(jwks.cache_ttl_seconds),
                        leeway: Duration::from_secs(jwks.leeway_seconds),
                        issuers: jwks.issuers.clone(),
                        audiences: jwks.audiences.clone(),
                        ..JwksOptions::default()
                    },
                )?;
                Some(AuthBackend::Jwks(Arc::new(validator)))
            }
            "hmac" => Some(AuthBackend::Hmac(HmacValidator::new(
                &config.auth.hmac_secret,
                Duration::ZERO,
            ))),
            _ => None,
        };

        let admin_key = std::env::var("APIGW_ADMIN_KEY").ok().filter(|k| !k.is_empty());

        Self::new(config, limiter, backend, auth, admin_key, metrics)
    }
}

fn memory_limiter(config: &Config) -> MemoryLimiter {
    MemoryLimiter::new(
        Duration::from_secs(config.rate_limit.memory.ttl_seconds),
        Duration::from_secs(config.rate_limit.memory.cleanup_seconds),
    )
}

/// Build the full application router.
///
/// The gateway catch-all and the admin views are instrumented (request id,
/// metrics, access log); `/healthz` and `/metrics` are served plain.
pub fn build_router(state: AppState) -> Router {
    let write_timeout = Duration::from_secs(state.config.server.write_timeout_seconds.max(1));

    let instrumented = Router::new()
        .merge(admin::router(state.clone()))
        .fallback(gateway_handler)
        .with_state(state.clone())
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TimeoutLayer::new(write_timeout))
        .layer(middleware::from_fn(observe::observe))
        .layer(middleware::from_fn(request_id::request_id));

    let ops = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    instrumented.merge(ops)
}

/// Serve until shutdown, draining in-flight requests for up to
/// `DRAIN_DEADLINE` afterward.
pub async fn run(
    listener: TcpListener,
    app: Router,
    shutdown: &Shutdown,
) -> std::io::Result<()> {
    let mut trigger = shutdown.listener();
    let mut drain = shutdown.listener();

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        drain.triggered().await;
    });

    let mut handle = tokio::spawn(server.into_future());

    tokio::select! {
        res = &mut handle => flatten(res),
        reason = trigger.triggered() => {
            tracing::info!(reason, "draining in-flight requests");
            match tokio::time::timeout(DRAIN_DEADLINE, &mut handle).await {
                Ok(res) => flatten(res),
                Err(_) => {
                    tracing::warn!(reason, "drain deadline exceeded; aborting in-flight requests");
                    handle.abort();
                    Ok(())
                }
            }
        }
    }
}

fn flatten(res: Result<std::io::Result<()>, tokio::task::JoinError>) -> std::io::Result<()> {
    match res {
        Ok(inner) => inner,
        Err(join) => Err(std::io::Error::other(join)),
    }
}

/// The catch-all: match a route and run it through the pipeline.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response<Body> {
    let path = req.uri().path().to_string();
    match state.table.match_path(&path) {
        None => {
            let mut response = respond::not_found();
            response
                .extensions_mut()
                .insert(RouteLabel(UNKNOWN_ROUTE.to_string()));
            response
        }
        Some(route) => {
            let name = route.name.clone();
            let mut response = pipeline::dispatch(&state, route, remote, req).await;
            response.extensions_mut().insert(RouteLabel(name));
            response
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_handler(State(state): State<AppState>) -> Response<Body> {
    match &state.metrics {
        Some(handle) => {
            let mut response = Response::new(Body::from(handle.render()));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response<Body> {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("panic");
    tracing::error!(panic = %detail, "handler panicked");
    respond::internal_error()
}
