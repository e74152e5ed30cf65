//! The per-route protection chain.
//!
//! Stages run strictly in order: body-size cap → rate limit → auth →
//! concurrency gate → circuit breaker → proxy. Client-visible rejections
//! short-circuit the remaining stages. Rate-limit headers computed up front
//! are merged onto whatever response ultimately leaves the pipeline, so
//! downstream rejections still carry them.

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request, Response};

use crate::auth::Subject;
use crate::http::respond;
use crate::http::server::AppState;
use crate::proxy;
use crate::resilience::Admission;
use crate::routing::{strip_path, Route};

/// Run one request through the full chain for its matched route.
pub async fn dispatch(
    state: &AppState,
    route: &Route,
    remote: SocketAddr,
    req: Request<Body>,
) -> Response<Body> {
    let mut rl_headers = HeaderMap::new();
    let mut response = run_stages(state, route, remote, req, &mut rl_headers).await;
    for (name, value) in rl_headers.iter() {
        response.headers_mut().insert(name, value.clone());
    }
    response
}

async fn run_stages(
    state: &AppState,
    route: &Route,
    remote: SocketAddr,
    mut req: Request<Body>,
    rl_headers: &mut HeaderMap,
) -> Response<Body> {
    // ---- Request-size cap
    if state.max_body_bytes > 0 {
        let declared = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if matches!(declared, Some(len) if len > state.max_body_bytes) {
            return respond::request_too_large();
        }
        // Unknown lengths are capped while streaming; the proxy maps the
        // overrun to 413.
        let limit = state.max_body_bytes as usize;
        req = req.map(|body| Body::new(http_body_util::Limited::new(body, limit)));
    }

    // ---- Rate limit
    if route.rate_limit.enabled {
        match apply_rate_limit(
            state,
            route,
            remote,
            req.extensions().get::<Subject>(),
            req.headers(),
            rl_headers,
        )
        .await
        {
            Ok(()) => {}
            Err(rejection) => return rejection,
        }
    }

    // ---- Authentication
    if route.auth_required {
        let Some(auth) = state.auth.as_ref() else {
            // Validation rejects this wiring; never reachable from config.
            tracing::error!(route = %route.name, "auth required but no validator configured");
            return respond::unauthorized();
        };
        match auth.validator().validate_bearer(req.headers()).await {
            Ok(subject) => {
                req.extensions_mut().insert(Subject(subject));
            }
            Err(err) => {
                tracing::debug!(route = %route.name, error = %err, "bearer rejected");
                return respond::unauthorized();
            }
        }
    }

    // ---- Concurrency gate
    let semaphore = state.semaphores.get(&route.name);
    let _permit = match semaphore {
        Some(sem) if sem.enabled() => match sem.try_acquire() {
            Some(permit) => Some(permit),
            None => return respond::too_busy(&route.name, sem.cap()),
        },
        _ => None,
    };

    // ---- Circuit breaker + proxy
    let path = strip_path(req.uri().path(), &route.strip_prefix);
    let client_ip = state.ip_resolver.client_ip(remote, req.headers());
    let response_header_timeout = Duration::from_secs(state.response_header_timeout_seconds);

    let breaker = state
        .breakers
        .get(&route.name)
        .filter(|_| route.circuit_breaker.enabled);

    match breaker {
        Some(breaker) => match breaker.acquire() {
            Admission::Rejected { retry_after } => {
                let mut response = respond::circuit_open(&route.name);
                // The remaining window may round down to zero; the header is
                // still emitted so clients always get a hint.
                let secs = retry_after.as_millis().div_ceil(1000) as u64;
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from_str(&secs.to_string())
                        .unwrap_or_else(|_| HeaderValue::from_static("0")),
                );
                response
            }
            Admission::Admitted(permit) => {
                let response = proxy::forward(
                    &state.client,
                    route,
                    response_header_timeout,
                    client_ip,
                    &path,
                    req,
                )
                .await;
                permit.complete(response.status().as_u16() < 500);
                response
            }
        },
        None => {
            proxy::forward(
                &state.client,
                route,
                response_header_timeout,
                client_ip,
                &path,
                req,
            )
            .await
        }
    }
}

/// Consult the limiter; fill `rl_headers` on a decision, return the 429 on
/// rejection. Limiter errors fail open.
async fn apply_rate_limit(
    state: &AppState,
    route: &Route,
    remote: SocketAddr,
    subject: Option<&Subject>,
    headers: &HeaderMap,
    rl_headers: &mut HeaderMap,
) -> Result<(), Response<Body>> {
    let spec = &route.rate_limit;

    // Scope "user" keys on the authenticated subject when one is already
    // present and otherwise falls back to the client address.
    let (key, scope_tag) = match (spec.scope.eq_ignore_ascii_case("user"), subject) {
        (true, Some(Subject(sub))) => (format!("rl:{}:u:{sub}", route.name), "user"),
        _ => {
            let ip = state.ip_resolver.client_ip(remote, headers);
            (format!("rl:{}:ip:{ip}", route.name), "ip")
        }
    };

    let decision = match state.limiter.allow(&key, spec.rps, spec.burst, 1).await {
        Ok(decision) => decision,
        Err(err) => {
            tracing::warn!(route = %route.name, error = %err, "rate limiter unavailable; failing open");
            metrics::counter!(
                "apigw_rate_limiter_errors_total",
                "backend" => state.limiter_backend.clone()
            )
            .increment(1);
            return Ok(());
        }
    };

    insert_header(rl_headers, "x-ratelimit-route", &route.name);
    insert_header(rl_headers, "x-ratelimit-scope", scope_tag);
    insert_header(rl_headers, "x-ratelimit-limit-rps", &trim_float(decision.limit_rps));
    insert_header(rl_headers, "x-ratelimit-burst", &trim_float(decision.burst));
    if decision.remaining > 0.0 {
        insert_header(rl_headers, "x-ratelimit-remaining", &trim_float(decision.remaining));
    }

    if decision.allowed {
        return Ok(());
    }

    let retry = decision.retry_after_seconds;
    insert_header(rl_headers, "retry-after", &retry.to_string());
    let reset = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + retry;
    insert_header(rl_headers, "x-ratelimit-reset", &reset.to_string());

    Err(respond::rate_limited(&route.name, scope_tag, retry))
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.insert(name, v);
    }
}

/// Render a rate as its shortest decimal form ("1", "2.5").
fn trim_float(v: f64) -> String {
    let s = format!("{v:.2}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() {
        "0".to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_float_drops_trailing_zeroes() {
        assert_eq!(trim_float(1.0), "1");
        assert_eq!(trim_float(2.5), "2.5");
        assert_eq!(trim_float(0.25), "0.25");
        assert_eq!(trim_float(0.0), "0");
    }
}
