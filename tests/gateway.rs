//! End-to-end scenarios through a spawned gateway and mock upstreams.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

use apigw::auth::HmacValidator;
use apigw::http::server::AuthBackend;
use apigw::ratelimit::{Decision, Limiter, LimiterError};

use common::*;

#[tokio::test]
async fn longest_prefix_routing() {
    let a = spawn_upstream(echo_upstream("a")).await;
    let b = spawn_upstream(echo_upstream("b")).await;
    let base = spawn_gateway(state(config_with(vec![
        route("a", "/api/", a),
        route("b", "/api/users/", b),
    ])))
    .await;

    let body: Value = reqwest::get(format!("{base}/api/users/me"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["service"], "b");

    let body: Value = reqwest::get(format!("{base}/api/other"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["service"], "a");
}

#[tokio::test]
async fn strip_prefix_rewrites_the_forwarded_path() {
    let upstream = spawn_upstream(echo_upstream("users")).await;
    let mut r = route("users", "/api/users/", upstream);
    r.strip_prefix = "/api".to_string();
    let base = spawn_gateway(state(config_with(vec![r]))).await;

    let body: Value = reqwest::get(format!("{base}/api/users/me"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["path"], "/users/me");
}

#[tokio::test]
async fn unmatched_path_is_404() {
    let upstream = spawn_upstream(echo_upstream("a")).await;
    let base = spawn_gateway(state(config_with(vec![route("a", "/api/", upstream)]))).await;

    let resp = reqwest::get(format!("{base}/elsewhere")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn request_id_is_echoed_or_generated() {
    let upstream = spawn_upstream(echo_upstream("a")).await;
    let base = spawn_gateway(state(config_with(vec![route("a", "/api/", upstream)]))).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/api/x"))
        .header("x-request-id", "rid-42")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "rid-42");

    let resp = client.get(format!("{base}/api/x")).send().await.unwrap();
    assert!(!resp.headers()["x-request-id"].is_empty());
}

#[tokio::test]
async fn upstream_headers_survive_the_round_trip() {
    let upstream = spawn_upstream(
        axum::Router::new().fallback(|| async { ([("x-upstream-tag", "v7")], "payload") }),
    )
    .await;
    let base = spawn_gateway(state(config_with(vec![route("a", "/api/", upstream)]))).await;

    let resp = reqwest::get(format!("{base}/api/x")).await.unwrap();
    assert_eq!(resp.headers()["x-upstream-tag"], "v7");
    assert_eq!(resp.text().await.unwrap(), "payload");
}

#[tokio::test]
async fn rate_limit_rejects_with_429_and_hints() {
    let upstream = spawn_upstream(echo_upstream("pub")).await;
    let mut r = route("pub", "/public/", upstream);
    r.rate_limit = apigw::config::schema::RouteRateLimitConfig {
        enabled: true,
        rps: 1.0,
        burst: 2.0,
        scope: "ip".to_string(),
    };
    let base = spawn_gateway(state(config_with(vec![r]))).await;
    let client = reqwest::Client::new();

    let mut statuses = Vec::new();
    let mut first_reject = None;
    for _ in 0..12 {
        let resp = client
            .get(format!("{base}/public/x"))
            .send()
            .await
            .unwrap();
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS && first_reject.is_none() {
            first_reject = Some((
                resp.headers()["retry-after"]
                    .to_str()
                    .unwrap()
                    .parse::<u64>()
                    .unwrap(),
                resp.headers()["x-ratelimit-route"].to_str().unwrap().to_string(),
                resp.json::<Value>().await.unwrap(),
            ));
            statuses.push(429);
        } else {
            statuses.push(resp.status().as_u16());
        }
    }

    assert_eq!(&statuses[..2], &[200, 200], "burst of two admits the first two");
    let (retry_after, rl_route, body) =
        first_reject.expect("at least one request should be rejected");
    assert!(retry_after >= 1);
    assert_eq!(rl_route, "pub");
    assert_eq!(body["error"], "rate_limited");
    assert_eq!(body["scope"], "ip");
}

#[tokio::test]
async fn concurrency_gate_sheds_load_with_503() {
    let upstream = spawn_upstream(sleepy_upstream(Duration::from_millis(150))).await;
    let mut r = route("slow", "/slow/", upstream);
    r.concurrency.max_in_flight = 1;
    let base = spawn_gateway(state(config_with(vec![r]))).await;
    let client = reqwest::Client::new();

    let calls = (0..10).map(|_| {
        let client = client.clone();
        let url = format!("{base}/slow/x");
        async move {
            let resp = client.get(url).send().await.unwrap();
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap();
            (status, body)
        }
    });
    let results = futures::future::join_all(calls).await;

    let oks = results.iter().filter(|(s, _)| *s == 200).count();
    let busy = results
        .iter()
        .filter(|(s, b)| *s == 503 && b.contains("\"error\":\"too_busy\""))
        .count();
    assert!(oks >= 1, "at least one request should pass the gate");
    assert!(busy >= 1, "at least one request should be shed");
}

#[tokio::test]
async fn breaker_opens_then_recovers_after_the_window() {
    let upstream = spawn_upstream(scripted_upstream(|n| {
        if n < 2 {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        }
    }))
    .await;
    let mut r = route("flaky", "/flaky/", upstream);
    r.circuit_breaker = apigw::config::schema::RouteCircuitBreakerConfig {
        enabled: true,
        failure_threshold: 2,
        open_seconds: 1,
        half_open_max_in_flight: 1,
    };
    let base = spawn_gateway(state(config_with(vec![r]))).await;
    let client = reqwest::Client::new();
    let url = format!("{base}/flaky/x");

    // Two upstream failures pass through and trip the breaker.
    assert_eq!(client.get(&url).send().await.unwrap().status(), 500);
    assert_eq!(client.get(&url).send().await.unwrap().status(), 500);

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 503);
    let retry_after: u64 = resp.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .expect("circuit_open rejections always carry Retry-After");
    assert!(retry_after <= 1, "hint is bounded by the open window");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "circuit_open");

    // After the open window a probe reaches the recovered upstream.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(client.get(&url).send().await.unwrap().status(), 200);
    // And the breaker is closed again for regular traffic.
    assert_eq!(client.get(&url).send().await.unwrap().status(), 200);
}

fn hmac_auth(secret: &str) -> Option<AuthBackend> {
    Some(AuthBackend::Hmac(HmacValidator::new(
        secret,
        Duration::from_secs(30),
    )))
}

fn mint_hs256(secret: &str, sub: &str) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    encode(
        &Header::new(Algorithm::HS256),
        &json!({"sub": sub, "exp": now + 3600}),
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[tokio::test]
async fn auth_rejections_do_not_trip_the_breaker() {
    let upstream = spawn_upstream(echo_upstream("secure")).await;
    let mut r = route("secure", "/secure/", upstream);
    r.auth_required = true;
    r.circuit_breaker = apigw::config::schema::RouteCircuitBreakerConfig {
        enabled: true,
        failure_threshold: 1,
        open_seconds: 60,
        half_open_max_in_flight: 1,
    };
    let base = spawn_gateway(state_with(
        config_with(vec![r]),
        memory_limiter(),
        hmac_auth("secret-1"),
        None,
    ))
    .await;
    let client = reqwest::Client::new();
    let url = format!("{base}/secure/x");

    for _ in 0..3 {
        let resp = client
            .get(&url)
            .header("authorization", "Bearer not-a-token")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "unauthorized");
    }

    // With threshold 1, any counted failure would have opened the breaker.
    let resp = client
        .get(&url)
        .header(
            "authorization",
            format!("Bearer {}", mint_hs256("secret-1", "user_123")),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

struct FailingLimiter;

#[async_trait]
impl Limiter for FailingLimiter {
    async fn allow(&self, _: &str, _: f64, _: f64, _: u32) -> Result<Decision, LimiterError> {
        Err(LimiterError::BadReply("store unreachable".to_string()))
    }

    async fn close(&self) {}
}

#[tokio::test]
async fn limiter_outage_fails_open() {
    let upstream = spawn_upstream(echo_upstream("pub")).await;
    let mut r = route("pub", "/public/", upstream);
    r.rate_limit = apigw::config::schema::RouteRateLimitConfig {
        enabled: true,
        rps: 1.0,
        burst: 1.0,
        scope: "ip".to_string(),
    };
    let base = spawn_gateway(state_with(
        config_with(vec![r]),
        Arc::new(FailingLimiter),
        None,
        None,
    ))
    .await;

    for _ in 0..5 {
        let resp = reqwest::get(format!("{base}/public/x")).await.unwrap();
        assert_eq!(resp.status(), 200, "limiter outage must not reject traffic");
    }
}

#[tokio::test]
async fn two_gateways_share_one_limiter_without_over_granting() {
    let upstream = spawn_upstream(echo_upstream("pub")).await;
    let limiter = memory_limiter();

    let make_route = || {
        let mut r = route("shared", "/public/", upstream);
        r.rate_limit = apigw::config::schema::RouteRateLimitConfig {
            enabled: true,
            rps: 0.01,
            burst: 2.0,
            scope: "ip".to_string(),
        };
        r
    };
    let gw_a = spawn_gateway(state_with(
        config_with(vec![make_route()]),
        limiter.clone(),
        None,
        None,
    ))
    .await;
    let gw_b = spawn_gateway(state_with(
        config_with(vec![make_route()]),
        limiter,
        None,
        None,
    ))
    .await;
    let client = reqwest::Client::new();

    let mut granted = 0;
    for i in 0..6 {
        let base = if i % 2 == 0 { &gw_a } else { &gw_b };
        let resp = client
            .get(format!("{base}/public/x"))
            .send()
            .await
            .unwrap();
        if resp.status().is_success() {
            granted += 1;
        }
    }
    assert_eq!(granted, 2, "the shared burst must be granted exactly once");
}

#[tokio::test]
async fn oversized_body_is_rejected_with_413() {
    let upstream = spawn_upstream(echo_upstream("a")).await;
    let mut config = config_with(vec![route("a", "/api/", upstream)]);
    config.server.max_body_bytes = 1024;
    let base = spawn_gateway(state(config)).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/upload"))
        .body(vec![0u8; 4096])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "request_too_large");
}

#[tokio::test]
async fn healthz_always_answers() {
    let upstream = spawn_upstream(echo_upstream("a")).await;
    let base = spawn_gateway(state(config_with(vec![route("a", "/api/", upstream)]))).await;

    let resp = reqwest::get(format!("{base}/healthz")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn admin_endpoints_absent_without_key() {
    let upstream = spawn_upstream(echo_upstream("a")).await;
    let base = spawn_gateway(state(config_with(vec![route("a", "/api/", upstream)]))).await;

    let resp = reqwest::get(format!("{base}/-/status")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_endpoints_guarded_by_key() {
    let upstream = spawn_upstream(echo_upstream("a")).await;
    let mut r = route("a", "/api/", upstream);
    r.concurrency.max_in_flight = 4;
    let base = spawn_gateway(state_with(
        config_with(vec![r]),
        memory_limiter(),
        None,
        Some("sekrit".to_string()),
    ))
    .await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/-/status")).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{base}/-/status"))
        .header("x-admin-key", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");

    let resp = client
        .get(format!("{base}/-/status"))
        .header("x-admin-key", "sekrit")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["routes_configured"], 1);
    assert_eq!(body["rate_backend"], "memory");

    let body: Value = client
        .get(format!("{base}/-/routes"))
        .header("x-admin-key", "sekrit")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body[0]["name"], "a");

    let body: Value = client
        .get(format!("{base}/-/limits"))
        .header("x-admin-key", "sekrit")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body[0]["route"], "a");
    assert_eq!(body[0]["concurrency"]["max_in_flight"], 4);
}

#[tokio::test]
async fn metrics_endpoint_renders_prometheus_text() {
    use apigw::http::server::AppState;
    use metrics_exporter_prometheus::PrometheusHandle;
    use std::sync::OnceLock;

    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    let handle = HANDLE
        .get_or_init(|| apigw::observability::metrics::install().unwrap())
        .clone();

    let upstream = spawn_upstream(echo_upstream("a")).await;
    let config = config_with(vec![route("a", "/api/", upstream)]);
    let state = AppState::new(config, memory_limiter(), "memory", None, None, Some(handle)).unwrap();
    let base = spawn_gateway(state).await;

    reqwest::get(format!("{base}/api/x")).await.unwrap();
    // The request counter is recorded when the response body completes.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let resp = reqwest::get(format!("{base}/metrics")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.contains("apigw_http_requests_total"));
}

#[tokio::test]
async fn rate_limit_headers_present_on_success() {
    let upstream = spawn_upstream(echo_upstream("pub")).await;
    let mut r = route("pub", "/public/", upstream);
    r.rate_limit = apigw::config::schema::RouteRateLimitConfig {
        enabled: true,
        rps: 5.0,
        burst: 10.0,
        scope: "ip".to_string(),
    };
    let base = spawn_gateway(state(config_with(vec![r]))).await;

    let resp = reqwest::get(format!("{base}/public/x")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-ratelimit-route"], "pub");
    assert_eq!(resp.headers()["x-ratelimit-scope"], "ip");
    assert_eq!(resp.headers()["x-ratelimit-limit-rps"], "5");
    assert_eq!(resp.headers()["x-ratelimit-burst"], "10");
    assert_eq!(resp.headers()["x-ratelimit-remaining"], "9");
}
