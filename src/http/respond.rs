//! JSON rejection bodies shared by the pipeline stages.

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};
use serde_json::{json, Value};

pub fn json_response(status: StatusCode, body: Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

pub fn unauthorized() -> Response<Body> {
    json_response(StatusCode::UNAUTHORIZED, json!({"error": "unauthorized"}))
}

pub fn not_found() -> Response<Body> {
    let mut response = Response::new(Body::from("404 page not found\n"));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

pub fn rate_limited(route: &str, scope: &str, retry_after_seconds: u64) -> Response<Body> {
    json_response(
        StatusCode::TOO_MANY_REQUESTS,
        json!({
            "error": "rate_limited",
            "route": route,
            "scope": scope,
            "retry_after_seconds": retry_after_seconds,
        }),
    )
}

pub fn too_busy(route: &str, max_in_flight: usize) -> Response<Body> {
    json_response(
        StatusCode::SERVICE_UNAVAILABLE,
        json!({
            "error": "too_busy",
            "message": "route is at max concurrency",
            "route": route,
            "max_in_flight": max_in_flight,
        }),
    )
}

pub fn circuit_open(route: &str) -> Response<Body> {
    json_response(
        StatusCode::SERVICE_UNAVAILABLE,
        json!({
            "error": "circuit_open",
            "message": "upstream temporarily unavailable",
            "route": route,
        }),
    )
}

pub fn bad_gateway(message: &str) -> Response<Body> {
    json_response(StatusCode::BAD_GATEWAY, json!({"error": message}))
}

pub fn request_too_large() -> Response<Body> {
    json_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        json!({"error": "request_too_large"}),
    )
}

pub fn internal_error() -> Response<Body> {
    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({"error": "internal_error"}),
    )
}
