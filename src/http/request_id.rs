//! Correlation-id stamping.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id carried in request extensions.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Echo an inbound X-Request-Id or generate a fresh one, and reflect it on
/// the response.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let rid = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    req.extensions_mut().insert(RequestId(rid.clone()));

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&rid) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
