//! Admin-key guard.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::Response;
use axum::middleware::Next;

use crate::http::respond;
use crate::http::server::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Gate admin endpoints on the configured key.
///
/// No configured key means the endpoints do not exist (404); a configured
/// key that is missing or wrong yields 401.
pub async fn require_admin_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response<Body> {
    let Some(expected) = state.admin_key.as_deref() else {
        return respond::not_found();
    };

    let presented = req
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if presented != Some(expected) {
        return respond::unauthorized();
    }

    next.run(req).await
}
