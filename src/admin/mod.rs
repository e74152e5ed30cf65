//! Read-only admin views.
//!
//! Exposes snapshot state of the route table, limiter wiring, breakers, and
//! the JWKS cache under `/-/`, guarded by the `X-Admin-Key` header. When no
//! admin key is configured the endpoints answer 404, as if absent.

pub mod auth;
pub mod handlers;

use axum::middleware;
use axum::routing::get;
use axum::Router;

use crate::http::server::AppState;

/// Admin sub-router; the caller supplies the shared state.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/-/status", get(handlers::status))
        .route("/-/routes", get(handlers::routes))
        .route("/-/auth", get(handlers::auth))
        .route("/-/limits", get(handlers::limits))
        .layer(middleware::from_fn_with_state(
            state,
            auth::require_admin_key,
        ))
}
