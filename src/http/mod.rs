//! HTTP surface: server assembly, the per-route pipeline, and middleware.
//!
//! # Data Flow
//! ```text
//! request
//!     → request_id.rs (echo or generate X-Request-Id)
//!     → observe.rs (status/byte observer → metrics + access log)
//!     → server.rs gateway handler (route match)
//!     → pipeline.rs (size cap → rate limit → auth → concurrency
//!        → breaker → proxy)
//! ```
//!
//! `/healthz` and `/metrics` are served beside the pipeline and are not
//! instrumented; admin views live under `/-/` behind the admin key.

pub mod observe;
pub mod pipeline;
pub mod request_id;
pub mod respond;
pub mod server;

pub use server::AppState;
