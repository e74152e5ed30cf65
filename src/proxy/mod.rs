//! Reverse-proxy forwarding.
//!
//! # Data Flow
//! ```text
//! pipeline (route matched, protections passed)
//!     → upstream.rs: rewrite URI (strip prefix already applied),
//!       set Host to the upstream authority, scrub hop-by-hop headers,
//!       append X-Forwarded-For
//!     → shared hyper client (hardened timeouts, bounded idle pool)
//!     → upstream response, hop-by-hop headers scrubbed again
//! ```
//!
//! # Design Decisions
//! - One shared client for all routes; per-route state lives elsewhere
//! - Transport failures become 502 with an informational body; a request
//!   body that hit the configured size cap becomes 413
//! - The response-header timeout bounds time-to-first-byte, not the body

pub mod upstream;

pub use upstream::{build_client, forward, HttpClient};
