//! apigw: an HTTP reverse-proxy gateway.
//!
//! The gateway sits in front of a fleet of backend services and applies
//! per-route protections before forwarding:
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │                   GATEWAY                    │
//!                        │                                              │
//!   Client Request       │  request id → route tag → metrics/log       │
//!   ─────────────────────┼─▶ rate limit → auth → concurrency gate      │
//!                        │     → circuit breaker → reverse proxy ──────┼──▶ Upstream
//!                        │                                              │
//!                        │  ┌────────────────────────────────────────┐ │
//!                        │  │         Cross-Cutting Concerns         │ │
//!                        │  │  config   observability   lifecycle    │ │
//!                        │  │  admin views   resilience engines      │ │
//!                        │  └────────────────────────────────────────┘ │
//!                        └──────────────────────────────────────────────┘
//! ```
//!
//! Rejections produced by auth, rate limiting, or the concurrency gate never
//! count toward circuit-breaker failures; only the proxy phase's status codes
//! feed the breaker.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod proxy;
pub mod routing;

// Protection engines
pub mod auth;
pub mod ratelimit;
pub mod resilience;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;

pub use config::Config;
pub use http::server::AppState;
