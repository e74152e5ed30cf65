//! Resilience subsystem: upstream-failure isolation and load shedding.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → semaphore.rs (bounded in-flight per route, fast-fail on full)
//!     → circuit_breaker.rs (admit/reject, observe final status)
//!     → proxy
//! ```
//!
//! # Design Decisions
//! - The concurrency gate sits outside the breaker so queue-overflow
//!   rejections never mark the upstream unhealthy
//! - The breaker counts only 5xx; client errors describe the client
//! - Both engines hand out RAII permits so cancelled requests cannot leak
//!   slots or corrupt counters

pub mod circuit_breaker;
pub mod semaphore;

pub use circuit_breaker::{Admission, BreakerConfig, BreakerStats, CircuitBreaker};
pub use semaphore::Semaphore;
