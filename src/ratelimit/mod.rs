//! Token-bucket rate limiting with pluggable backends.
//!
//! # Data Flow
//! ```text
//! pipeline
//!     → Limiter::allow(key, rps, burst, cost)
//!         memory.rs: dashmap bucket, per-entry lock
//!         redis.rs:  single atomic Lua script on the shared store
//!     → Decision { allowed, remaining, retry_after_seconds }
//! ```
//!
//! # Design Decisions
//! - Decision semantics are identical across backends; only isolation differs
//! - The remote decision is one server-side script so horizontally scaled
//!   gateways cannot each grant the last token
//! - Costs are integer-valued; a request costs 1 token
//! - Backend errors are surfaced to the caller, which fails open

pub mod memory;
pub mod redis;

use async_trait::async_trait;

pub use self::memory::MemoryLimiter;
pub use self::redis::RedisLimiter;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// Tokens left in the bucket after this decision.
    pub remaining: f64,
    /// Seconds until a retry could succeed; 0 when allowed.
    pub retry_after_seconds: u64,
    pub limit_rps: f64,
    pub burst: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("unexpected script reply: {0}")]
    BadReply(String),
}

/// A token-bucket rate limiter.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Decide whether a request costing `cost` tokens may proceed.
    async fn allow(
        &self,
        key: &str,
        rps: f64,
        burst: f64,
        cost: u32,
    ) -> Result<Decision, LimiterError>;

    /// Stop background work owned by the limiter.
    async fn close(&self);
}

/// Retry hint for a bucket missing `missing` tokens at `rps` refill.
///
/// `ceil(missing / rps)` seconds, clamped to 1 when the bucket never refills.
pub(crate) fn retry_after_seconds(missing: f64, rps: f64) -> u64 {
    if rps > 0.0 {
        (missing / rps).ceil().max(1.0) as u64
    } else {
        1
    }
}
