//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from YAML.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// Listener settings (bind address, timeouts, trusted proxies, caps).
    pub server: ServerConfig,

    /// Upstream transport tuning shared by all routes.
    pub upstream: UpstreamConfig,

    /// Bearer-token authentication settings.
    pub auth: AuthConfig,

    /// Rate-limiter backend selection and tuning.
    pub rate_limit: RateLimitBackendConfig,

    /// Route definitions mapping path prefixes to upstreams.
    pub routes: Vec<RouteConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub addr: String,

    /// CIDRs (or bare IPs) of proxies whose forwarded headers are trusted.
    pub trusted_proxies: Vec<String>,

    /// Maximum accepted request-header bytes.
    pub max_header_bytes: usize,

    /// Maximum accepted request-body bytes.
    pub max_body_bytes: u64,

    pub read_timeout_seconds: u64,
    pub write_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub read_header_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            trusted_proxies: Vec::new(),
            max_header_bytes: 1 << 20,
            max_body_bytes: 1 << 20,
            read_timeout_seconds: 15,
            write_timeout_seconds: 30,
            idle_timeout_seconds: 60,
            read_header_timeout_seconds: 5,
        }
    }
}

/// Upstream transport configuration.
///
/// `tls_handshake_timeout_seconds` is accepted for operator familiarity but
/// the TLS handshake is bounded by the connect timeout plus the
/// response-header timeout rather than a dedicated deadline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub dial_timeout_seconds: u64,
    pub tls_handshake_timeout_seconds: u64,
    pub response_header_timeout_seconds: u64,
    pub idle_conn_timeout_seconds: u64,
    pub max_idle_conns_per_host: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            dial_timeout_seconds: 3,
            tls_handshake_timeout_seconds: 5,
            response_header_timeout_seconds: 10,
            idle_conn_timeout_seconds: 90,
            max_idle_conns_per_host: 64,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// "hmac" | "jwks" | "" (no validator; routes must not require auth).
    pub mode: String,

    /// Shared secret for HS256 (hmac mode).
    pub hmac_secret: String,

    /// JWKS mode settings.
    pub jwks: JwksAuthConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JwksAuthConfig {
    /// HTTPS URL of the JWKS document.
    pub url: String,

    pub cache_ttl_seconds: u64,
    pub http_timeout_seconds: u64,

    /// Clock-skew tolerance applied to `exp` and `nbf`.
    pub leeway_seconds: u64,

    /// Exact-match issuer allowlist; empty = not enforced.
    pub issuers: Vec<String>,

    /// Exact-match audience allowlist; empty = not enforced.
    pub audiences: Vec<String>,
}

impl Default for JwksAuthConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            cache_ttl_seconds: 300,
            http_timeout_seconds: 3,
            leeway_seconds: 30,
            issuers: Vec::new(),
            audiences: Vec::new(),
        }
    }
}

/// Rate-limiter backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitBackendConfig {
    /// "redis" | "memory".
    pub backend: String,

    pub redis: RedisConfig,
    pub memory: MemoryLimiterConfig,
}

impl Default for RateLimitBackendConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            redis: RedisConfig::default(),
            memory: MemoryLimiterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RedisConfig {
    /// Host:port of the shared store.
    pub addr: String,
    pub password: String,
    pub db: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryLimiterConfig {
    /// Idle buckets older than this are evicted.
    pub ttl_seconds: u64,

    /// Sweep interval for the eviction task.
    pub cleanup_seconds: u64,
}

impl Default for MemoryLimiterConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            cleanup_seconds: 60,
        }
    }
}

/// A single route: path prefix → upstream, with per-route protections.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Unique route identifier used for metrics, logs, and limiter keys.
    pub name: String,

    /// Match condition.
    #[serde(rename = "match")]
    pub matcher: MatchConfig,

    /// Absolute base URL of the upstream service.
    pub upstream: String,

    /// Path head removed before forwarding, when it matches.
    #[serde(default)]
    pub strip_prefix: String,

    /// Require a valid bearer token.
    #[serde(default)]
    pub auth_required: bool,

    #[serde(default)]
    pub rate_limit: RouteRateLimitConfig,

    #[serde(default)]
    pub concurrency: RouteConcurrencyConfig,

    #[serde(default)]
    pub circuit_breaker: RouteCircuitBreakerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MatchConfig {
    /// Rooted path prefix; longest prefix wins.
    pub path_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouteRateLimitConfig {
    pub enabled: bool,

    /// Sustained refill rate, tokens per second.
    pub rps: f64,

    /// Bucket capacity.
    pub burst: f64,

    /// "ip" | "user".
    pub scope: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouteConcurrencyConfig {
    /// 0 disables the gate.
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouteCircuitBreakerConfig {
    pub enabled: bool,

    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,

    /// How long the breaker stays open before probing.
    pub open_seconds: u64,

    /// Concurrent trial requests admitted while half-open.
    pub half_open_max_in_flight: u32,
}
