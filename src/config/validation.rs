//! Configuration validation logic.

use std::collections::HashSet;

use url::Url;

use crate::config::schema::Config;
use crate::net::cidr::CidrSet;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "validation error: {}", self.0)
    }
}

/// Validate a Config for semantic correctness.
///
/// All violations are collected so operators can fix a config in one pass.
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.addr.trim().is_empty() {
        errors.push(ValidationError("server.addr is required".to_string()));
    }

    if let Err(e) = CidrSet::parse(&config.server.trusted_proxies) {
        errors.push(ValidationError(format!("server.trusted_proxies: {e}")));
    }

    if config.routes.is_empty() {
        errors.push(ValidationError("at least one route is required".to_string()));
    }

    let mut seen_names: HashSet<&str> = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        let idx = format!("routes[{i}]");

        let name = route.name.trim();
        if name.is_empty() {
            errors.push(ValidationError(format!("{idx}.name is required")));
        } else if !seen_names.insert(name) {
            errors.push(ValidationError(format!("duplicate route name: {name:?}")));
        }

        let prefix = route.matcher.path_prefix.trim();
        if prefix.is_empty() || !prefix.starts_with('/') {
            errors.push(ValidationError(format!(
                "{idx}.match.path_prefix must start with '/'"
            )));
        }

        if route.upstream.trim().is_empty() {
            errors.push(ValidationError(format!("{idx}.upstream is required")));
        } else {
            match Url::parse(&route.upstream) {
                Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
                Ok(u) => errors.push(ValidationError(format!(
                    "{idx}.upstream has unsupported scheme {:?}",
                    u.scheme()
                ))),
                Err(e) => errors.push(ValidationError(format!("{idx}.upstream invalid: {e}"))),
            }
        }

        if !route.strip_prefix.is_empty() && !route.strip_prefix.starts_with('/') {
            errors.push(ValidationError(format!(
                "{idx}.strip_prefix must start with '/' if set"
            )));
        }

        if route.rate_limit.enabled {
            if route.rate_limit.rps <= 0.0 {
                errors.push(ValidationError(format!(
                    "{idx}.rate_limit.rps must be > 0 when enabled"
                )));
            }
            if route.rate_limit.burst <= 0.0 {
                errors.push(ValidationError(format!(
                    "{idx}.rate_limit.burst must be > 0 when enabled"
                )));
            }
            let scope = route.rate_limit.scope.trim().to_ascii_lowercase();
            if scope != "ip" && scope != "user" {
                errors.push(ValidationError(format!(
                    "{idx}.rate_limit.scope must be 'ip' or 'user'"
                )));
            }
        }

        if route.circuit_breaker.enabled {
            if route.circuit_breaker.failure_threshold == 0 {
                errors.push(ValidationError(format!(
                    "{idx}.circuit_breaker.failure_threshold must be > 0"
                )));
            }
            if route.circuit_breaker.open_seconds == 0 {
                errors.push(ValidationError(format!(
                    "{idx}.circuit_breaker.open_seconds must be > 0"
                )));
            }
            if route.circuit_breaker.half_open_max_in_flight == 0 {
                errors.push(ValidationError(format!(
                    "{idx}.circuit_breaker.half_open_max_in_flight must be > 0"
                )));
            }
        }

        if route.auth_required && config.auth.mode.trim().is_empty() {
            errors.push(ValidationError(format!(
                "{idx}.auth_required is true but auth.mode is not configured"
            )));
        }
    }

    let backend = config.rate_limit.backend.trim().to_ascii_lowercase();
    if backend != "redis" && backend != "memory" {
        errors.push(ValidationError(
            "rate_limit.backend must be 'redis' or 'memory'".to_string(),
        ));
    }
    if backend == "redis" && config.rate_limit.redis.addr.trim().is_empty() {
        errors.push(ValidationError(
            "rate_limit.redis.addr is required when backend is redis".to_string(),
        ));
    }

    match config.auth.mode.trim().to_ascii_lowercase().as_str() {
        "" => {}
        "hmac" => {
            if config.auth.hmac_secret.trim().is_empty() {
                errors.push(ValidationError(
                    "auth.hmac_secret is required when auth.mode is hmac".to_string(),
                ));
            }
        }
        "jwks" => {
            if config.auth.jwks.url.trim().is_empty() {
                errors.push(ValidationError(
                    "auth.jwks.url is required when auth.mode is jwks".to_string(),
                ));
            } else if let Err(e) = Url::parse(&config.auth.jwks.url) {
                errors.push(ValidationError(format!("auth.jwks.url invalid: {e}")));
            }
        }
        other => {
            errors.push(ValidationError(format!(
                "auth.mode must be 'hmac' or 'jwks', got {other:?}"
            )));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::*;

    fn base_route(name: &str, prefix: &str) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            matcher: MatchConfig {
                path_prefix: prefix.into(),
            },
            upstream: "http://127.0.0.1:9001".into(),
            strip_prefix: String::new(),
            auth_required: false,
            rate_limit: RouteRateLimitConfig::default(),
            concurrency: RouteConcurrencyConfig::default(),
            circuit_breaker: RouteCircuitBreakerConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        let mut config = Config::default();
        config.routes.push(base_route("users", "/api/users/"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_routes_rejected() {
        let config = Config::default();
        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("at least one route")));
    }

    #[test]
    fn duplicate_route_names_rejected() {
        let mut config = Config::default();
        config.routes.push(base_route("users", "/a/"));
        config.routes.push(base_route("users", "/b/"));
        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("duplicate route name")));
    }

    #[test]
    fn unrooted_prefix_rejected() {
        let mut config = Config::default();
        config.routes.push(base_route("users", "api/"));
        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("path_prefix")));
    }

    #[test]
    fn rate_limit_invariants_enforced() {
        let mut config = Config::default();
        let mut route = base_route("users", "/api/");
        route.rate_limit = RouteRateLimitConfig {
            enabled: true,
            rps: 0.0,
            burst: 0.0,
            scope: "tenant".into(),
        };
        config.routes.push(route);
        let errs = validate_config(&config).unwrap_err();
        assert_eq!(
            errs.iter().filter(|e| e.0.contains("rate_limit")).count(),
            3
        );
    }

    #[test]
    fn breaker_with_zero_open_seconds_rejected() {
        let mut config = Config::default();
        let mut route = base_route("users", "/api/");
        route.circuit_breaker = RouteCircuitBreakerConfig {
            enabled: true,
            failure_threshold: 3,
            open_seconds: 0,
            half_open_max_in_flight: 1,
        };
        config.routes.push(route);
        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("open_seconds")));
    }

    #[test]
    fn auth_required_without_mode_rejected() {
        let mut config = Config::default();
        let mut route = base_route("users", "/api/");
        route.auth_required = true;
        config.routes.push(route);
        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("auth.mode")));
    }

    #[test]
    fn redis_backend_requires_addr() {
        let mut config = Config::default();
        config.routes.push(base_route("users", "/api/"));
        config.rate_limit.backend = "redis".into();
        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("redis.addr")));
    }
}
