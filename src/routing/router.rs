//! Longest-prefix route table.

use url::Url;

use crate::config::schema::{
    RouteCircuitBreakerConfig, RouteConcurrencyConfig, RouteConfig, RouteRateLimitConfig,
};

/// A compiled route. Immutable after startup.
#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
    pub path_prefix: String,
    pub upstream: Url,
    pub strip_prefix: String,
    pub auth_required: bool,
    pub rate_limit: RouteRateLimitConfig,
    pub concurrency: RouteConcurrencyConfig,
    pub circuit_breaker: RouteCircuitBreakerConfig,
}

impl Route {
    pub fn from_config(cfg: &RouteConfig) -> Result<Self, RouterError> {
        let upstream = Url::parse(&cfg.upstream).map_err(|e| RouterError::InvalidUpstream {
            route: cfg.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            name: cfg.name.clone(),
            path_prefix: cfg.matcher.path_prefix.clone(),
            upstream,
            strip_prefix: cfg.strip_prefix.clone(),
            auth_required: cfg.auth_required,
            rate_limit: cfg.rate_limit.clone(),
            concurrency: cfg.concurrency.clone(),
            circuit_breaker: cfg.circuit_breaker.clone(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no routes configured")]
    NoRoutes,

    #[error("invalid upstream url for route {route:?}: {reason}")]
    InvalidUpstream { route: String, reason: String },
}

/// Immutable route table ordered for longest-prefix matching.
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Build a table from compiled routes. An empty list is an error.
    pub fn new(mut routes: Vec<Route>) -> Result<Self, RouterError> {
        if routes.is_empty() {
            return Err(RouterError::NoRoutes);
        }
        // Stable sort keeps declaration order for equal-length prefixes.
        routes.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));
        Ok(Self { routes })
    }

    pub fn from_configs(configs: &[RouteConfig]) -> Result<Self, RouterError> {
        let routes = configs
            .iter()
            .map(Route::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(routes)
    }

    /// Return the route with the longest prefix matching `path`, if any.
    pub fn match_path(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|r| path.starts_with(&r.path_prefix))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Remove `strip` from the head of `path` when it matches.
///
/// Stripping everything yields "/" so the upstream always receives a rooted
/// path. A non-matching head leaves the path unchanged.
pub fn strip_path(path: &str, strip: &str) -> String {
    if strip.is_empty() {
        return path.to_string();
    }
    match path.strip_prefix(strip) {
        Some("") => "/".to_string(),
        Some(rest) => rest.to_string(),
        None => path.to_string(),
    }
}
