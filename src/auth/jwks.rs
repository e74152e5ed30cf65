//! JWKS-based bearer-token validation.
//!
//! RSA public keys are fetched from a remote JWKS document, indexed by
//! `kid`, and cached. A refresh-serialization mutex with a post-acquire
//! freshness re-check prevents N concurrent validations from each issuing a
//! network fetch when a key rotates. On refresh failure the stale cache is
//! retained and served when it can satisfy the lookup.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::http::HeaderMap;
use jsonwebtoken::{decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::auth::{extract_bearer, map_jwt_error, AuthError, BearerValidator, ClaimSet};

/// Tuning knobs for the validator.
#[derive(Debug, Clone)]
pub struct JwksOptions {
    pub http_timeout: Duration,
    pub cache_ttl: Duration,
    pub leeway: Duration,
    pub issuers: Vec<String>,
    pub audiences: Vec<String>,
    pub algorithms: Vec<Algorithm>,
}

impl Default for JwksOptions {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(3),
            cache_ttl: Duration::from_secs(300),
            leeway: Duration::from_secs(30),
            issuers: Vec::new(),
            audiences: Vec::new(),
            algorithms: vec![Algorithm::RS256],
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwksDoc {
    #[serde(default)]
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: String,
    #[serde(default)]
    kty: String,
    #[serde(default)]
    n: String,
    #[serde(default)]
    e: String,
}

#[derive(Default)]
struct KeyCache {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
    fetched_unix: Option<u64>,
}

impl KeyCache {
    fn fresh(&self, ttl: Duration) -> bool {
        self.fetched_at
            .map(|at| at.elapsed() < ttl)
            .unwrap_or(false)
    }
}

/// Read-only snapshot for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct JwksStats {
    pub url: String,
    pub key_count: usize,
    pub fetched_at_unix: Option<u64>,
}

/// Validates RS-family JWTs against a remote JWKS.
pub struct JwksValidator {
    url: String,
    client: reqwest::Client,
    opts: JwksOptions,
    cache: RwLock<KeyCache>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl JwksValidator {
    pub fn new(url: &str, opts: JwksOptions) -> Result<Self, AuthError> {
        if url.is_empty() {
            return Err(AuthError::KeyFetch("jwks url required".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(opts.http_timeout)
            .build()
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;
        Ok(Self {
            url: url.to_string(),
            client,
            opts,
            cache: RwLock::new(KeyCache::default()),
            refresh_gate: tokio::sync::Mutex::new(()),
        })
    }

    pub fn stats(&self) -> JwksStats {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        JwksStats {
            url: self.url.clone(),
            key_count: cache.keys.len(),
            fetched_at_unix: cache.fetched_unix,
        }
    }

    /// Look up the key for `kid`, refreshing on miss or stale cache.
    async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if cache.fresh(self.opts.cache_ttl) {
                if let Some(key) = cache.keys.get(kid) {
                    return Ok(key.clone());
                }
            }
        }

        if let Err(err) = self.refresh().await {
            // Stale keys beat no keys.
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(key) = cache.keys.get(kid) {
                tracing::warn!(url = %self.url, error = %err, "jwks refresh failed; serving cached key");
                return Ok(key.clone());
            }
            return Err(err);
        }

        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| AuthError::UnknownKeyId(kid.to_string()))
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        let _gate = self.refresh_gate.lock().await;

        // Another task may have refreshed while we waited on the gate.
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if cache.fresh(self.opts.cache_ttl) {
                return Ok(());
            }
        }

        let doc: JwksDoc = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

        if doc.keys.is_empty() {
            return Err(AuthError::KeyFetch("empty jwks document".to_string()));
        }

        let mut next = HashMap::with_capacity(doc.keys.len());
        for jwk in &doc.keys {
            if jwk.kid.is_empty() || jwk.kty != "RSA" {
                continue;
            }
            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    next.insert(jwk.kid.clone(), key);
                }
                Err(err) => {
                    tracing::warn!(kid = %jwk.kid, error = %err, "skipping unusable jwk");
                }
            }
        }
        if next.is_empty() {
            return Err(AuthError::KeyFetch("no usable rsa keys".to_string()));
        }

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.keys = next;
        cache.fetched_at = Some(Instant::now());
        cache.fetched_unix = Some(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        );
        Ok(())
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(
            self.opts
                .algorithms
                .first()
                .copied()
                .unwrap_or(Algorithm::RS256),
        );
        validation.algorithms = self.opts.algorithms.clone();
        validation.leeway = self.opts.leeway.as_secs();
        validation.validate_nbf = true;
        if !self.opts.issuers.is_empty() {
            validation.set_issuer(&self.opts.issuers);
        }
        if self.opts.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.opts.audiences);
        }
        validation
    }
}

#[async_trait]
impl BearerValidator for JwksValidator {
    async fn validate_bearer(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let token = extract_bearer(headers)?;
        let header = decode_header(token).map_err(|_| AuthError::Malformed)?;
        let kid = header.kid.filter(|k| !k.is_empty()).ok_or(AuthError::Malformed)?;
        let key = self.key_for(&kid).await?;

        let data = jsonwebtoken::decode::<ClaimSet>(token, &key, &self.validation())
            .map_err(map_jwt_error)?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::MissingSubject);
        }
        Ok(data.claims.sub)
    }
}
