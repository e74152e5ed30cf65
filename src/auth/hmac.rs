//! Shared-secret bearer-token validation (HS256).

use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use crate::auth::{extract_bearer, map_jwt_error, AuthError, BearerValidator, ClaimSet};

/// Validates HS256 tokens against a shared secret.
///
/// Tokens whose header announces any other algorithm are rejected.
pub struct HmacValidator {
    key: DecodingKey,
    validation: Validation,
}

impl HmacValidator {
    pub fn new(secret: &str, leeway: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway.as_secs();
        validation.validate_nbf = true;
        validation.validate_aud = false;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl BearerValidator for HmacValidator {
    async fn validate_bearer(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let token = extract_bearer(headers)?;
        let data = jsonwebtoken::decode::<ClaimSet>(token, &self.key, &self.validation)
            .map_err(map_jwt_error)?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::MissingSubject);
        }
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "dev-secret";

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    fn mint(secret: &str, claims: serde_json::Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("authorization", format!("Bearer {token}").parse().unwrap());
        h
    }

    #[tokio::test]
    async fn valid_token_yields_subject() {
        let v = HmacValidator::new(SECRET, Duration::from_secs(30));
        let token = mint(SECRET, json!({"sub": "user_123", "exp": now() + 3600}));
        assert_eq!(v.validate_bearer(&bearer(&token)).await.unwrap(), "user_123");
    }

    #[tokio::test]
    async fn wrong_secret_rejected() {
        let v = HmacValidator::new(SECRET, Duration::from_secs(30));
        let token = mint("other-secret", json!({"sub": "user_123", "exp": now() + 3600}));
        assert!(matches!(
            v.validate_bearer(&bearer(&token)).await,
            Err(AuthError::BadSignature)
        ));
    }

    #[tokio::test]
    async fn foreign_algorithm_rejected() {
        let v = HmacValidator::new(SECRET, Duration::from_secs(30));
        let token = encode(
            &Header::new(Algorithm::HS384),
            &json!({"sub": "user_123", "exp": now() + 3600}),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert!(v.validate_bearer(&bearer(&token)).await.is_err());
    }

    #[tokio::test]
    async fn expired_token_rejected() {
        let v = HmacValidator::new(SECRET, Duration::ZERO);
        let token = mint(SECRET, json!({"sub": "user_123", "exp": now() - 120}));
        assert!(matches!(
            v.validate_bearer(&bearer(&token)).await,
            Err(AuthError::Expired)
        ));
    }

    #[tokio::test]
    async fn leeway_tolerates_recent_expiry() {
        let v = HmacValidator::new(SECRET, Duration::from_secs(300));
        let token = mint(SECRET, json!({"sub": "user_123", "exp": now() - 120}));
        assert!(v.validate_bearer(&bearer(&token)).await.is_ok());
    }

    #[tokio::test]
    async fn missing_subject_rejected() {
        let v = HmacValidator::new(SECRET, Duration::from_secs(30));
        let token = mint(SECRET, json!({"exp": now() + 3600}));
        assert!(matches!(
            v.validate_bearer(&bearer(&token)).await,
            Err(AuthError::MissingSubject)
        ));
    }
}
