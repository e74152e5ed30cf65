//! Bearer-token authentication.
//!
//! # Data Flow
//! ```text
//! Authorization: Bearer <token>
//!     → extract_bearer (header shape)
//!     → hmac.rs (shared-secret HS256)
//!       or jwks.rs (remote RSA keys, cached by kid)
//!     → subject ("sub" claim) or AuthError
//! ```
//!
//! # Design Decisions
//! - One contract for both validators so the pipeline stays backend-agnostic
//! - Algorithm allowlists are enforced before signature checks; a token
//!   announcing an unexpected algorithm is rejected outright
//! - The subject claim is required and non-empty

pub mod hmac;
pub mod jwks;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;

pub use hmac::HmacValidator;
pub use jwks::{JwksStats, JwksValidator};

/// The authenticated subject, injected into request extensions.
#[derive(Debug, Clone)]
pub struct Subject(pub String);

/// Why a bearer token was rejected.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("malformed token")]
    Malformed,

    #[error("unknown signing key {0:?}")]
    UnknownKeyId(String),

    #[error("invalid signature")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("invalid issuer")]
    WrongIssuer,

    #[error("invalid audience")]
    WrongAudience,

    #[error("missing subject claim")]
    MissingSubject,

    #[error("key fetch failed: {0}")]
    KeyFetch(String),
}

/// Common contract of both validator variants.
#[async_trait]
pub trait BearerValidator: Send + Sync {
    /// Validate the request's bearer token, returning the subject.
    async fn validate_bearer(&self, headers: &HeaderMap) -> Result<String, AuthError>;
}

/// Registered claims the gateway cares about.
#[derive(Debug, Deserialize)]
pub(crate) struct ClaimSet {
    #[serde(default)]
    pub sub: String,
}

/// Pull the token out of the Authorization header.
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;
    let token = value.strip_prefix("Bearer ").ok_or(AuthError::MissingToken)?;
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

/// Translate jsonwebtoken's error taxonomy into ours.
pub(crate) fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::ImmatureSignature => AuthError::NotYetValid,
        ErrorKind::InvalidIssuer => AuthError::WrongIssuer,
        ErrorKind::InvalidAudience => AuthError::WrongAudience,
        ErrorKind::InvalidSignature => AuthError::BadSignature,
        ErrorKind::MissingRequiredClaim(claim) => match claim.as_str() {
            "iss" => AuthError::WrongIssuer,
            "aud" => AuthError::WrongAudience,
            "sub" => AuthError::MissingSubject,
            _ => AuthError::Malformed,
        },
        _ => AuthError::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_requires_scheme_and_token() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            extract_bearer(&headers),
            Err(AuthError::MissingToken)
        ));

        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert!(matches!(
            extract_bearer(&headers),
            Err(AuthError::MissingToken)
        ));

        headers.insert("authorization", "Bearer ".parse().unwrap());
        assert!(matches!(
            extract_bearer(&headers),
            Err(AuthError::MissingToken)
        ));

        headers.insert("authorization", "Bearer tok123".parse().unwrap());
        assert_eq!(extract_bearer(&headers).unwrap(), "tok123");
    }
}
