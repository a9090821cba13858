//! Bearer credential verification.

use std::sync::Arc;

use futures::future::BoxFuture;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::dao::models::PlayerEntity;

/// Verified user identity attached to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Stable user identifier.
    pub id: String,
    /// Display name shown to opponents.
    pub name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl From<Identity> for PlayerEntity {
    fn from(value: Identity) -> Self {
        Self {
            id: value.id,
            name: value.name,
        }
    }
}

/// Reasons a credential is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    Expired,
}

/// Maps a bearer credential to a user identity.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> BoxFuture<'static, Result<Identity, AuthError>>;
}

/// Claims expected inside HS256 access tokens.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User identifier.
    pub sub: String,
    /// Display name; the subject is used when absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Expiry (seconds since epoch).
    pub exp: u64,
}

/// HS256 JWT verifier sharing the secret with the token issuer.
#[derive(Clone)]
pub struct JwtVerifier {
    key: Arc<DecodingKey>,
    validation: Arc<Validation>,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: Arc::new(DecodingKey::from_secret(secret)),
            validation: Arc::new(Validation::new(Algorithm::HS256)),
        }
    }

    fn verify_sync(&self, token: &str) -> Result<Identity, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|err| {
            debug!(error = %err, "token rejected");
            match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken,
            }
        })?;

        let Claims { sub, name, .. } = data.claims;
        if sub.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        let name = name.filter(|n| !n.is_empty()).unwrap_or_else(|| sub.clone());
        Ok(Identity { id: sub, name })
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> BoxFuture<'static, Result<Identity, AuthError>> {
        let result = self.verify_sync(token);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use jsonwebtoken::{EncodingKey, Header, encode};

    use super::*;

    const SECRET: &[u8] = b"test_secret_key_for_testing_purposes_only";

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn mint(sub: &str, name: Option<&str>, exp: u64, secret: &[u8]) -> String {
        let claims = Claims {
            sub: sub.into(),
            name: name.map(Into::into),
            exp,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[tokio::test]
    async fn valid_token_yields_identity() {
        let verifier = JwtVerifier::new(SECRET);
        let token = mint("42", Some("Magnus"), now() + 600, SECRET);

        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity, Identity::new("42", "Magnus"));
    }

    #[tokio::test]
    async fn missing_name_falls_back_to_subject() {
        let verifier = JwtVerifier::new(SECRET);
        let token = mint("7", None, now() + 600, SECRET);

        assert_eq!(verifier.verify(&token).await.unwrap().name, "7");
    }

    #[tokio::test]
    async fn wrong_secret_is_invalid() {
        let verifier = JwtVerifier::new(SECRET);
        let token = mint("42", None, now() + 600, b"another-secret");

        assert_eq!(verifier.verify(&token).await, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn expired_token_is_reported() {
        let verifier = JwtVerifier::new(SECRET);
        let token = mint("42", None, now() - 3_600, SECRET);

        assert_eq!(verifier.verify(&token).await, Err(AuthError::Expired));
    }

    #[tokio::test]
    async fn blank_token_is_missing() {
        let verifier = JwtVerifier::new(SECRET);
        assert_eq!(verifier.verify("  ").await, Err(AuthError::MissingToken));
        assert_eq!(
            verifier.verify("not-a-jwt").await,
            Err(AuthError::InvalidToken)
        );
    }
}
