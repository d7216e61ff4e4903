//! Caller identity.
//!
//! Tokens are issued elsewhere; this module only verifies them.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::models::job::TrustTier;

/// JWT claims we rely on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// User ID (subject)
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: u64,
    pub iat: u64,
}

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    Anonymous,
    Authenticated { user_id: String },
}

impl Requester {
    pub fn tier(&self) -> TrustTier {
        match self {
            Requester::Anonymous => TrustTier::Anonymous,
            Requester::Authenticated { .. } => TrustTier::Authenticated,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Requester::Anonymous => None,
            Requester::Authenticated { user_id } => Some(user_id),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid token format")]
    InvalidFormat,
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token validation failed: {0}")]
    TokenValidation(String),
}

/// Verifies HS256 bearer tokens against a shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str, issuer: &str, audience: &str) -> Self {
        let mut validation = Validation::default();
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidToken
                | jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidToken,
                _ => AuthError::TokenValidation(e.to_string()),
            })
    }

    /// Resolve an `Authorization` header value into a requester.
    ///
    /// No header means anonymous. A header that is present but invalid is an
    /// error, never a silent downgrade to anonymous.
    pub fn requester(&self, authorization: Option<&str>) -> Result<Requester, AuthError> {
        let Some(value) = authorization else {
            return Ok(Requester::Anonymous);
        };

        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::InvalidFormat)?;

        let claims = self.verify(token)?;
        Ok(Requester::Authenticated {
            user_id: claims.sub,
        })
    }
}
