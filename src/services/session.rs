//! Bearer credentials — signed tokens naming a participant.
//!
//! DESIGN
//! ======
//! Tokens are HS256 JWTs carrying `sub` (participant id), `iat` and `exp`.
//! The codec is the only place that knows the signing secret; the
//! authenticator receives a verified subject id or a typed failure.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Clock skew tolerated when checking `exp`, in seconds.
const EXPIRY_LEEWAY_SECS: u64 = 5;

/// Claims embedded in every credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Participant id.
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("invalid token signature")]
    BadSignature,
    #[error("invalid token: {0}")]
    Malformed(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Issues and verifies participant credentials.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl TokenCodec {
    #[must_use]
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = EXPIRY_LEEWAY_SECS;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    /// Sign a credential for `participant_id` valid for the configured TTL.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Signing` if encoding fails.
    pub fn issue(&self, participant_id: Uuid) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims { sub: participant_id, iat: now.timestamp(), exp: (now + self.ttl).timestamp() };
        self.sign(&claims)
    }

    /// Sign arbitrary claims. Used by `issue` and by tests that need
    /// already-expired credentials.
    pub(crate) fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::default(), claims, &self.encoding_key).map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify signature and expiry, returning the subject id.
    ///
    /// # Errors
    ///
    /// Returns `Expired`, `BadSignature` or `Malformed` describing why the
    /// credential was rejected.
    pub fn verify(&self, token: &str) -> Result<Uuid, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            _ => TokenError::Malformed(e.to_string()),
        })?;
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
