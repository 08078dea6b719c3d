//! Bearer credential verification.
//!
//! Credentials are HMAC-signed JWTs issued by the auth service. Verification
//! is a pure function of the token and the shared secret: no I/O, no shared
//! state, safe to call from any number of tasks at once.

use std::collections::HashSet;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Signing algorithms accepted from the credential header.
///
/// The header's `alg` is checked against this list before the secret is
/// used, so a token cannot pick its own verification algorithm.
pub const ALLOWED_ALGORITHMS: &[Algorithm] = &[Algorithm::HS256];

/// Decoded credential payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Issued-at, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Expiry, seconds since the Unix epoch. Absent means no expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    /// Not-before, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
}

/// Why a credential was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("credential is not a well-formed signed token")]
    Malformed,
    #[error("credential signature does not match")]
    BadSignature,
    #[error("credential is expired or not yet valid")]
    Expired,
    #[error("credential signing algorithm is not allowed")]
    DisallowedAlgorithm,
}

impl From<jsonwebtoken::errors::Error> for VerificationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => Self::BadSignature,
            ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => Self::Expired,
            ErrorKind::InvalidAlgorithm | ErrorKind::MissingAlgorithm => {
                Self::DisallowedAlgorithm
            }
            _ => Self::Malformed,
        }
    }
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = ALLOWED_ALGORITHMS.to_vec();
    validation.leeway = 0;
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();
    validation
}

/// Verifies `token` against `secret` and returns its claims.
///
/// # Errors
///
/// - [`VerificationError::Malformed`] if the token cannot be parsed.
/// - [`VerificationError::DisallowedAlgorithm`] if its `alg` header is not
///   in [`ALLOWED_ALGORITHMS`].
/// - [`VerificationError::BadSignature`] if the signature does not match.
/// - [`VerificationError::Expired`] if the current time is past `exp` or
///   before `nbf`.
pub fn verify(token: &str, secret: &[u8]) -> Result<Claims, VerificationError> {
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation())?;
    Ok(data.claims)
}
