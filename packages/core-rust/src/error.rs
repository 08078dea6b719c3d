//! Gateway error taxonomy and the uniform JSON error envelope.
//!
//! Wire shape:
//!
//! ```json
//! { "error": { "code": "NOT_FOUND", "message": "Route not found", "status": 404 },
//!   "trace_id": "6f1c..." }
//! ```

use serde::{Deserialize, Serialize};

use crate::claims::VerificationError;

/// Stable machine-readable failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    /// Reserved for authorization-policy checks.
    Forbidden,
    NotFound,
    /// Reserved for input validation.
    BadRequest,
    InternalError,
    RateLimitExceeded,
    InvalidToken,
}

impl ErrorCode {
    /// The code as it appears on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::BadRequest => "BAD_REQUEST",
            Self::InternalError => "INTERNAL_ERROR",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::InvalidToken => "INVALID_TOKEN",
        }
    }
}

/// A failure detected by one of the gateway's stages.
///
/// `Display` carries server-side detail for logs; callers only ever see
/// [`public_message`](Self::public_message).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("missing authorization header")]
    MissingCredentials,
    #[error("authorization header is not `Bearer <token>`")]
    MalformedAuthorization,
    #[error("credential rejected: {0}")]
    InvalidToken(#[from] VerificationError),
    #[error("verified claim `{claim}` cannot be forwarded as a header value")]
    UnforwardableClaim { claim: &'static str },
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("no route for path {path}")]
    RouteNotFound { path: String },
    #[error("upstream {origin} failed: {reason}")]
    Upstream { origin: String, reason: String },
    #[error("internal fault: {0}")]
    Internal(String),
}

impl GatewayError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingCredentials | Self::MalformedAuthorization => ErrorCode::Unauthorized,
            Self::InvalidToken(_) | Self::UnforwardableClaim { .. } => ErrorCode::InvalidToken,
            Self::RateLimited => ErrorCode::RateLimitExceeded,
            Self::RouteNotFound { .. } => ErrorCode::NotFound,
            Self::Upstream { .. } | Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Transport status code for this failure.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingCredentials
            | Self::MalformedAuthorization
            | Self::InvalidToken(_)
            | Self::UnforwardableClaim { .. } => 401,
            Self::RateLimited => 429,
            Self::RouteNotFound { .. } => 404,
            Self::Upstream { .. } => 502,
            Self::Internal(_) => 500,
        }
    }

    /// Human-readable message safe to return to callers.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "Missing authorization header",
            Self::MalformedAuthorization => "Invalid authorization header format",
            Self::InvalidToken(_) | Self::UnforwardableClaim { .. } => "Invalid or expired token",
            Self::RateLimited => "Rate limit exceeded",
            Self::RouteNotFound { .. } => "Route not found",
            Self::Upstream { .. } => "Upstream service unavailable",
            Self::Internal(_) => "Internal server error",
        }
    }
}

/// Body of an error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    pub status: u16,
}

/// The JSON document returned for every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
    /// The request id, or empty when none was established.
    pub trace_id: String,
}

impl ErrorEnvelope {
    #[must_use]
    pub fn new(
        code: ErrorCode,
        message: impl Into<String>,
        status: u16,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code,
                message: message.into(),
                status,
            },
            trace_id: trace_id.into(),
        }
    }

    #[must_use]
    pub fn from_error(err: &GatewayError, trace_id: impl Into<String>) -> Self {
        Self::new(err.code(), err.public_message(), err.status(), trace_id)
    }
}
