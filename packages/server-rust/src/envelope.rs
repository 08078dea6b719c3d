//! HTTP rendering of the error envelope.

use acme_gateway_core::{ErrorEnvelope, GatewayError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Renders `err` as a JSON error envelope carrying `trace_id`.
pub fn error_response(err: &GatewayError, trace_id: &str) -> Response {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorEnvelope::from_error(err, trace_id))).into_response()
}
