//! Fault containment: the last-resort supervisory boundary of the chain.
//!
//! Expected failures never reach this layer; every stage answers them with
//! an envelope itself. What this layer catches are panics, raised either
//! while an inner stage builds its future or while that future is polled.
//! They are logged with their payload and answered with a generic
//! `INTERNAL_ERROR` (500). A panic never unwinds past this boundary.

use std::any::Any;
use std::convert::Infallible;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use acme_gateway_core::GatewayError;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::response::Response;
use futures_util::FutureExt;
use tower::{Layer, Service};
use tracing::error;

use super::cors::apply_cors_headers;
use super::request_id::X_REQUEST_ID;
use super::BoxFuture;
use crate::envelope::error_response;

/// Write-once cell through which request identification reports the id it
/// established back out to this layer.
///
/// Fault containment runs before the id exists, so it plants an empty slot
/// in the request extensions and reads it back if a panic has to be answered.
#[derive(Debug, Clone, Default)]
pub struct TraceSlot(Arc<OnceLock<PublishedId>>);

#[derive(Debug)]
struct PublishedId {
    text: String,
    header: Option<HeaderValue>,
}

impl TraceSlot {
    /// Records the request id and the exact header value to echo for it.
    /// Later calls are ignored.
    pub fn publish(&self, request_id: &str, header: Option<HeaderValue>) {
        let _ = self.0.set(PublishedId {
            text: request_id.to_owned(),
            header,
        });
    }

    /// The published request id, or `""` if none was published.
    #[must_use]
    pub fn get(&self) -> &str {
        self.0.get().map_or("", |id| id.text.as_str())
    }

    /// The `X-Request-ID` value to echo, if one was published.
    #[must_use]
    pub fn header(&self) -> Option<&HeaderValue> {
        self.0.get().and_then(|id| id.header.as_ref())
    }
}

// ---------------------------------------------------------------------------
// FaultContainmentLayer
// ---------------------------------------------------------------------------

/// Tower layer that turns panics in the wrapped stages into error envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultContainmentLayer;

impl<S> Layer<S> for FaultContainmentLayer {
    type Service = FaultContainmentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FaultContainmentService { inner }
    }
}

// ---------------------------------------------------------------------------
// FaultContainmentService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FaultContainmentService<S> {
    inner: S,
}

impl<S> Service<Request> for FaultContainmentService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Send,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let slot = TraceSlot::default();
        req.extensions_mut().insert(slot.clone());

        let inner = &mut self.inner;
        let fut = match panic::catch_unwind(AssertUnwindSafe(|| inner.call(req))) {
            Ok(fut) => fut,
            Err(payload) => {
                let res = fault_response(&slot, payload.as_ref());
                return Box::pin(async move { Ok(res) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Ok(fault_response(&slot, payload.as_ref())),
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

fn fault_response(slot: &TraceSlot, payload: &(dyn Any + Send)) -> Response {
    let request_id = slot.get();
    let message = panic_message(payload);
    error!(request_id, panic = message, "panic recovered in request pipeline");

    let mut res = error_response(&GatewayError::Internal(message.to_owned()), request_id);
    apply_cors_headers(res.headers_mut());
    if let Some(value) = slot.header() {
        res.headers_mut().insert(X_REQUEST_ID, value.clone());
    }
    res
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
