//! Request identification.
//!
//! Reuses a non-empty inbound `X-Request-ID` byte for byte, otherwise
//! generates a UUID v4.
//! The id seeds the request's [`RequestContext`], is forwarded to the backend
//! in the same header, and is set on every response that passes back out.
//! This stage never terminates a request.

use std::convert::Infallible;
use std::task::{Context, Poll};

use acme_gateway_core::RequestContext;
use axum::extract::Request;
use axum::http::header::HeaderName;
use axum::http::HeaderValue;
use axum::response::Response;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::fault::TraceSlot;
use super::BoxFuture;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Tower layer that establishes the request id and the request context.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

/// The established id: its text for the context and logs, and the exact
/// header value to forward and echo.
struct EstablishedId {
    text: String,
    header: Option<HeaderValue>,
}

/// First non-empty of: an id already in the context, the inbound header, a
/// freshly generated UUID.
///
/// An inbound header is kept byte for byte even when it is not valid UTF-8;
/// only its textual form for the context is decoded lossily.
fn establish_request_id(req: &Request) -> EstablishedId {
    if let Some(ctx) = req.extensions().get::<RequestContext>() {
        if !ctx.request_id().is_empty() {
            return EstablishedId {
                text: ctx.request_id().to_owned(),
                header: HeaderValue::from_str(ctx.request_id()).ok(),
            };
        }
    }
    if let Some(value) = req.headers().get(&X_REQUEST_ID).filter(|v| !v.is_empty()) {
        return EstablishedId {
            text: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            header: Some(value.clone()),
        };
    }
    let generated = Uuid::new_v4().to_string();
    EstablishedId {
        header: HeaderValue::from_str(&generated).ok(),
        text: generated,
    }
}

impl<S> Service<Request> for RequestIdService<S>
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
        let EstablishedId {
            text: request_id,
            header,
        } = establish_request_id(&req);

        if let Some(slot) = req.extensions().get::<TraceSlot>() {
            slot.publish(&request_id, header.clone());
        }

        if let Some(value) = &header {
            req.headers_mut().insert(X_REQUEST_ID, value.clone());
        }

        let span = info_span!(
            "request",
            request_id = %request_id,
            method = %req.method(),
            path = %req.uri().path(),
        );
        req.extensions_mut().insert(RequestContext::new(request_id));

        let fut = self.inner.call(req);
        Box::pin(
            async move {
                let mut res = fut.await?;
                if let Some(value) = header {
                    res.headers_mut().insert(X_REQUEST_ID, value);
                }
                Ok(res)
            }
            .instrument(span),
        )
    }
}
