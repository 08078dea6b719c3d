//! Admission control backed by the process-wide [`TokenBucket`].
//!
//! Runs before authentication so that floods of unauthenticated requests are
//! rejected before any credential is verified.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use acme_gateway_core::{GatewayError, TokenBucket};
use axum::extract::Request;
use axum::http::header::RETRY_AFTER;
use axum::http::HeaderValue;
use axum::response::Response;
use tower::{Layer, Service};
use tracing::warn;

use super::{trace_id, BoxFuture};
use crate::envelope::error_response;

/// Tower layer that rejects requests with `429` when the bucket is empty.
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    bucket: Arc<TokenBucket>,
}

impl RateLimitLayer {
    #[must_use]
    pub fn new(bucket: Arc<TokenBucket>) -> Self {
        Self { bucket }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            bucket: Arc::clone(&self.bucket),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    bucket: Arc<TokenBucket>,
}

impl<S> Service<Request> for RateLimitService<S>
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

    fn call(&mut self, req: Request) -> Self::Future {
        if self.bucket.allow() {
            return Box::pin(self.inner.call(req));
        }

        let request_id = trace_id(&req);
        warn!(request_id, path = %req.uri().path(), "rate limit exceeded");

        let mut res = error_response(&GatewayError::RateLimited, request_id);
        res.headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from_static("1"));
        Box::pin(async move { Ok(res) })
    }
}
