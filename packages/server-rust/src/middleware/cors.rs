//! Cross-origin policy.
//!
//! Every `OPTIONS` request is treated as a browser preflight and answered
//! here with `204 No Content` without reaching any inner stage, so preflights
//! are neither rate limited nor authenticated. All other responses get the
//! same permissive headers added on the way out.

use std::convert::Infallible;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service};
use tracing::debug;

use super::BoxFuture;

const ALLOW_ORIGIN: HeaderValue = HeaderValue::from_static("*");
const ALLOW_METHODS: HeaderValue =
    HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS");
const ALLOW_HEADERS: HeaderValue =
    HeaderValue::from_static("Authorization, Content-Type, X-Request-ID");
const EXPOSE_HEADERS: HeaderValue = HeaderValue::from_static("X-Request-ID");
const PREFLIGHT_MAX_AGE: HeaderValue = HeaderValue::from_static("86400");

/// Sets the permissive CORS headers, replacing any the backend sent.
pub(crate) fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, ALLOW_ORIGIN);
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, ALLOW_METHODS);
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, ALLOW_HEADERS);
    headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, EXPOSE_HEADERS);
}

fn preflight_response() -> Response {
    let mut res = StatusCode::NO_CONTENT.into_response();
    apply_cors_headers(res.headers_mut());
    res.headers_mut()
        .insert(ACCESS_CONTROL_MAX_AGE, PREFLIGHT_MAX_AGE);
    res
}

/// Tower layer applying the gateway's cross-origin policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorsLayer;

impl<S> Layer<S> for CorsLayer {
    type Service = CorsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorsService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct CorsService<S> {
    inner: S,
}

impl<S> Service<Request> for CorsService<S>
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
        if req.method() == Method::OPTIONS {
            debug!(path = %req.uri().path(), "answering CORS preflight");
            return Box::pin(async { Ok(preflight_response()) });
        }

        let fut = self.inner.call(req);
        Box::pin(async move {
            let mut res = fut.await?;
            apply_cors_headers(res.headers_mut());
            Ok(res)
        })
    }
}
