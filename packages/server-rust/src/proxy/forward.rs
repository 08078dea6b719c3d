//! Terminal stage: forwards a matched request to its backend.
//!
//! Bodies stream in both directions. If the caller goes away, hyper drops
//! the response future and with it the in-flight backend request, which
//! releases the backend connection; nothing is left running in the
//! background.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use acme_gateway_core::GatewayError;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::header::{
    HeaderName, CONNECTION, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER,
    TRANSFER_ENCODING, UPGRADE,
};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use tower::Service;
use tracing::{debug, error};

use super::routes::{RouteTable, RouteTarget};
use crate::envelope::error_response;
use crate::middleware::{trace_id, BoxFuture};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");
const PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");

/// Removes connection-scoped headers, including any the `Connection` header
/// itself names. These describe one hop and must not be relayed.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }

    for name in [
        CONNECTION,
        KEEP_ALIVE,
        PROXY_CONNECTION,
        PROXY_AUTHENTICATE,
        PROXY_AUTHORIZATION,
        TE,
        TRAILER,
        TRANSFER_ENCODING,
        UPGRADE,
    ] {
        headers.remove(name);
    }
}

/// Appends the caller's address to `X-Forwarded-For`.
fn append_forwarded_for(headers: &mut HeaderMap, client: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let value = if prior.is_empty() {
        client.to_string()
    } else {
        format!("{}, {client}", prior.join(", "))
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// Forwards requests using the shared route table and HTTP client.
#[derive(Debug, Clone)]
pub struct ForwardService {
    routes: Arc<RouteTable>,
    client: reqwest::Client,
}

impl ForwardService {
    #[must_use]
    pub fn new(routes: Arc<RouteTable>, client: reqwest::Client) -> Self {
        Self { routes, client }
    }

    /// Builds a forwarder whose backend calls give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialised (e.g. the
    /// TLS backend fails to load).
    pub fn with_timeout(
        routes: Arc<RouteTable>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self::new(routes, client))
    }
}

impl Service<Request> for ForwardService {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let request_id = trace_id(&req).to_owned();

        let Some(target) = self.routes.resolve(req.uri()) else {
            debug!(request_id = %request_id, path = %req.uri().path(), "no route matched");
            let err = GatewayError::RouteNotFound {
                path: req.uri().path().to_owned(),
            };
            let res = error_response(&err, &request_id);
            return Box::pin(async move { Ok(res) });
        };

        let client = self.client.clone();
        Box::pin(async move {
            match forward(&client, &target, req).await {
                Ok(res) => Ok(res),
                Err(err) => {
                    error!(request_id = %request_id, error = %err, "forwarding failed");
                    Ok(error_response(&err, &request_id))
                }
            }
        })
    }
}

async fn forward(
    client: &reqwest::Client,
    target: &RouteTarget,
    req: Request,
) -> Result<Response, GatewayError> {
    let (parts, body) = req.into_parts();

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(HOST);
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        append_forwarded_for(&mut headers, addr.ip());
    }

    debug!(
        method = %parts.method,
        prefix = %target.prefix,
        upstream = %target.url,
        "forwarding request"
    );

    let upstream = client
        .request(parts.method, target.url.clone())
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await
        .map_err(|e| GatewayError::Upstream {
            origin: target.origin.to_string(),
            reason: e.to_string(),
        })?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let mut res = Response::new(Body::from_stream(upstream.bytes_stream()));
    *res.status_mut() = status;
    *res.headers_mut() = response_headers;
    Ok(res)
}
