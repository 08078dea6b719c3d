//! Shared helpers for unit tests across the server crate.

use std::convert::Infallible;
use std::future::Future;
use std::task::{Context, Poll};

use acme_gateway_core::{Claims, ErrorEnvelope};
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tower::Service;

use crate::middleware::BoxFuture;

pub const TEST_SECRET: &[u8] = b"test-secret";

/// Infallible [`Service`] built from an async closure.
#[derive(Clone)]
pub struct FnService<F> {
    f: F,
}

pub fn service_fn_infallible<F, Fut>(f: F) -> FnService<F>
where
    F: Fn(Request) -> Fut,
    Fut: Future<Output = Response> + Send + 'static,
{
    FnService { f }
}

impl<F, Fut> Service<Request> for FnService<F>
where
    F: Fn(Request) -> Fut,
    Fut: Future<Output = Response> + Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let fut = (self.f)(req);
        Box::pin(async move { Ok(fut.await) })
    }
}

/// Inner stage for tests asserting that a request was short-circuited.
pub fn must_not_run() -> Response {
    panic!("request reached a stage that should have been skipped")
}

async fn body_bytes(res: Response) -> Vec<u8> {
    axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn read_json(res: Response) -> Value {
    serde_json::from_slice(&body_bytes(res).await).unwrap()
}

pub async fn read_envelope(res: Response) -> ErrorEnvelope {
    serde_json::from_slice(&body_bytes(res).await).unwrap()
}

pub fn sign_claims(secret: &[u8], claims: &Claims) -> String {
    encode(&Header::default(), claims, &EncodingKey::from_secret(secret)).unwrap()
}

/// Token for `tenant-123` with roles `admin,user` and scopes `read,write`,
/// expiring `ttl_secs` from now (negative for an already expired token).
pub fn sign_token(secret: &[u8], ttl_secs: i64) -> String {
    let now = jsonwebtoken::get_current_timestamp();
    let exp = now.checked_add_signed(ttl_secs).unwrap();
    sign_claims(
        secret,
        &Claims {
            tenant_id: "tenant-123".into(),
            roles: vec!["admin".into(), "user".into()],
            scopes: vec!["read".into(), "write".into()],
            iat: Some(now),
            exp: Some(exp),
            ..Default::default()
        },
    )
}

async fn echo(req: Request) -> Response {
    let (parts, body) = req.into_parts();

    if parts.uri.path() == "/status/418" {
        return (
            StatusCode::IM_A_TEAPOT,
            [("x-backend", "echo")],
            "short and stout",
        )
            .into_response();
    }

    let headers: Map<String, Value> = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                Value::String(value.to_str().unwrap_or_default().to_owned()),
            )
        })
        .collect();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();

    axum::Json(json!({
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query(),
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    }))
    .into_response()
}

/// Starts a loopback backend that echoes each request back as JSON and
/// returns its origin. `/status/418` answers with a fixed non-JSON reply.
pub async fn spawn_echo_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(echo);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
