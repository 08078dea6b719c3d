//! Bearer authentication and claim propagation.
//!
//! Requires `Authorization: Bearer <token>`. On success the request context
//! gains the caller's [`Identity`] and the forwarded request carries it as
//! `X-Tenant-ID`, `X-Roles` and `X-Scopes`, so backends trust the gateway
//! instead of verifying the credential again. Those three headers are always
//! stripped from the inbound request first: a caller cannot supply them.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use acme_gateway_core::{verify, GatewayError, Identity, RequestContext};
use axum::extract::Request;
use axum::http::header::{HeaderName, AUTHORIZATION};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::{trace_id, BoxFuture};
use crate::envelope::error_response;

pub const X_TENANT_ID: HeaderName = HeaderName::from_static("x-tenant-id");
pub const X_ROLES: HeaderName = HeaderName::from_static("x-roles");
pub const X_SCOPES: HeaderName = HeaderName::from_static("x-scopes");

/// Extracts the token from an `Authorization` header value.
///
/// The value must split on single spaces into exactly `Bearer` and one
/// non-empty token.
fn bearer_token(headers: &HeaderMap) -> Result<&str, GatewayError> {
    let value = headers
        .get(AUTHORIZATION)
        .filter(|v| !v.is_empty())
        .ok_or(GatewayError::MissingCredentials)?;
    let value = value
        .to_str()
        .map_err(|_| GatewayError::MalformedAuthorization)?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(GatewayError::MalformedAuthorization),
    }
}

/// Replaces any caller-supplied identity headers with the verified identity.
fn propagate_identity(headers: &mut HeaderMap, identity: &Identity) -> Result<(), GatewayError> {
    headers.remove(&X_TENANT_ID);
    headers.remove(&X_ROLES);
    headers.remove(&X_SCOPES);

    let encode = |claim: &'static str, value: &str| {
        HeaderValue::from_str(value).map_err(|_| GatewayError::UnforwardableClaim { claim })
    };

    headers.insert(X_TENANT_ID, encode("tenant_id", &identity.tenant_id)?);
    if !identity.roles.is_empty() {
        headers.insert(X_ROLES, encode("roles", &identity.roles.join(","))?);
    }
    if !identity.scopes.is_empty() {
        headers.insert(X_SCOPES, encode("scopes", &identity.scopes.join(","))?);
    }
    Ok(())
}

/// Verifies the request's credential and enriches it with the caller identity.
fn authenticate(req: &mut Request, secret: &[u8]) -> Result<(), GatewayError> {
    let token = bearer_token(req.headers())?;
    let identity = Identity::from(verify(token, secret)?);

    propagate_identity(req.headers_mut(), &identity)?;

    let ctx = req
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_else(|| RequestContext::new(""));
    req.extensions_mut().insert(ctx.with_identity(identity));
    Ok(())
}

/// Tower layer enforcing bearer authentication with a shared HMAC secret.
#[derive(Clone)]
pub struct AuthLayer {
    secret: Arc<[u8]>,
}

impl AuthLayer {
    #[must_use]
    pub fn new(secret: impl Into<Arc<[u8]>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for AuthLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthLayer").finish_non_exhaustive()
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            secret: Arc::clone(&self.secret),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    secret: Arc<[u8]>,
}

impl<S> Service<Request> for AuthService<S>
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
        match authenticate(&mut req, &self.secret) {
            Ok(()) => {
                if let Some(ctx) = req.extensions().get::<RequestContext>() {
                    debug!(
                        request_id = ctx.request_id(),
                        tenant_id = ctx.tenant_id(),
                        "request authenticated"
                    );
                }
                Box::pin(self.inner.call(req))
            }
            Err(err) => {
                let request_id = trace_id(&req);
                warn!(request_id, error = %err, "authentication failed");
                let res = error_response(&err, request_id);
                Box::pin(async move { Ok(res) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use acme_gateway_core::{Claims, ErrorCode};
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use tower::ServiceExt;

    use super::*;
    use crate::test_support::{
        must_not_run, read_envelope, service_fn_infallible, sign_claims, sign_token, TEST_SECRET,
    };

    fn guarded() -> impl Service<Request, Response = Response, Error = Infallible> {
        AuthLayer::new(TEST_SECRET).layer(service_fn_infallible(|_req| async { must_not_run() }))
    }

    fn request_with_auth(value: &str) -> Request {
        let mut req = Request::builder()
            .uri("/test")
            .header(AUTHORIZATION, value)
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(RequestContext::new("req-auth"));
        req
    }

    async fn assert_rejected(req: Request, code: ErrorCode) {
        let res = guarded().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let env = read_envelope(res).await;
        assert_eq!(env.error.code, code);
        assert_eq!(env.error.status, 401);
    }

    #[tokio::test]
    async fn valid_token_enriches_context_and_headers() {
        let token = sign_token(TEST_SECRET, 3600);
        let svc = AuthLayer::new(TEST_SECRET).layer(service_fn_infallible(|req: Request| async move {
            let ctx = req.extensions().get::<RequestContext>().unwrap();
            assert_eq!(ctx.request_id(), "req-auth");
            assert_eq!(ctx.tenant_id(), "tenant-123");
            assert_eq!(ctx.roles(), ["admin", "user"]);
            assert_eq!(ctx.scopes(), ["read", "write"]);

            let headers = req.headers();
            assert_eq!(headers[X_TENANT_ID], "tenant-123");
            assert_eq!(headers[X_ROLES], "admin,user");
            assert_eq!(headers[X_SCOPES], "read,write");
            StatusCode::OK.into_response()
        }));

        let res = svc
            .oneshot(request_with_auth(&format!("Bearer {token}")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn spoofed_identity_headers_are_replaced_or_removed() {
        let token = sign_claims(
            TEST_SECRET,
            &Claims {
                tenant_id: "real-tenant".into(),
                exp: Some(jsonwebtoken::get_current_timestamp() + 3600),
                ..Default::default()
            },
        );
        let svc = AuthLayer::new(TEST_SECRET).layer(service_fn_infallible(|req: Request| async move {
            assert_eq!(req.headers()[X_TENANT_ID], "real-tenant");
            assert!(req.headers().get(X_ROLES).is_none());
            assert!(req.headers().get(X_SCOPES).is_none());
            StatusCode::OK.into_response()
        }));

        let mut req = request_with_auth(&format!("Bearer {token}"));
        req.headers_mut()
            .insert(X_TENANT_ID, HeaderValue::from_static("evil-tenant"));
        req.headers_mut()
            .insert(X_ROLES, HeaderValue::from_static("superuser"));
        req.headers_mut()
            .insert(X_SCOPES, HeaderValue::from_static("admin:*"));

        let res = svc.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let mut req = Request::builder().uri("/test").body(Body::empty()).unwrap();
        req.extensions_mut().insert(RequestContext::new("req-auth"));

        let res = guarded().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let env = read_envelope(res).await;
        assert_eq!(env.error.code, ErrorCode::Unauthorized);
        assert_eq!(env.error.message, "Missing authorization header");
        assert_eq!(env.trace_id, "req-auth");
    }

    #[tokio::test]
    async fn malformed_headers_are_unauthorized() {
        let token = sign_token(TEST_SECRET, 3600);
        for value in [
            "Bearer".to_string(),
            "Bearer ".to_string(),
            token.clone(),
            format!("Basic {token}"),
            format!("bearer {token}"),
            format!("Bearer {token} extra"),
            format!("Bearer  {token}"),
        ] {
            assert_rejected(request_with_auth(&value), ErrorCode::Unauthorized).await;
        }
    }

    #[tokio::test]
    async fn wrong_secret_is_invalid_token() {
        let token = sign_token(b"some-other-secret", 3600);
        assert_rejected(
            request_with_auth(&format!("Bearer {token}")),
            ErrorCode::InvalidToken,
        )
        .await;
    }

    #[tokio::test]
    async fn expired_token_is_invalid_token() {
        let token = sign_token(TEST_SECRET, -3600);
        assert_rejected(
            request_with_auth(&format!("Bearer {token}")),
            ErrorCode::InvalidToken,
        )
        .await;
    }

    #[tokio::test]
    async fn garbage_token_is_invalid_token() {
        assert_rejected(request_with_auth("Bearer invalid-token"), ErrorCode::InvalidToken).await;
    }

    #[tokio::test]
    async fn unforwardable_claim_is_invalid_token() {
        let token = sign_claims(
            TEST_SECRET,
            &Claims {
                tenant_id: "tenant\nx-injected: 1".into(),
                exp: Some(jsonwebtoken::get_current_timestamp() + 3600),
                ..Default::default()
            },
        );
        assert_rejected(
            request_with_auth(&format!("Bearer {token}")),
            ErrorCode::InvalidToken,
        )
        .await;

        let mut headers = HeaderMap::new();
        let identity = Identity {
            tenant_id: "ok".into(),
            roles: vec!["bad\u{7f}role".into()],
            scopes: vec![],
        };
        assert!(matches!(
            propagate_identity(&mut headers, &identity),
            Err(GatewayError::UnforwardableClaim { claim: "roles" })
        ));
    }

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            bearer_token(&headers),
            Err(GatewayError::MissingCredentials)
        ));

        headers.insert(AUTHORIZATION, HeaderValue::from_static(""));
        assert!(matches!(
            bearer_token(&headers),
            Err(GatewayError::MissingCredentials)
        ));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");
    }
}
