//! Composition of the interceptor chain.

use std::sync::Arc;

use acme_gateway_core::TokenBucket;
use tower::ServiceBuilder;

use super::auth::{AuthLayer, AuthService};
use super::cors::{CorsLayer, CorsService};
use super::fault::{FaultContainmentLayer, FaultContainmentService};
use super::rate_limit::{RateLimitLayer, RateLimitService};
use super::request_id::{RequestIdLayer, RequestIdService};

/// The full chain wrapped around a terminal service `S`.
pub type GatewayPipeline<S> = FaultContainmentService<
    RequestIdService<CorsService<RateLimitService<AuthService<S>>>>,
>;

/// Wraps `terminal` in every interceptor, outermost first:
///
/// 1. fault containment
/// 2. request identification
/// 3. cross-origin policy
/// 4. admission control
/// 5. authentication
///
/// The order is fixed. Preflights are answered before admission and
/// authentication; rate limiting runs before any credential is verified.
pub fn build_gateway_pipeline<S>(
    terminal: S,
    bucket: Arc<TokenBucket>,
    secret: impl Into<Arc<[u8]>>,
) -> GatewayPipeline<S> {
    ServiceBuilder::new()
        .layer(FaultContainmentLayer)
        .layer(RequestIdLayer)
        .layer(CorsLayer)
        .layer(RateLimitLayer::new(bucket))
        .layer(AuthLayer::new(secret))
        .service(terminal)
}
