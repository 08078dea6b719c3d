//! Tower middleware layers for the gateway's interceptor chain.
//!
//! - [`fault`]: Converts panics in any inner stage into an `INTERNAL_ERROR` envelope
//! - [`request_id`]: Establishes the request id and the `RequestContext`
//! - [`cors`]: Answers preflights and annotates responses with CORS headers
//! - [`rate_limit`]: Token-bucket admission control
//! - [`auth`]: Bearer credential verification and claim propagation
//! - [`pipeline`]: Composes all layers around the forwarder in the fixed order
//!
//! Every stage is a `Service<Request, Response = Response, Error = Infallible>`:
//! failures are turned into an error envelope where they are detected, never
//! propagated as `Err`.

pub mod auth;
pub mod cors;
pub mod fault;
pub mod pipeline;
pub mod rate_limit;
pub mod request_id;

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;

use acme_gateway_core::RequestContext;
use axum::extract::Request;
use axum::response::Response;

pub use auth::AuthLayer;
pub use cors::CorsLayer;
pub use fault::FaultContainmentLayer;
pub use pipeline::{build_gateway_pipeline, GatewayPipeline};
pub use rate_limit::RateLimitLayer;
pub use request_id::{RequestIdLayer, X_REQUEST_ID};

/// Boxed response future shared by every stage.
pub type BoxFuture = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

/// The request id established for `req`, or `""` before identification ran.
pub(crate) fn trace_id(req: &Request) -> &str {
    req.extensions()
        .get::<RequestContext>()
        .map_or("", RequestContext::request_id)
}
