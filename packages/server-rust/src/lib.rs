//! acme-gateway server: the interceptor chain, prefix-routing reverse proxy,
//! and server lifecycle, on axum and tower.

pub mod config;
pub mod envelope;
pub mod middleware;
pub mod network;
pub mod proxy;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{Args, GatewayConfig, LogFormat, RouteSpec};
pub use middleware::build_gateway_pipeline;
pub use network::{shutdown_signal, GatewayServer};
pub use proxy::{ForwardService, RouteTable};
