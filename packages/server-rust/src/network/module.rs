//! Gateway server with deferred startup lifecycle.
//!
//! `new()` validates configuration and allocates the shared state (route
//! table, token bucket), `start()` binds the TCP listener, and `serve()`
//! accepts connections until the shutdown future resolves. Binding separately
//! from serving lets callers learn the bound port (port 0 picks one) before
//! traffic arrives.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use acme_gateway_core::TokenBucket;
use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::GatewayConfig;
use crate::middleware::build_gateway_pipeline;
use crate::proxy::{ForwardService, RouteTable};

/// Owns the gateway's configuration, shared state, and listener.
pub struct GatewayServer {
    config: GatewayConfig,
    listener: Option<TcpListener>,
    routes: Arc<RouteTable>,
    bucket: Arc<TokenBucket>,
}

impl GatewayServer {
    /// Validates `config` and builds the shared state without binding a port.
    ///
    /// # Errors
    ///
    /// Returns an error if a route is invalid or the rate limit is zero.
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let routes = config
            .route_table()
            .context("invalid route configuration")?;
        let bucket = TokenBucket::per_second(config.rate_limit_per_second)
            .context("invalid rate limit")?;

        Ok(Self {
            config,
            listener: None,
            routes: Arc::new(routes),
            bucket: Arc::new(bucket),
        })
    }

    /// The route table shared by every request.
    #[must_use]
    pub fn routes(&self) -> Arc<RouteTable> {
        Arc::clone(&self.routes)
    }

    /// Assembles the axum router: every path and method goes through the
    /// interceptor chain to the forwarder, under a per-request trace span.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend HTTP client cannot be built.
    pub fn build_router(&self) -> anyhow::Result<Router> {
        let forwarder =
            ForwardService::with_timeout(Arc::clone(&self.routes), self.config.upstream_timeout)
                .context("failed to build backend HTTP client")?;
        let pipeline = build_gateway_pipeline(
            forwarder,
            Arc::clone(&self.bucket),
            self.config.jwt_secret.as_bytes(),
        );

        Ok(Router::new()
            .fallback_service(pipeline)
            .layer(TraceLayer::new_for_http()))
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which differs from the configured port
    /// when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves, then waits for
    /// in-flight requests to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first, or if the server
    /// hits a fatal I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router()?;
        let listener = self
            .listener
            .context("start() must be called before serve()")?;

        info!(
            routes = ?self.routes.prefixes().collect::<Vec<_>>(),
            rate_limit_per_second = self.config.rate_limit_per_second,
            "gateway serving"
        );

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("gateway stopped");
        Ok(())
    }
}
