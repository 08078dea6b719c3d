//! Gateway configuration: command-line flags, each also read from the
//! environment, resolved into a [`GatewayConfig`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::proxy::{RouteError, RouteTable};

/// Development fallback for the HMAC secret. Startup warns when it is in use.
pub const DEFAULT_JWT_SECRET: &str = "your-secret-key";

/// Prefix under which the tickets backend is mounted.
pub const TICKETS_PREFIX: &str = "/api/tickets";

const DEFAULT_TICKETS_SERVICE_URL: &str = "http://localhost:8081";

/// Configuration errors detected while parsing flags.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("route {0:?} must have the form PREFIX=ORIGIN")]
    InvalidRoute(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, for local development.
    #[default]
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

/// One `PREFIX=ORIGIN` route entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub prefix: String,
    pub origin: String,
}

impl RouteSpec {
    pub fn new(prefix: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            origin: origin.into(),
        }
    }
}

impl FromStr for RouteSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, origin) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidRoute(s.to_owned()))?;
        let (prefix, origin) = (prefix.trim(), origin.trim());
        if prefix.is_empty() || origin.is_empty() {
            return Err(ConfigError::InvalidRoute(s.to_owned()));
        }
        Ok(Self::new(prefix, origin))
    }
}

/// Command-line interface of the `acme-gateway` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "acme-gateway", version, about = "Edge gateway for backend services")]
pub struct Args {
    /// Address to bind.
    #[arg(long, env = "GATEWAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on. 0 picks a free port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// HMAC secret used to verify bearer credentials.
    #[arg(
        long,
        env = "JWT_SECRET",
        default_value = DEFAULT_JWT_SECRET,
        hide_env_values = true,
        hide_default_value = true
    )]
    pub jwt_secret: String,

    /// Requests admitted per second, which is also the burst size.
    #[arg(
        long,
        env = "RATE_LIMIT_PER_SECOND",
        default_value_t = 100,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub rate_limit_per_second: u32,

    /// Tickets backend, mounted at `/api/tickets`. Empty disables the route.
    #[arg(long, env = "TICKETS_SERVICE_URL", default_value = DEFAULT_TICKETS_SERVICE_URL)]
    pub tickets_service_url: String,

    /// Additional `PREFIX=ORIGIN` routes.
    #[arg(long = "route", env = "GATEWAY_ROUTES", value_delimiter = ',')]
    pub routes: Vec<RouteSpec>,

    /// Seconds before a backend call is abandoned.
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 30)]
    pub upstream_timeout_secs: u64,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Resolved runtime configuration.
#[derive(Clone)]
pub struct GatewayConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// HMAC secret for credential verification.
    pub jwt_secret: String,
    /// Token bucket capacity and refill rate.
    pub rate_limit_per_second: u32,
    /// Static prefix routes, in configuration order.
    pub routes: Vec<RouteSpec>,
    /// Maximum time to wait for a backend response.
    pub upstream_timeout: Duration,
    pub log_format: LogFormat,
}

impl GatewayConfig {
    /// Builds the immutable route table.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] if any configured route is invalid.
    pub fn route_table(&self) -> Result<RouteTable, RouteError> {
        RouteTable::new(
            self.routes
                .iter()
                .map(|r| (r.prefix.as_str(), r.origin.as_str())),
        )
    }

    /// Whether the development fallback secret is in use.
    #[must_use]
    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            rate_limit_per_second: 100,
            routes: vec![RouteSpec::new(TICKETS_PREFIX, DEFAULT_TICKETS_SERVICE_URL)],
            upstream_timeout: Duration::from_secs(30),
            log_format: LogFormat::Pretty,
        }
    }
}

impl From<Args> for GatewayConfig {
    fn from(args: Args) -> Self {
        let mut routes = Vec::with_capacity(args.routes.len() + 1);
        if !args.tickets_service_url.trim().is_empty() {
            routes.push(RouteSpec::new(TICKETS_PREFIX, args.tickets_service_url.trim()));
        }
        routes.extend(args.routes);

        Self {
            host: args.host,
            port: args.port,
            jwt_secret: args.jwt_secret,
            rate_limit_per_second: args.rate_limit_per_second,
            routes,
            upstream_timeout: Duration::from_secs(args.upstream_timeout_secs),
            log_format: args.log_format,
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("jwt_secret", &"<redacted>")
            .field("rate_limit_per_second", &self.rate_limit_per_second)
            .field("routes", &self.routes)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("log_format", &self.log_format)
            .finish()
    }
}
