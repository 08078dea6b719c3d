use acme_gateway_server::{shutdown_signal, Args, GatewayConfig, GatewayServer, LogFormat};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = GatewayConfig::from(args);
    if config.uses_default_secret() {
        warn!("JWT_SECRET is not set; using the built-in development secret");
    }
    info!(?config, "starting acme-gateway");

    let mut server = GatewayServer::new(config)?;
    let port = server.start().await?;
    info!(port, "acme-gateway listening");

    server.serve(shutdown_signal()).await
}
