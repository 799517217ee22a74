// broker: routes JSON messages between connected peers by logical
// service id and republishes everything on the monitor stream.

use broker::{Broker, BrokerConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "broker", about = "Centralized JSON message broker")]
struct Args {
    /// Path to the broker TOML config; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the bind address.
    #[arg(long)]
    bind_addr: Option<String>,
    /// Override the client-facing port.
    #[arg(long)]
    frontend_port: Option<u16>,
    /// Override the service-facing port.
    #[arg(long)]
    backend_port: Option<u16>,
    /// Override the publish-only monitor port.
    #[arg(long)]
    monitor_port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "broker starting");

    let mut cfg = match &args.config {
        Some(path) => match BrokerConfig::load_from_path(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("FATAL: failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => BrokerConfig::default(),
    };
    if let Some(bind_addr) = args.bind_addr {
        cfg.bind_addr = bind_addr;
    }
    if let Some(port) = args.frontend_port {
        cfg.frontend_port = port;
    }
    if let Some(port) = args.backend_port {
        cfg.backend_port = port;
    }
    if let Some(port) = args.monitor_port {
        cfg.monitor_port = port;
    }
    if let Err(e) = cfg.validate() {
        eprintln!("FATAL: {e}");
        std::process::exit(1);
    }

    let broker = match Broker::start(cfg).await {
        Ok(broker) => broker,
        Err(e) => {
            eprintln!("FATAL: failed to start broker: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("FATAL: could not listen for shutdown signal: {e}");
        std::process::exit(1);
    }
    info!("shutdown signal received");
    if let Err(e) = broker.shutdown().await {
        tracing::warn!(error = %e, "shutdown incomplete");
        std::process::exit(2);
    }
}
