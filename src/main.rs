use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use clinic_resilience::{Runtime, admin::AdminServer, config::Config, metrics};

#[derive(Parser, Debug)]
#[command(name = "clinic-resilience")]
#[command(about = "Health monitoring and fallback data layer for the clinic booking site")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Run one round of health checks, print the dashboard and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = if args.config.exists() {
        info!("Loading configuration from {:?}", args.config);
        Config::load(&args.config)?
    } else {
        warn!("{:?} not found, using built-in services and environment", args.config);
        Config::from_env()?
    };

    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    if let Some(ref metrics_config) = config.metrics {
        info!("Starting Prometheus metrics server on {}", metrics_config.address);
        if let Err(e) = metrics::start_metrics_server(&metrics_config.address) {
            warn!("Failed to start metrics server: {}. Continuing without metrics.", e);
        }
    }

    let admin_address = config
        .admin
        .as_ref()
        .map(|admin| admin.address.parse::<SocketAddr>())
        .transpose()
        .context("Invalid admin address")?;

    let runtime = Runtime::new(config)?;

    if args.check {
        runtime.check_all().await;
        println!("{}", serde_json::to_string_pretty(&runtime.status().dashboard())?);
        return Ok(());
    }

    runtime.start();

    match admin_address {
        Some(address) => {
            let server = AdminServer::new(runtime.admin_api(), address);
            if let Err(e) = server.run_until(shutdown_signal()).await {
                error!("Status API failed: {}", e);
            }
        }
        None => shutdown_signal().await,
    }

    info!("Shutdown signal received");
    runtime.shutdown();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
