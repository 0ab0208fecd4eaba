use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::GateConfig;
use turnstile::gate::AdmissionGate;
use turnstile::http::HttpServer;
use turnstile::ratelimit::{spawn_sweeper, Clock, RateTable, SystemClock};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "turnstile")]
#[command(about = "Per-client sliding-window admission gate")]
#[command(version)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GateConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        window_secs = config.rate_limiting.window_secs,
        limit = config.rate_limiting.limit,
        trust_enabled = config.trust.enabled,
        "Configuration loaded"
    );

    // Initialize the rate table and its sweeper
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let table = Arc::new(
        RateTable::new(config.policy()?).with_sweep_sample_rate(config.rate_limiting.sweep_sample_rate),
    );
    let sweeper = spawn_sweeper(table.clone(), clock.clone(), config.sweep_interval());

    let gate = AdmissionGate::new(table, config.resolver()?, config.exemptions()).with_clock(clock);
    info!("Admission gate initialized");

    let server = HttpServer::new(config.server.listen_addr, Arc::new(gate));

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    sweeper.shutdown().await;
    info!("Turnstile stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
