//! Entry point for the in-house conductor service
//!
//! Loads configuration, initializes logging, wires the application and runs
//! until SIGINT or SIGTERM, then shuts down gracefully.

use anyhow::Result;
use clap::Parser;
use inhouse_conductor::config::{validate_config, AppConfig};
use inhouse_conductor::service::{AppState, HealthCheck};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// In-house conductor - lobby lifecycle orchestration for community team games
#[derive(Parser)]
#[command(
    name = "inhouse-conductor",
    version,
    about = "Orchestrates in-house lobbies from queue pop to rated result",
    long_about = "Consumes player, worker and operator triggers over AMQP, runs each lobby through \
                  ready check, team selection, game hosting and result recording, and publishes \
                  chat notifications back to the community."
)]
struct Args {
    #[arg(short, long, value_name = "FILE", help = "Path to configuration file (TOML format)")]
    config: Option<PathBuf>,

    #[arg(short, long, value_name = "LEVEL", help = "Override log level (trace, debug, info, warn, error)")]
    log_level: Option<String>,

    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    health_port: Option<u16>,

    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    #[arg(long, help = "Validate configuration and exit without starting service")]
    dry_run: bool,
}

fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received SIGINT (Ctrl+C) signal");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM signal");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C signal");
    }

    Ok(())
}

/// Log a one-line status every 30 seconds
async fn status_log_task(app_state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    while app_state.is_running().await {
        interval.tick().await;
        let health = HealthCheck::check(&app_state).await;
        let open: usize = health.stats.lobbies_by_state.values().sum();
        info!(
            "Status {}: {} active lobbies, {} live workers, {} pending events",
            health.status, open, health.stats.live_workers, health.stats.pending_events
        );
    }
}

fn display_startup_banner(config: &AppConfig) {
    info!("In-house conductor");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!("   Trigger queue: {}", config.amqp.trigger_queue);
    info!("   Worker wait retry: {:?}", config.worker_wait_retry());
    info!("   Results poll interval: {:?}", config.results_poll_interval());
}

/// Load configuration from a file or the environment, then apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }
    if args.debug {
        config.service.log_level = "debug".to_string();
    }
    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }
    if let Some(port) = args.health_port {
        config.service.health_port = port;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    display_startup_banner(&config);
    if args.dry_run {
        info!("Configuration valid - exiting without starting service");
        return Ok(());
    }

    let app_state = match AppState::new(config.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    let status_task = tokio::spawn(status_log_task(app_state.clone()));
    info!("Press Ctrl+C to shut down gracefully");

    if let Err(e) = wait_for_shutdown_signal().await {
        warn!("Signal handling failed ({}), shutting down", e);
    }
    status_task.abort();

    // The coordinator drain inside shutdown is bounded by the same timeout
    let deadline = config.shutdown_timeout() + Duration::from_secs(5);
    match tokio::time::timeout(deadline, app_state.shutdown()).await {
        Ok(Ok(())) => info!("Graceful shutdown completed"),
        Ok(Err(e)) => warn!("Shutdown finished with errors: {}", e),
        Err(_) => warn!("Shutdown timeout exceeded, forcing exit"),
    }

    Ok(())
}
