//! backup-relay binary entry point

use std::path::PathBuf;

use backup_relay::{RunOutcome, config};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG_HELP: &str = "\
Configuration file (YAML):

  general:
    backup_interval: 3h        # required; units ns, us, ms, s, m, h
    oneshot: false
    on_failure: exit           # exit | continue
  source:
    api_token: <token>         # required
  destination:
    kind: onedrive             # onedrive | google_drive
    path_prefix: backups
    onedrive:
      tenant_id: <tenant>
      client_id: <client>
      client_secret: <secret>
  logging:
    level: info
    format: pretty             # pretty | json
  metrics:
    bind: 127.0.0.1:9464       # optional

Every key can be overridden from the environment, e.g.
BACKUP_RELAY__SOURCE__API_TOKEN or BACKUP_RELAY__GENERAL__BACKUP_INTERVAL.";

/// Relay the newest source backup to cloud drive storage
#[derive(Debug, Parser)]
#[command(name = "backup-relay", version, about, after_long_help = CONFIG_HELP)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Run a single backup cycle and exit
    #[arg(long)]
    oneshot: bool,
}

/// Application entry point
///
/// # Setup
/// 1. Parse arguments and load configuration
/// 2. Initialize tracing/logging
/// 3. Initialize metrics (and the endpoint, if bound)
/// 4. Run the relay until done or interrupted
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // 1. Load configuration
    let config = config::AppConfig::load(&args.config)?;

    // 2. Initialize tracing/logging
    init_tracing(&config.logging);
    tracing::info!(config = %args.config.display(), "Starting backup-relay...");

    // 3. Initialize metrics
    backup_relay::metrics::init_metrics();
    if let Some(bind) = config.metrics.bind.as_deref() {
        backup_relay::metrics::spawn_metrics_server(bind).await?;
    }

    // 4. Run
    let relay = backup_relay::build_relay(&config, args.oneshot)?;
    let outcome = relay.run(shutdown_signal()).await.inspect_err(|error| {
        tracing::error!(%error, "Backup relay stopped");
    })?;

    match outcome {
        RunOutcome::Completed => tracing::info!("Backup relay finished"),
        RunOutcome::Interrupted => tracing::info!("Backup relay interrupted"),
    }
    Ok(())
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("backup_relay={}", logging.level).into());

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "Failed to listen for interrupt");
        std::future::pending::<()>().await;
    }
}
