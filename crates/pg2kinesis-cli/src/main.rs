use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

mod commands;
mod config;
mod worker;

use config::WorkerConfig;
use pg2kinesis_core::BackoffConfig;
use pg2kinesis_kinesis::{KinesisSink, Publisher, PublisherConfig};
use pg2kinesis_pg::{SessionConfig, SessionConnector};
use worker::{Worker, WorkerOptions};

#[derive(Parser)]
#[command(name = "pg2kinesis")]
#[command(about = "Replicate Postgres logical changes into a Kinesis stream")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the replication worker
    Run {
        /// Replication slot name (overrides REPLICATION_SLOT_NAME)
        #[arg(long)]
        slot: Option<String>,

        /// Poll interval in milliseconds when the log is idle
        #[arg(long, default_value = "500")]
        poll_interval_ms: u64,

        /// Maximum changes to peek per poll
        #[arg(long, default_value = "1000")]
        max_changes: i64,

        /// Maximum publish retries per batch before the worker halts
        #[arg(long, default_value = "5")]
        max_retries: u32,

        /// Maximum reconnect attempts before the worker halts
        #[arg(long, default_value = "10")]
        max_reconnects: u32,
    },

    /// Show replication slot status
    Status,

    /// Drop the replication slot
    DropSlot {
        /// Confirm the drop; without this the command only explains
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pg2kinesis=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env()?;

    match cli.command {
        Commands::Run {
            slot,
            poll_interval_ms,
            max_changes,
            max_retries,
            max_reconnects,
        } => {
            let mut config = config;
            if let Some(slot) = slot {
                config.slot_name = slot;
            }
            cmd_run(
                config,
                Duration::from_millis(poll_interval_ms),
                max_changes,
                max_retries,
                max_reconnects,
            )
            .await
        }
        Commands::Status => commands::cmd_status(config).await,
        Commands::DropSlot { yes } => commands::cmd_drop_slot(config, yes).await,
    }
}

async fn cmd_run(
    config: WorkerConfig,
    poll_interval: Duration,
    max_changes: i64,
    max_retries: u32,
    max_reconnects: u32,
) -> Result<()> {
    info!(
        slot = %config.slot_name,
        stream = %config.stream_name,
        plugin = %config.decoder_plugin,
        "Starting replication worker"
    );

    let connector = SessionConnector::new(SessionConfig {
        connection_string: config.connection_string(),
        slot_name: config.slot_name.clone(),
        plugin: config.decoder_plugin.clone(),
        create_slot: true,
        max_changes,
        poll_interval,
    });

    let sink = KinesisSink::from_env().await;
    let publisher = Publisher::new(
        sink,
        PublisherConfig {
            stream_name: config.stream_name.clone(),
            max_retries,
            ..Default::default()
        },
    );

    let options = WorkerOptions {
        reconnect: BackoffConfig {
            max_attempts: max_reconnects,
            ..Default::default()
        },
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown requested, stopping after the current batch");
        let _ = shutdown_tx.send(true);
    });

    let mut worker = Worker::new(connector, publisher, options);
    let result = worker.run(shutdown_rx).await;

    if result.is_err() {
        // The slot survives the worker and keeps pinning WAL on the source
        // until the worker reattaches or the slot is dropped.
        warn!(
            slot = %config.slot_name,
            "Worker exited but the replication slot still exists; WAL will \
             accumulate on the source. Drop it with 'pg2kinesis drop-slot --yes' \
             or SELECT pg_drop_replication_slot('{}');",
            config.slot_name
        );
    }

    result
        .map(|_| ())
        .context("Replication worker failed")
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
