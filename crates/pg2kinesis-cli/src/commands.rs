//! Operator commands for inspecting and managing the replication slot.

use anyhow::{Context, Result};
use tokio_postgres::NoTls;
use tracing::error;

use pg2kinesis_pg::{drop_slot, get_slot_info, slot_exists};

use crate::config::WorkerConfig;

async fn connect(config: &WorkerConfig) -> Result<tokio_postgres::Client> {
    let (client, connection) = tokio_postgres::connect(&config.connection_string(), NoTls)
        .await
        .context("Failed to connect to Postgres")?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "Postgres connection error");
        }
    });

    Ok(client)
}

pub async fn cmd_status(config: WorkerConfig) -> Result<()> {
    let client = connect(&config).await?;

    let Some(info) = get_slot_info(&client, &config.slot_name).await? else {
        println!(
            "Replication slot '{}' does not exist. Run 'pg2kinesis run' to create it.",
            config.slot_name
        );
        return Ok(());
    };

    println!("\nReplication Slot Status:");
    println!("  slot:                {}", info.slot_name);
    println!(
        "  plugin:              {}",
        info.plugin.as_deref().unwrap_or("(unknown)")
    );
    println!("  active:              {}", info.active);
    println!(
        "  confirmed_flush_lsn: {}",
        info.confirmed_flush_lsn.as_deref().unwrap_or("(none)")
    );
    println!(
        "  restart_lsn:         {}",
        info.restart_lsn.as_deref().unwrap_or("(none)")
    );
    println!("  target stream:       {}", config.stream_name);
    println!();

    Ok(())
}

/// Drop the replication slot. Destructive: any change not yet published to
/// the stream is lost, so it requires an explicit `--yes`.
pub async fn cmd_drop_slot(config: WorkerConfig, yes: bool) -> Result<()> {
    let client = connect(&config).await?;

    if !slot_exists(&client, &config.slot_name).await? {
        println!("Replication slot '{}' does not exist.", config.slot_name);
        return Ok(());
    }

    if !yes {
        println!(
            "Dropping slot '{}' discards any changes not yet delivered to '{}'.",
            config.slot_name, config.stream_name
        );
        println!("Re-run with --yes to confirm.");
        return Ok(());
    }

    drop_slot(&client, &config.slot_name).await?;
    println!("Dropped replication slot '{}'.", config.slot_name);

    Ok(())
}
