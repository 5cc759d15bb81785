// src/main.rs

//! catsync CLI
//!
//! Entry point for scheduled container runs and operator-triggered
//! recovery. The calendar scheduler that decides *when* to invoke a sync
//! lives outside this binary; it simply calls `catsync sync` or
//! `catsync sync --full` on its own schedule.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use catsync::error::Result;
use catsync::models::{Config, RunRequest, SyncMode, SyncStatus};
use catsync::pipeline::{run_inspect, run_sync, InspectMode};
use catsync::storage::LocalCheckpointStore;
use catsync::utils::log;

#[derive(Parser, Debug)]
#[command(
    name = "catsync",
    version,
    about = "Synchronizes a commerce product catalog to a customer-messaging platform"
)]

/// CLI Arguments
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

/// CLI Commands
#[derive(Subcommand, Debug)]
enum Command {
    /// Run a catalog sync
    Sync {
        /// Sync the entire catalog instead of the incremental window
        #[arg(long)]
        full: bool,
    },
    /// Resume a failed run from its manifest handle
    Resume {
        /// Manifest handle, as printed in the failure notification
        handle: String,
    },
    /// Interrogate the persisted manifest
    Inspect {
        /// Inspect the full-sync manifest instead of the incremental one
        #[arg(long)]
        full: bool,
        /// Show the record ids of one batch
        #[arg(long)]
        batch: Option<usize>,
        /// Find a record by SKU across all batches
        #[arg(long)]
        sku: Option<String>,
        /// Scan the manifest for inconsistencies
        #[arg(long)]
        check: bool,
    },
    /// Validate the configuration file
    Validate,
}

/// Main entry point
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config);
    if cli.quiet {
        config.logging.level = "warn".to_string();
        config.logging.show_progress = false;
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.clone()),
    )
    .init();
    log::init(&config.logging.level);

    config.validate()?;
    let config = Arc::new(config);

    let store = Arc::new(LocalCheckpointStore::new(
        &config.checkpoint.dir,
        config.checkpoint.lease_secs,
    ));

    // An operator abort is honored at the next batch boundary, never
    // mid-batch, so the manifest stays unambiguous.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn("Stop requested; finishing the current batch first");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Sync { full } => {
            let request = if full {
                RunRequest::Full
            } else {
                RunRequest::Incremental
            };
            let result = run_sync(config, store, request, cancel).await?;
            exit_for(result.status);
        }
        Command::Resume { handle } => {
            let result = run_sync(config, store, RunRequest::Resume { handle }, cancel).await?;
            exit_for(result.status);
        }
        Command::Inspect {
            full,
            batch,
            sku,
            check,
        } => {
            let mode = if full {
                SyncMode::Full
            } else {
                SyncMode::Incremental
            };
            let request = if check {
                InspectMode::Check
            } else if let Some(sku) = sku {
                InspectMode::Sku { sku }
            } else if let Some(index) = batch {
                InspectMode::Batch { index }
            } else {
                InspectMode::Summary
            };
            run_inspect(store.as_ref(), mode, &request).await?;
        }
        Command::Validate => {
            log::success("Configuration is valid");
        }
    }

    Ok(())
}

/// Scheduled runs report failure through the exit code as well as the
/// webhook, so the outer scheduler's logs agree with the notification.
fn exit_for(status: SyncStatus) {
    if matches!(status, SyncStatus::Failed | SyncStatus::PartiallyFailed) {
        std::process::exit(1);
    }
}
