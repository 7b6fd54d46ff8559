//! Command line entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use blockflood_store::{AzureBlobStore, ConnectionString, InMemoryStore, SharedStore};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Storage};
use crate::observability;
use crate::report::print_report;
use crate::run::{RunSettings, run};
use crate::shard::{MAX_BLOCKS, RunPlan};

/// Uploads a large blob as many blocks in parallel, optionally spread over several instances.
///
/// Every instance stages its share of the blocks. Instance 0 waits until all blocks of all
/// instances are staged, commits the blob and deletes it again.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// number of blocks in the blob, across all instances
    #[argh(positional, default = "MAX_BLOCKS")]
    total_blocks: u32,

    /// zero-based index of this instance
    #[argh(positional, default = "0")]
    instance_id: u32,

    /// number of cooperating instances
    #[argh(positional, default = "1")]
    total_instances: u32,
}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Reject bad arguments before touching configuration or the network.
    let plan = RunPlan::new(args.total_blocks, args.instance_id, args.total_instances)?;
    let config = Config::load(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("blockflood-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    let store = build_store(&config)?;
    let mut settings = RunSettings::from_config(&config);
    settings.progress = ProgressBar::no_length()
        .with_message("Uploading blocks")
        .with_style(ProgressStyle::with_template(
            "{msg} {wide_bar} {pos}/{len} {elapsed}",
        )?);
    settings
        .progress
        .enable_steady_tick(Duration::from_millis(100));

    let report = runtime.block_on(async move {
        let cancel = CancellationToken::new();
        tokio::spawn(cancel_on_signal(cancel.clone()));
        run(store, plan, &settings, &cancel).await
    })?;

    print_report(&report);
    Ok(())
}

fn build_store(config: &Config) -> Result<SharedStore> {
    Ok(match config.storage {
        Storage::Memory => Arc::new(InMemoryStore::new()),
        Storage::Azure => {
            let credential = ConnectionString::from_env()?;
            let store = AzureBlobStore::new(credential, &config.container, config.request_timeout)
                .context("failed to create the Azure client")?;
            Arc::new(store)
        }
    })
}

/// Fires `cancel` on the first SIGINT or SIGTERM.
async fn cancel_on_signal(cancel: CancellationToken) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(error) => {
            tracing::warn!(%error, "Cannot listen for SIGTERM");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }

    tracing::warn!("Interrupted, waiting for uploads in flight to settle");
    cancel.cancel();
}
