//! Running one instance from start to finish.

use blockflood_store::{SharedStore, StoreError};
use indicatif::ProgressBar;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::coordinator::{CommitError, CommitReport, Coordinator};
use crate::payload::{PAYLOAD_SEED, random_block};
use crate::shard::RunPlan;
use crate::upload::{UploadDriver, UploadError, UploadReport};
use crate::wait::PollPolicy;

/// The tunables of a single run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// The blob all instances upload into.
    pub blob: String,
    /// The size of every block in bytes.
    pub block_size: usize,
    /// The maximum number of uploads in flight.
    pub concurrency: usize,
    /// How the coordinator polls for the other instances' blocks.
    pub poll_policy: PollPolicy,
    /// Advanced once per settled block. Hidden unless the caller draws it.
    pub progress: ProgressBar,
}

impl RunSettings {
    /// Derives run settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            blob: config.blob.clone(),
            block_size: config.block_size.as_u64() as usize,
            concurrency: config.concurrency,
            poll_policy: config.poll_policy(),
            progress: ProgressBar::hidden(),
        }
    }
}

/// What a finished run did.
#[derive(Debug)]
pub struct RunReport {
    /// This instance's uploads.
    pub upload: UploadReport,
    /// The commit, present only on the coordinating instance.
    pub commit: Option<CommitReport>,
}

/// Ways a run can fail.
#[derive(Debug, Error)]
pub enum RunError {
    /// The container could not be created.
    #[error("failed to create container")]
    Container(#[source] StoreError),
    /// Staging this instance's blocks failed.
    #[error(transparent)]
    Upload(#[from] UploadError),
    /// Committing the blob failed.
    #[error(transparent)]
    Commit(#[from] CommitError),
}

/// Uploads this instance's shard and, on the coordinator, commits the blob.
///
/// Every instance creates the container, since none knows whether it runs first. Instances other
/// than the coordinator are done once their blocks are staged.
pub async fn run(
    store: SharedStore,
    plan: RunPlan,
    settings: &RunSettings,
    cancel: &CancellationToken,
) -> Result<RunReport, RunError> {
    tracing::info!(
        store = store.name(),
        blob = %settings.blob,
        instance_id = plan.instance_id(),
        total_instances = plan.total_instances(),
        total_blocks = plan.total_blocks(),
        "Starting run"
    );

    store.create_container().await.map_err(RunError::Container)?;

    let driver = UploadDriver::new(store.clone(), &settings.blob, settings.concurrency)
        .with_progress(settings.progress.clone());
    let payload = random_block(settings.block_size, PAYLOAD_SEED);
    let upload = driver.upload(payload, plan.shard(), cancel).await;
    settings.progress.finish_and_clear();
    let upload = upload?;

    if !plan.is_coordinator() {
        tracing::info!("Blocks staged, leaving the commit to instance 0");
        return Ok(RunReport {
            upload,
            commit: None,
        });
    }

    let coordinator = Coordinator::new(
        store,
        &settings.blob,
        plan.total_blocks(),
        settings.poll_policy,
    );
    let commit = coordinator.run(cancel).await?;

    Ok(RunReport {
        upload,
        commit: Some(commit),
    })
}

