//! The block upload driver.
//!
//! [`UploadDriver::upload`] stages every block of a [`Shard`] with at most a fixed number of
//! requests in flight. A new request starts as soon as a previous one settles, rather than in
//! waves, which keeps the link busy even when single requests are slow. Failed blocks are not
//! retried. They are collected and reported together once every request has settled.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use blockflood_store::{BlockId, SharedStore, StoreError};
use bytes::Bytes;
use indicatif::ProgressBar;
use sketches_ddsketch::DDSketch;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::limiter::ConcurrencyLimiter;
use crate::shard::Shard;

/// The number of failures spelled out in [`UploadError`]'s message.
const FAILURES_IN_MESSAGE: usize = 3;

/// A single block that could not be staged.
#[derive(Debug, Error)]
#[error("block {index}: {error}")]
pub struct BlockFailure {
    /// The index of the block.
    pub index: u32,
    /// The error returned by the store.
    #[source]
    pub error: StoreError,
}

/// Ways an upload of a shard can fail.
#[derive(Debug, Error)]
pub enum UploadError {
    /// At least one block failed. All blocks were attempted.
    #[error(
        "{} of {submitted} block uploads failed: {}",
        .failures.len(),
        summarize(.failures)
    )]
    Failed {
        /// The number of uploads issued.
        submitted: u32,
        /// Every failure, ordered by block index.
        failures: Vec<BlockFailure>,
    },
    /// The upload was cancelled before all blocks were issued.
    #[error("upload cancelled after {completed} of {submitted} issued blocks settled")]
    Cancelled {
        /// The number of uploads issued before cancellation.
        submitted: u32,
        /// The number of issued uploads that settled, successful or not.
        completed: u32,
    },
}

impl UploadError {
    /// Every individual block failure. Empty for cancellations.
    pub fn failures(&self) -> &[BlockFailure] {
        match self {
            Self::Failed { failures, .. } => failures,
            Self::Cancelled { .. } => &[],
        }
    }
}

fn summarize(failures: &[BlockFailure]) -> String {
    let mut summary = failures
        .iter()
        .take(FAILURES_IN_MESSAGE)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    if failures.len() > FAILURES_IN_MESSAGE {
        summary.push_str(&format!(
            "; and {} more",
            failures.len() - FAILURES_IN_MESSAGE
        ));
    }
    summary
}

/// Statistics of a successful shard upload.
pub struct UploadReport {
    /// The number of blocks staged.
    pub blocks: u32,
    /// The number of payload bytes staged.
    pub bytes: u64,
    /// Wall-clock time for the whole shard.
    pub elapsed: Duration,
    /// Latencies of individual block uploads, in seconds.
    pub latency: DDSketch,
    /// The highest number of uploads in flight at once.
    pub peak_concurrency: usize,
}

impl fmt::Debug for UploadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadReport")
            .field("blocks", &self.blocks)
            .field("bytes", &self.bytes)
            .field("elapsed", &self.elapsed)
            .field("peak_concurrency", &self.peak_concurrency)
            .finish_non_exhaustive()
    }
}

/// Accumulates the outcomes of settled uploads.
#[derive(Default)]
struct Settled {
    count: u32,
    succeeded: u32,
    latency: DDSketch,
    failures: Vec<BlockFailure>,
}

type UploadOutcome = (u32, Duration, Result<(), StoreError>);

impl Settled {
    fn record(&mut self, joined: Result<UploadOutcome, JoinError>, progress: &ProgressBar) {
        // Upload tasks are never aborted, so a join error is always a panic.
        let (index, latency, result) = match joined {
            Ok(outcome) => outcome,
            Err(err) => std::panic::resume_unwind(err.into_panic()),
        };

        self.count += 1;
        match result {
            Ok(()) => {
                self.succeeded += 1;
                self.latency.add(latency.as_secs_f64());
            }
            Err(error) => {
                tracing::warn!(index, %error, "Block upload failed");
                self.failures.push(BlockFailure { index, error });
                progress.set_message(format!("{} failed", self.failures.len()));
            }
        }
        progress.inc(1);
    }
}

/// Stages the blocks of a shard against a store with bounded concurrency.
#[derive(Debug)]
pub struct UploadDriver {
    store: SharedStore,
    blob: Arc<str>,
    limiter: ConcurrencyLimiter,
    progress: ProgressBar,
}

impl UploadDriver {
    /// Creates a driver uploading blocks of `blob` with at most `concurrency` requests in flight.
    pub fn new(store: SharedStore, blob: &str, concurrency: usize) -> Self {
        Self {
            store,
            blob: Arc::from(blob),
            limiter: ConcurrencyLimiter::new(concurrency),
            progress: ProgressBar::hidden(),
        }
    }

    /// Reports progress on the given bar. Its length is set when the upload starts.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// The limiter bounding this driver's requests.
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Uploads `payload` once for every block index of `shard`.
    ///
    /// Returns after every issued request has settled. When `cancel` fires, no further requests
    /// are issued, the outstanding ones run to completion, and the upload fails with
    /// [`UploadError::Cancelled`].
    pub async fn upload(
        &self,
        payload: Bytes,
        shard: Shard,
        cancel: &CancellationToken,
    ) -> Result<UploadReport, UploadError> {
        tracing::info!(
            start = shard.start,
            count = shard.count,
            block_size = payload.len(),
            concurrency = self.limiter.max_permits(),
            "Uploading blocks"
        );
        self.progress.set_length(shard.count.into());

        let start = Instant::now();
        let mut tasks = JoinSet::new();
        let mut settled = Settled::default();
        let mut submitted = 0;
        let mut cancelled = false;

        for index in shard.indices() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = self.limiter.acquire() => permit,
            };

            while let Some(joined) = tasks.try_join_next() {
                settled.record(joined, &self.progress);
            }

            let id = BlockId::encode(index);
            tracing::debug!(index, %id, "Issuing block upload");

            let store = Arc::clone(&self.store);
            let blob = Arc::clone(&self.blob);
            let data = payload.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let start = Instant::now();
                let result = store.put_block(&blob, &id, data).await;
                (index, start.elapsed(), result)
            });
            submitted += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            settled.record(joined, &self.progress);
        }
        let elapsed = start.elapsed();

        if cancelled {
            tracing::warn!(submitted, completed = settled.count, "Upload cancelled");
            return Err(UploadError::Cancelled {
                submitted,
                completed: settled.count,
            });
        }

        if !settled.failures.is_empty() {
            let mut failures = settled.failures;
            failures.sort_by_key(|failure| failure.index);
            tracing::error!(
                failed = failures.len(),
                submitted,
                ?elapsed,
                "Block uploads failed"
            );
            return Err(UploadError::Failed {
                submitted,
                failures,
            });
        }

        tracing::info!(blocks = settled.succeeded, ?elapsed, "Uploaded blocks");
        Ok(UploadReport {
            blocks: settled.succeeded,
            bytes: u64::from(settled.succeeded) * payload.len() as u64,
            elapsed,
            latency: settled.latency,
            peak_concurrency: self.limiter.peak_permits(),
        })
    }
}
