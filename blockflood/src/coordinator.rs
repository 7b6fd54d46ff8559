//! Committing a blob uploaded by several instances.
//!
//! Instances never talk to each other. The coordinator learns that every instance has finished by
//! polling the store's list of uncommitted blocks until all expected identifiers show up. It then
//! commits the blob in block index order and cleans up after itself.
//!
//! Only identifier presence is checked. The coordinator trusts that whoever staged a block staged
//! the right bytes for it.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use blockflood_store::id::commit_list;
use blockflood_store::{BlockId, SharedStore, StoreError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::wait::{PollPolicy, WaitError, poll_until};

/// Ways the coordinator can fail.
#[derive(Debug, Error)]
pub enum CommitError {
    /// Listing the uncommitted blocks failed.
    #[error("failed to list uncommitted blocks")]
    Poll(#[source] StoreError),
    /// Not all blocks showed up within the maximum wait.
    #[error("{missing} blocks still missing after {attempts} polls in {elapsed:?}")]
    Stalled {
        /// The number of polls run.
        attempts: u32,
        /// The time spent polling.
        elapsed: Duration,
        /// The number of expected blocks absent from the last poll.
        missing: usize,
    },
    /// The coordinator was cancelled while polling.
    #[error("cancelled while waiting for blocks")]
    Cancelled,
    /// Committing the block list failed.
    #[error("failed to commit block list")]
    Commit(#[source] StoreError),
    /// Deleting the blob or container after the commit failed.
    #[error("failed to clean up after commit")]
    Cleanup(#[source] StoreError),
}

/// The phases a coordinator moves through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for all blocks to be staged.
    Polling,
    /// Submitting the block list.
    Committing,
    /// The blob is committed and gets cleaned up.
    Finalized,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Polling => "polling",
            Self::Committing => "committing",
            Self::Finalized => "finalized",
        })
    }
}

/// Compares an observed set of uncommitted blocks against the expected identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Convergence {
    /// Every expected block is present.
    Ready,
    /// Some expected blocks are absent.
    Pending {
        /// The number of expected blocks present.
        present: usize,
        /// The number of expected blocks absent.
        missing: usize,
    },
}

/// Checks whether `observed` contains every identifier in `expected`.
///
/// Foreign or duplicate entries in `observed` do not count towards readiness, so a size
/// comparison alone is only used as a shortcut for the negative case.
pub fn check_convergence(expected: &[BlockId], observed: &HashSet<BlockId>) -> Convergence {
    let present = expected.iter().filter(|id| observed.contains(*id)).count();
    if observed.len() >= expected.len() && present == expected.len() {
        Convergence::Ready
    } else {
        Convergence::Pending {
            present,
            missing: expected.len() - present,
        }
    }
}

/// The outcome of a successful coordination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitReport {
    /// The number of blocks committed.
    pub blocks: u32,
    /// The number of polls until all blocks were present.
    pub polls: u32,
    /// The time spent polling.
    pub waited: Duration,
}

/// Waits for all blocks of a blob, commits it and removes it again.
#[derive(Debug)]
pub struct Coordinator {
    store: SharedStore,
    blob: String,
    total_blocks: u32,
    policy: PollPolicy,
}

impl Coordinator {
    /// Creates a coordinator for `blob` consisting of `total_blocks` blocks.
    pub fn new(store: SharedStore, blob: &str, total_blocks: u32, policy: PollPolicy) -> Self {
        Self {
            store,
            blob: blob.to_owned(),
            total_blocks,
            policy,
        }
    }

    /// Runs all phases: polling, committing and cleanup.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<CommitReport, CommitError> {
        let expected = commit_list(self.total_blocks);

        self.enter(Phase::Polling);
        let (polls, waited) = self.wait_for_blocks(&expected, cancel).await?;

        self.enter(Phase::Committing);
        self.commit(&expected).await?;

        self.enter(Phase::Finalized);
        self.cleanup().await?;

        Ok(CommitReport {
            blocks: self.total_blocks,
            polls,
            waited,
        })
    }

    fn enter(&self, phase: Phase) {
        tracing::info!(blob = %self.blob, %phase, "Coordinator phase");
    }

    /// Polls until every block in `expected` is staged.
    async fn wait_for_blocks(
        &self,
        expected: &[BlockId],
        cancel: &CancellationToken,
    ) -> Result<(u32, Duration), CommitError> {
        let last_missing = AtomicUsize::new(expected.len());
        let last_missing = &last_missing;

        let polled = poll_until(self.policy, cancel, move |attempt| async move {
            self.observe(expected).await.map(|convergence| match convergence {
                Convergence::Ready => Some(()),
                Convergence::Pending { present, missing } => {
                    tracing::info!(attempt, present, missing, "Waiting for blocks");
                    last_missing.store(missing, Ordering::Relaxed);
                    None
                }
            })
        })
        .await;

        match polled {
            Ok(polled) => {
                tracing::info!(
                    polls = polled.attempts,
                    waited = ?polled.elapsed,
                    "All blocks present"
                );
                Ok((polled.attempts, polled.elapsed))
            }
            Err(WaitError::Probe(err)) => Err(CommitError::Poll(err)),
            Err(WaitError::Cancelled) => Err(CommitError::Cancelled),
            Err(WaitError::Stalled { attempts, elapsed }) => Err(CommitError::Stalled {
                attempts,
                elapsed,
                missing: last_missing.load(Ordering::Relaxed),
            }),
        }
    }

    async fn observe(&self, expected: &[BlockId]) -> Result<Convergence, StoreError> {
        let observed = self.store.list_uncommitted_blocks(&self.blob).await?;
        Ok(check_convergence(expected, &observed))
    }

    async fn commit(&self, ids: &[BlockId]) -> Result<(), CommitError> {
        self.store
            .put_block_list(&self.blob, ids)
            .await
            .map_err(CommitError::Commit)?;
        tracing::info!(blob = %self.blob, blocks = ids.len(), "Committed block list");
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), CommitError> {
        self.store
            .delete_blob(&self.blob)
            .await
            .map_err(CommitError::Cleanup)?;
        self.store
            .delete_container()
            .await
            .map_err(CommitError::Cleanup)?;
        tracing::debug!(blob = %self.blob, "Deleted blob and container");
        Ok(())
    }
}
