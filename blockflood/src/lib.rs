//! Parallel block uploads into a single blob, shared out over several instances.
//!
//! Each instance runs an [`UploadDriver`](upload::UploadDriver) over its [`Shard`](shard::Shard)
//! of the blob's blocks, keeping a bounded number of requests in flight. The instance with id 0
//! additionally runs the [`Coordinator`](coordinator::Coordinator), which waits until the store
//! lists every block as staged and then commits the blob in order.
//!
//! The whole flow of one instance is [`run`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod limiter;
pub mod observability;
pub mod payload;
pub mod report;
pub mod run;
pub mod shard;
pub mod upload;
pub mod wait;

pub use run::{RunError, RunReport, RunSettings, run};
