//! Block stores used by `blockflood`.
//!
//! A [`BlockStore`] stages blocks of a blob independently and later commits them into a readable
//! blob in a given order. This crate provides the trait together with an in-memory implementation
//! and one speaking the Azure Blob REST API, plus the [`BlockId`] codec shared by all of them.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod backend;
pub mod credential;
mod error;
pub mod id;

pub use backend::{AzureBlobStore, BlockStore, InMemoryStore, SharedStore, USER_AGENT};
pub use credential::{ConnectionString, CredentialError};
pub use error::{StoreError, StoreResult};
pub use id::BlockId;
