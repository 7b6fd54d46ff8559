use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::StoreResult;
use crate::id::BlockId;

/// User agent string used for outgoing requests.
pub const USER_AGENT: &str = concat!("blockflood/", env!("CARGO_PKG_VERSION"));

/// A shared, type-erased [`BlockStore`] instance.
pub type SharedStore = Arc<dyn BlockStore>;

/// A blob store that assembles blobs from independently staged blocks.
///
/// Every store is bound to a single container at construction. Staging a block is independent of
/// all other blocks; a blob only becomes readable once [`put_block_list`](Self::put_block_list)
/// commits an ordered list of staged blocks.
#[async_trait::async_trait]
pub trait BlockStore: Debug + Send + Sync + 'static {
    /// The backend name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Creates the container if it does not exist yet.
    ///
    /// Cooperating instances race on this call, so an existing container is not an error.
    async fn create_container(&self) -> StoreResult<()>;

    /// Stages a single block of `blob`.
    ///
    /// Staging the same identifier again replaces the previous content.
    async fn put_block(&self, blob: &str, id: &BlockId, data: Bytes) -> StoreResult<()>;

    /// Lists the identifiers of all staged but uncommitted blocks of `blob`.
    ///
    /// The listing is eventually consistent and may miss recently staged blocks.
    async fn list_uncommitted_blocks(&self, blob: &str) -> StoreResult<HashSet<BlockId>>;

    /// Commits `blob` from the given staged blocks, in list order.
    async fn put_block_list(&self, blob: &str, ids: &[BlockId]) -> StoreResult<()>;

    /// Deletes `blob`. Deleting a missing blob succeeds.
    async fn delete_blob(&self, blob: &str) -> StoreResult<()>;

    /// Deletes the container with everything in it. Deleting a missing container succeeds.
    async fn delete_container(&self) -> StoreResult<()>;
}
