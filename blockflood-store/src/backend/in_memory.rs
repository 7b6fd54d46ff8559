//! In-memory block store.
//!
//! This provides a [`BlockStore`](super::common::BlockStore) backed by a `HashMap`. It backs the
//! `memory` storage mode and all tests. The store is [`Clone`], so cooperating instances in a test
//! can share one store while the test keeps a handle for direct inspection.
//!
//! Listings can be made to lag behind writes with [`InMemoryStore::with_listing_lag`], which
//! models the eventually consistent block listing of real stores.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use super::common::BlockStore;
use crate::error::{StoreError, StoreResult};
use crate::id::BlockId;

#[derive(Debug, Default)]
struct StagedBlock {
    data: Bytes,
    /// The listing generation after which this block shows up in listings.
    visible_after: u64,
}

#[derive(Debug, Default)]
struct Blob {
    staged: HashMap<BlockId, StagedBlock>,
    committed: Option<Vec<(BlockId, Bytes)>>,
}

#[derive(Debug, Default)]
struct State {
    container_exists: bool,
    blobs: HashMap<String, Blob>,
    listings: u64,
}

impl State {
    fn require_container(&self) -> StoreResult<()> {
        if self.container_exists {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, "container does not exist").into())
        }
    }
}

/// A [`BlockStore`] that keeps everything in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    listing_lag: u64,
}

impl InMemoryStore {
    /// Creates an empty store whose container does not exist yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hides every newly staged block from the next `lag` listings.
    pub fn with_listing_lag(mut self, lag: u64) -> Self {
        self.listing_lag = lag;
        self
    }

    /// Returns `true` if the container currently exists.
    pub fn container_exists(&self) -> bool {
        self.state.lock().unwrap().container_exists
    }

    /// Returns the number of staged but uncommitted blocks of `blob`, ignoring listing lag.
    pub fn uncommitted_count(&self, blob: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.blobs.get(blob).map_or(0, |b| b.staged.len())
    }

    /// Returns the committed block order of `blob`, if it has been committed.
    pub fn committed(&self, blob: &str) -> Option<Vec<BlockId>> {
        let state = self.state.lock().unwrap();
        let committed = state.blobs.get(blob)?.committed.as_ref()?;
        Some(committed.iter().map(|(id, _)| id.clone()).collect())
    }

    /// Returns the assembled content of `blob`, if it has been committed.
    pub fn read(&self, blob: &str) -> Option<Bytes> {
        let state = self.state.lock().unwrap();
        let committed = state.blobs.get(blob)?.committed.as_ref()?;
        let mut buf = Vec::new();
        for (_, data) in committed {
            buf.extend_from_slice(data);
        }
        Some(buf.into())
    }

    /// Returns `true` if the store holds no blobs at all.
    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().blobs.is_empty()
    }
}

#[async_trait::async_trait]
impl BlockStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn create_container(&self) -> StoreResult<()> {
        self.state.lock().unwrap().container_exists = true;
        Ok(())
    }

    async fn put_block(&self, blob: &str, id: &BlockId, data: Bytes) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.require_container()?;
        let visible_after = state.listings + self.listing_lag;
        let blob = state.blobs.entry(blob.to_owned()).or_default();
        blob.staged
            .insert(id.clone(), StagedBlock { data, visible_after });
        Ok(())
    }

    async fn list_uncommitted_blocks(&self, blob: &str) -> StoreResult<HashSet<BlockId>> {
        let mut state = self.state.lock().unwrap();
        state.require_container()?;
        state.listings += 1;
        let generation = state.listings;

        let Some(blob) = state.blobs.get(blob) else {
            return Ok(HashSet::new());
        };
        Ok(blob
            .staged
            .iter()
            .filter(|(_, block)| generation > block.visible_after)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn put_block_list(&self, blob: &str, ids: &[BlockId]) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.require_container()?;
        let blob = state.blobs.entry(blob.to_owned()).or_default();

        let mut committed = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(block) = blob.staged.get(id) else {
                return Err(StoreError::MissingBlock { id: id.clone() });
            };
            committed.push((id.clone(), block.data.clone()));
        }

        // Committing discards every staged block, listed or not.
        blob.staged.clear();
        blob.committed = Some(committed);
        Ok(())
    }

    async fn delete_blob(&self, blob: &str) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.require_container()?;
        state.blobs.remove(blob);
        Ok(())
    }

    async fn delete_container(&self) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.container_exists = false;
        state.blobs.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(index: u32) -> (BlockId, Bytes) {
        (BlockId::encode(index), Bytes::from(vec![index as u8; 4]))
    }

    #[tokio::test]
    async fn requires_container() {
        let store = InMemoryStore::new();
        let (id, data) = block(0);
        assert!(store.put_block("blob", &id, data.clone()).await.is_err());

        store.create_container().await.unwrap();
        store.put_block("blob", &id, data).await.unwrap();
        assert_eq!(store.uncommitted_count("blob"), 1);
    }

    #[tokio::test]
    async fn commit_assembles_in_list_order() {
        let store = InMemoryStore::new();
        store.create_container().await.unwrap();
        for index in [2, 0, 1] {
            let (id, data) = block(index);
            store.put_block("blob", &id, data).await.unwrap();
        }

        let order = vec![BlockId::encode(0), BlockId::encode(1), BlockId::encode(2)];
        store.put_block_list("blob", &order).await.unwrap();

        assert_eq!(store.committed("blob").unwrap(), order);
        assert_eq!(
            store.read("blob").unwrap().as_ref(),
            &[0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2]
        );
        assert_eq!(store.uncommitted_count("blob"), 0);
    }

    #[tokio::test]
    async fn commit_rejects_unstaged_blocks() {
        let store = InMemoryStore::new();
        store.create_container().await.unwrap();
        let (id, data) = block(0);
        store.put_block("blob", &id, data).await.unwrap();

        let result = store
            .put_block_list("blob", &[BlockId::encode(0), BlockId::encode(1)])
            .await;
        assert!(matches!(result, Err(StoreError::MissingBlock { id }) if id == BlockId::encode(1)));
        assert!(store.committed("blob").is_none());
    }

    #[tokio::test]
    async fn listing_lags_behind_writes() {
        let store = InMemoryStore::new().with_listing_lag(2);
        store.create_container().await.unwrap();
        let (id, data) = block(7);
        store.put_block("blob", &id, data).await.unwrap();

        assert!(store.list_uncommitted_blocks("blob").await.unwrap().is_empty());
        assert!(store.list_uncommitted_blocks("blob").await.unwrap().is_empty());
        let listed = store.list_uncommitted_blocks("blob").await.unwrap();
        assert!(listed.contains(&id));
    }

    #[tokio::test]
    async fn deleting_container_drops_blobs() {
        let store = InMemoryStore::new();
        store.create_container().await.unwrap();
        let (id, data) = block(0);
        store.put_block("blob", &id, data).await.unwrap();

        store.delete_container().await.unwrap();
        assert!(store.is_empty());
        assert!(!store.container_exists());
        // Deleting twice is fine.
        store.delete_container().await.unwrap();
    }
}
