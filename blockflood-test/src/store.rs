//! An instrumented [`BlockStore`] wrapper for tests.
//!
//! [`InstrumentedStore`] forwards every call to an inner store while recording how many uploads
//! are in flight, and can inject latency and failures per block index.
//!
//! ```
//! use blockflood_store::InMemoryStore;
//! use blockflood_test::store::InstrumentedStore;
//!
//! let store = InstrumentedStore::new(InMemoryStore::new()).fail_blocks([3, 5]);
//! assert_eq!(store.peak_in_flight(), 0);
//! ```

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use blockflood_store::{BlockId, BlockStore, StoreResult};
use bytes::Bytes;

type LatencyFn = dyn Fn(u32) -> Duration + Send + Sync;

#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    put_calls: AtomicUsize,
    list_calls: AtomicUsize,
    completed: Mutex<VecDeque<u32>>,
}

/// Decrements the in-flight counter when an upload ends, however it ends.
struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A [`BlockStore`] that records concurrency and injects faults.
pub struct InstrumentedStore<S> {
    inner: S,
    counters: Arc<Counters>,
    failing: HashSet<u32>,
    latency: Option<Arc<LatencyFn>>,
    fail_commit: bool,
    fail_cleanup: bool,
    fail_create_container: bool,
}

impl<S: BlockStore> InstrumentedStore<S> {
    /// Wraps `inner` without any latency or failures.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            counters: Arc::default(),
            failing: HashSet::new(),
            latency: None,
            fail_commit: false,
            fail_cleanup: false,
            fail_create_container: false,
        }
    }

    /// Makes uploads of the given block indices fail.
    pub fn fail_blocks(mut self, indices: impl IntoIterator<Item = u32>) -> Self {
        self.failing.extend(indices);
        self
    }

    /// Delays each upload by the duration computed from its block index.
    pub fn latency(mut self, f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        self.latency = Some(Arc::new(f));
        self
    }

    /// Makes every block list commit fail.
    pub fn fail_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    /// Makes deleting the blob fail, leaving whatever was committed in place.
    pub fn fail_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    /// Makes creating the container fail.
    pub fn fail_create_container(mut self) -> Self {
        self.fail_create_container = true;
        self
    }

    /// The highest number of concurrent uploads observed so far.
    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak_in_flight.load(Ordering::SeqCst)
    }

    /// The number of uploads currently in flight.
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// The number of upload calls received, including failed ones.
    pub fn put_calls(&self) -> usize {
        self.counters.put_calls.load(Ordering::SeqCst)
    }

    /// The number of listing calls received.
    pub fn list_calls(&self) -> usize {
        self.counters.list_calls.load(Ordering::SeqCst)
    }

    /// Block indices in the order their uploads completed successfully.
    pub fn completion_order(&self) -> Vec<u32> {
        self.counters.completed.lock().unwrap().iter().copied().collect()
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for InstrumentedStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedStore")
            .field("inner", &self.inner)
            .field("failing", &self.failing)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<S: BlockStore> BlockStore for InstrumentedStore<S> {
    fn name(&self) -> &'static str {
        "instrumented"
    }

    async fn create_container(&self) -> StoreResult<()> {
        if self.fail_create_container {
            return Err(io::Error::other("injected container failure").into());
        }
        self.inner.create_container().await
    }

    async fn put_block(&self, blob: &str, id: &BlockId, data: Bytes) -> StoreResult<()> {
        let _in_flight = InFlight::enter(&self.counters);
        self.counters.put_calls.fetch_add(1, Ordering::SeqCst);

        let index = id.decode()?;
        if let Some(latency) = &self.latency {
            tokio::time::sleep(latency(index)).await;
        }
        if self.failing.contains(&index) {
            return Err(io::Error::other(format!("injected failure for block {index}")).into());
        }

        self.inner.put_block(blob, id, data).await?;
        self.counters.completed.lock().unwrap().push_back(index);
        Ok(())
    }

    async fn list_uncommitted_blocks(&self, blob: &str) -> StoreResult<HashSet<BlockId>> {
        self.counters.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_uncommitted_blocks(blob).await
    }

    async fn put_block_list(&self, blob: &str, ids: &[BlockId]) -> StoreResult<()> {
        if self.fail_commit {
            return Err(io::Error::other("injected commit failure").into());
        }
        self.inner.put_block_list(blob, ids).await
    }

    async fn delete_blob(&self, blob: &str) -> StoreResult<()> {
        if self.fail_cleanup {
            return Err(io::Error::other("injected delete failure").into());
        }
        self.inner.delete_blob(blob).await
    }

    async fn delete_container(&self) -> StoreResult<()> {
        self.inner.delete_container().await
    }
}
