//! In-memory collaborators for orchestration tests.

use archivist_core::Cid;
use archivist_server::cache::CacheWarmer;
use archivist_server::dispatcher::{DispatchError, Task, TaskKind, TaskPublisher};
use archivist_storage::blockstore::verify_block;
use archivist_storage::{Blockstore, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Blockstore held in a map. Reads can be counted and switched off.
#[derive(Default)]
#[allow(dead_code)]
pub struct MemoryBlockstore {
    blocks: Mutex<HashMap<Cid, Bytes>>,
    reads: AtomicUsize,
}

#[allow(dead_code)]
impl MemoryBlockstore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bytes under `cid` without verifying them.
    pub fn insert_raw(&self, cid: Cid, data: impl Into<Bytes>) {
        self.blocks.lock().unwrap().insert(cid, data.into());
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }
}

#[async_trait]
impl Blockstore for MemoryBlockstore {
    async fn get_block(&self, cid: &Cid) -> StorageResult<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let block = self.blocks.lock().unwrap().get(cid).cloned();
        if let Some(data) = &block {
            verify_block(cid, data)?;
        }
        Ok(block)
    }

    async fn put_block(&self, cid: &Cid, data: Bytes) -> StorageResult<()> {
        verify_block(cid, &data)?;
        self.blocks.lock().unwrap().entry(*cid).or_insert(data);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Publisher that records tasks instead of delivering them.
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingPublisher {
    tasks: Mutex<Vec<Task>>,
}

#[allow(dead_code)]
impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn of_kind(&self, kind: TaskKind) -> Vec<Task> {
        self.published()
            .into_iter()
            .filter(|t| t.kind == kind)
            .collect()
    }

    /// Root cids of every published `object-archived` task, in order.
    pub fn archived_roots(&self) -> Vec<String> {
        self.of_kind(TaskKind::ObjectArchived)
            .into_iter()
            .filter_map(|t| t.params["root_cid"].as_str().map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.tasks.lock().unwrap().clear();
    }
}

#[async_trait]
impl TaskPublisher for RecordingPublisher {
    async fn publish(&self, tasks: Vec<Task>) -> Result<(), DispatchError> {
        self.tasks.lock().unwrap().extend(tasks);
        Ok(())
    }
}

/// Cache warmer whose outcome the test controls.
///
/// By default every warm succeeds immediately. It can be told to fail a
/// number of times, to stall, or to delegate to a real warmer.
#[derive(Default)]
#[allow(dead_code)]
pub struct ControllableWarmer {
    inner: Option<Arc<dyn CacheWarmer>>,
    failures_left: AtomicU32,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<Cid>>,
}

#[allow(dead_code)]
impl ControllableWarmer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delegate successful warms to `inner`.
    pub fn wrapping(inner: Arc<dyn CacheWarmer>) -> Self {
        Self {
            inner: Some(inner),
            ..Self::default()
        }
    }

    /// Fail the next `n` warms.
    pub fn fail_times(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Sleep this long before every warm.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<Cid> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CacheWarmer for ControllableWarmer {
    async fn warm(&self, root_cid: &Cid) -> anyhow::Result<u64> {
        self.calls.lock().unwrap().push(*root_cid);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            anyhow::bail!("injected warm failure for {root_cid}");
        }

        match &self.inner {
            Some(inner) => inner.warm(root_cid).await,
            None => Ok(0),
        }
    }
}
