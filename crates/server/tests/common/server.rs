//! Service test harness.

use super::metadata::TestMetadata;
use super::mocks::{ControllableWarmer, MemoryBlockstore, RecordingPublisher};
use archivist_core::config::{AppConfig, TaskConfig};
use archivist_metadata::MetadataStore;
use archivist_server::cache::StorageCacheWarmer;
use archivist_server::dispatcher::{TaskPublisher, TaskQueue, WorkerPool};
use archivist_server::resolver::ChunkResolver;
use archivist_server::{AppState, create_router};
use archivist_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A fully wired service over a temp SQLite store, a filesystem read cache
/// and an in-memory blockstore.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub cache: Arc<dyn ObjectStore>,
    pub blockstore: Arc<MemoryBlockstore>,
    pub warmer: Arc<ControllableWarmer>,
    /// Set when tasks are recorded instead of delivered.
    pub publisher: Option<Arc<RecordingPublisher>>,
    /// Set when a worker pool delivers tasks.
    pub queue: Option<TaskQueue>,
    cancel: CancellationToken,
    pool: Option<JoinHandle<()>>,
    _metadata: TestMetadata,
    _temp_dir: TempDir,
}

struct Parts {
    config: AppConfig,
    metadata: TestMetadata,
    cache: Arc<dyn ObjectStore>,
    blockstore: Arc<MemoryBlockstore>,
    resolver: Arc<ChunkResolver>,
    warmer: Arc<ControllableWarmer>,
    temp_dir: TempDir,
}

async fn build_parts(config: AppConfig) -> Parts {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let metadata = TestMetadata::new()
        .await
        .expect("Failed to create node store");
    let cache: Arc<dyn ObjectStore> = Arc::new(
        FilesystemBackend::new(temp_dir.path().join("cache"))
            .await
            .expect("Failed to create cache backend"),
    );
    let blockstore = Arc::new(MemoryBlockstore::new());
    let resolver = Arc::new(ChunkResolver::new(metadata.store(), blockstore.clone()));
    let warmer = Arc::new(ControllableWarmer::wrapping(Arc::new(
        StorageCacheWarmer::new(resolver.clone(), cache.clone()),
    )));

    Parts {
        config,
        metadata,
        cache,
        blockstore,
        resolver,
        warmer,
        temp_dir,
    }
}

#[allow(dead_code)]
impl TestServer {
    /// Tasks are recorded by a [`RecordingPublisher`] and never run.
    pub async fn new() -> Self {
        Self::recording(AppConfig::for_testing()).await
    }

    pub async fn recording(config: AppConfig) -> Self {
        let parts = build_parts(config).await;
        let publisher = Arc::new(RecordingPublisher::new());
        Self::assemble(parts, publisher.clone(), Some(publisher), None)
    }

    /// Tasks are delivered by a real worker pool.
    pub async fn with_workers() -> Self {
        Self::with_task_config(AppConfig::for_testing().tasks).await
    }

    pub async fn with_task_config(tasks: TaskConfig) -> Self {
        let mut config = AppConfig::for_testing();
        config.tasks = tasks;
        let parts = build_parts(config).await;

        let (queue, receiver) = TaskQueue::new(parts.config.tasks.max_retries);
        let task_config = parts.config.tasks.clone();
        let mut server = Self::assemble(parts, Arc::new(queue.clone()), None, Some(queue.clone()));

        let pool = WorkerPool::new(
            receiver,
            queue,
            server.state.handler_registry(),
            task_config,
            server.cancel.clone(),
        );
        server.pool = Some(tokio::spawn(pool.run()));
        server
    }

    fn assemble(
        parts: Parts,
        publisher: Arc<dyn TaskPublisher>,
        recording: Option<Arc<RecordingPublisher>>,
        queue: Option<TaskQueue>,
    ) -> Self {
        let state = AppState::with_warmer(
            parts.config,
            parts.metadata.store(),
            parts.cache.clone(),
            parts.resolver,
            publisher,
            parts.warmer.clone(),
        );
        let router = create_router(state.clone());

        Self {
            router,
            state,
            cache: parts.cache,
            blockstore: parts.blockstore,
            warmer: parts.warmer,
            publisher: recording,
            queue,
            cancel: CancellationToken::new(),
            pool: None,
            _metadata: parts.metadata,
            _temp_dir: parts.temp_dir,
        }
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    pub fn recorded(&self) -> &RecordingPublisher {
        self.publisher
            .as_deref()
            .expect("server was built with a worker pool")
    }

    /// Wait until the worker pool has no queued, running or backed-off task.
    pub async fn settle(&self) {
        let queue = self.queue.as_ref().expect("server was built without workers");
        assert!(
            queue.wait_idle(Duration::from_secs(10)).await,
            "tasks still outstanding: {}",
            queue.outstanding()
        );
    }

    /// Stop the worker pool and wait for it to drain.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(pool) = self.pool.take() {
            pool.await.expect("worker pool panicked");
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
