//! Application state shared across handlers and task handlers.

use crate::archival::{ArchivalTracker, ArchiveObjectsHandler, ObjectArchivedHandler};
use crate::cache::{CacheWarmer, StorageCacheWarmer};
use crate::dispatcher::{HandlerRegistry, TaskKind, TaskPublisher};
use crate::resolver::ChunkResolver;
use archivist_core::config::AppConfig;
use archivist_metadata::MetadataStore;
use archivist_storage::{Blockstore, ObjectStore};
use std::sync::Arc;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Node store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Read cache for reassembled objects.
    pub cache: Arc<dyn ObjectStore>,
    /// Chunk lookups with blockstore fallback.
    pub resolver: Arc<ChunkResolver>,
    /// Archival lifecycle orchestration.
    pub tracker: Arc<ArchivalTracker>,
}

impl AppState {
    /// Wire the resolver, cache warmer and tracker over the given stores.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        cache: Arc<dyn ObjectStore>,
        blockstore: Arc<dyn Blockstore>,
        publisher: Arc<dyn TaskPublisher>,
    ) -> Self {
        let resolver = Arc::new(ChunkResolver::new(metadata.clone(), blockstore));
        let warmer = Arc::new(StorageCacheWarmer::new(resolver.clone(), cache.clone()));
        Self::with_warmer(config, metadata, cache, resolver, publisher, warmer)
    }

    /// Like [`AppState::new`] with a caller-supplied cache warmer.
    pub fn with_warmer(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        cache: Arc<dyn ObjectStore>,
        resolver: Arc<ChunkResolver>,
        publisher: Arc<dyn TaskPublisher>,
        warmer: Arc<dyn CacheWarmer>,
    ) -> Self {
        let tracker = Arc::new(ArchivalTracker::new(
            metadata.clone(),
            publisher,
            warmer,
            config.archival.clone(),
        ));

        Self {
            config: Arc::new(config),
            metadata,
            cache,
            resolver,
            tracker,
        }
    }

    /// Handlers for every task kind the service publishes.
    pub fn handler_registry(&self) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry
            .register(
                TaskKind::ArchiveObjects,
                Arc::new(ArchiveObjectsHandler::new(self.tracker.clone())),
            )
            .register(
                TaskKind::ObjectArchived,
                Arc::new(ObjectArchivedHandler::new(self.tracker.clone())),
            );
        registry
    }
}
