//! Read-through object cache warm-up.

use crate::resolver::ChunkResolver;
use archivist_core::{Cid, DagNode, NodeType};
use archivist_storage::{ObjectStore, StreamingUpload};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Fills the read cache for an object before its local payload is pruned.
#[async_trait]
pub trait CacheWarmer: Send + Sync {
    /// Cache the whole object under `root_cid` and return the bytes written.
    /// Must either complete or fail; a partial object is never left behind.
    async fn warm(&self, root_cid: &Cid) -> anyhow::Result<u64>;
}

/// Cache key of a reassembled file.
pub fn object_key(cid: &Cid) -> String {
    format!("objects/{cid}")
}

/// Cache warmer that reassembles files from their DAG into an [`ObjectStore`].
pub struct StorageCacheWarmer {
    resolver: Arc<ChunkResolver>,
    cache: Arc<dyn ObjectStore>,
}

impl StorageCacheWarmer {
    pub fn new(resolver: Arc<ChunkResolver>, cache: Arc<dyn ObjectStore>) -> Self {
        Self { resolver, cache }
    }

    async fn resolve(&self, cid: &Cid) -> anyhow::Result<DagNode> {
        match self.resolver.get_dag_node(cid).await? {
            Some((node, _)) => Ok(node),
            None => anyhow::bail!("node {cid} not found locally or in the blockstore"),
        }
    }

    /// Size of `objects/<cid>` if it is already cached.
    async fn cached_size(&self, cid: &Cid) -> anyhow::Result<Option<u64>> {
        let key = object_key(cid);
        if !self.cache.exists(&key).await? {
            return Ok(None);
        }
        Ok(Some(self.cache.head(&key).await?.size))
    }

    /// Stream one file into `objects/<cid>`.
    async fn warm_file(&self, cid: &Cid, root: DagNode) -> anyhow::Result<u64> {
        let key = object_key(cid);
        let mut upload = self.cache.put_stream(&key).await?;
        match self.write_file(root, upload.as_mut()).await {
            Ok(()) => Ok(upload.finish().await?),
            Err(e) => {
                if let Err(abort_err) = upload.abort().await {
                    tracing::warn!(cid = %cid, error = %abort_err, "Failed to abort partial cache upload");
                }
                Err(e)
            }
        }
    }

    /// Depth-first, in link order.
    async fn write_file(
        &self,
        root: DagNode,
        upload: &mut dyn StreamingUpload,
    ) -> anyhow::Result<()> {
        let mut current = Some(root);
        let mut pending: Vec<Cid> = Vec::new();
        loop {
            let node = match current.take() {
                Some(node) => node,
                None => match pending.pop() {
                    Some(cid) => self.resolve(&cid).await?,
                    None => return Ok(()),
                },
            };
            match node.node_type {
                NodeType::Inner => pending.extend(node.links.iter().rev().copied()),
                NodeType::FileLeaf | NodeType::FileChunk => {
                    upload.write(Bytes::from(node.into_chunk_data()?)).await?;
                }
                NodeType::FolderEntry => anyhow::bail!("folder entry linked from inside a file"),
            }
        }
    }
}

#[async_trait]
impl CacheWarmer for StorageCacheWarmer {
    async fn warm(&self, root_cid: &Cid) -> anyhow::Result<u64> {
        let mut total = 0u64;
        let mut pending = vec![*root_cid];
        while let Some(cid) = pending.pop() {
            // Cached files are not resolved again; their nodes may be pruned.
            if let Some(size) = self.cached_size(&cid).await? {
                tracing::debug!(cid = %cid, size, "Object already cached");
                total += size;
                continue;
            }
            let node = self.resolve(&cid).await?;
            if node.node_type == NodeType::FolderEntry {
                pending.extend(node.links.iter().rev().copied());
            } else {
                total += self.warm_file(&cid, node).await?;
            }
        }
        tracing::info!(root_cid = %root_cid, bytes = total, "Object cache warmed");
        Ok(total)
    }
}
