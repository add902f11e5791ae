//! Chunk resolution with blockstore fallback.
//!
//! A node's bytes come from its local payload while it has one. Once an
//! archived object is pruned, or when the node was never stored locally, the
//! same cid is looked up in the external blockstore.

use crate::metrics;
use archivist_core::{Cid, DagNode};
use archivist_metadata::{MetadataError, MetadataStore};
use archivist_storage::{Blockstore, StorageError};
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

/// Where a node's bytes were found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkSource {
    Local,
    Blockstore,
}

impl ChunkSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkSource::Local => "local",
            ChunkSource::Blockstore => "blockstore",
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("node store error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("blockstore error: {0}")]
    Storage(#[from] StorageError),

    #[error("node {cid} from {} could not be decoded: {source}", .from.as_str())]
    Decode {
        cid: Cid,
        from: ChunkSource,
        #[source]
        source: archivist_core::Error,
    },
}

pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

pub struct ChunkResolver {
    metadata: Arc<dyn MetadataStore>,
    blockstore: Arc<dyn Blockstore>,
}

impl ChunkResolver {
    pub fn new(metadata: Arc<dyn MetadataStore>, blockstore: Arc<dyn Blockstore>) -> Self {
        Self {
            metadata,
            blockstore,
        }
    }

    /// Encoded node bytes, local payload first, then the blockstore.
    pub async fn get_node_bytes(&self, cid: &Cid) -> ResolveResult<Option<(Bytes, ChunkSource)>> {
        if let Some(payload) = self
            .metadata
            .get_node(&cid.to_string())
            .await?
            .and_then(|row| row.payload)
        {
            return Ok(Some((Bytes::from(payload), ChunkSource::Local)));
        }

        Ok(self
            .blockstore
            .get_block(cid)
            .await?
            .map(|block| (block, ChunkSource::Blockstore)))
    }

    /// The decoded DAG node for `cid`.
    pub async fn get_dag_node(&self, cid: &Cid) -> ResolveResult<Option<(DagNode, ChunkSource)>> {
        let Some((bytes, from)) = self.get_node_bytes(cid).await? else {
            return Ok(None);
        };
        let node = DagNode::decode(&bytes).map_err(|source| ResolveError::Decode {
            cid: *cid,
            from,
            source,
        })?;
        Ok(Some((node, from)))
    }

    /// Raw chunk bytes of a leaf or chunk node. `None` when neither the node
    /// store nor the blockstore has the cid.
    pub async fn get_chunk_data(&self, cid: &Cid) -> ResolveResult<Option<Bytes>> {
        let Some((node, from)) = self.get_dag_node(cid).await? else {
            metrics::CHUNK_RESOLUTIONS.with_label_values(&["missing"]).inc();
            return Ok(None);
        };
        metrics::CHUNK_RESOLUTIONS
            .with_label_values(&[from.as_str()])
            .inc();

        let data = node
            .into_chunk_data()
            .map_err(|source| ResolveError::Decode {
                cid: *cid,
                from,
                source,
            })?;
        Ok(Some(Bytes::from(data)))
    }
}
