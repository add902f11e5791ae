//! External immutable blockstore.
//!
//! Blocks are encoded DAG nodes addressed by their [`Cid`]. The node store
//! falls back to a blockstore once an archived object's local payload has been
//! pruned, so every block read here is checked against its identifier before
//! it is handed back.

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use archivist_core::Cid;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Content-addressed block source.
#[async_trait]
pub trait Blockstore: Send + Sync + 'static {
    /// Fetch a block. Returns `None` when the store does not hold it.
    async fn get_block(&self, cid: &Cid) -> StorageResult<Option<Bytes>>;

    /// Store a block. Blocks are immutable: writing an existing cid is a no-op.
    async fn put_block(&self, cid: &Cid, data: Bytes) -> StorageResult<()>;

    fn backend_name(&self) -> &'static str;
}

/// Check that `data` hashes to `cid`.
pub fn verify_block(cid: &Cid, data: &[u8]) -> StorageResult<()> {
    let actual = Cid::compute(data);
    if &actual != cid {
        return Err(StorageError::IntegrityMismatch {
            expected: cid.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Object store key for a block.
pub fn block_key(cid: &Cid) -> String {
    format!("blocks/{cid}")
}

/// Blockstore kept in an [`ObjectStore`] under `blocks/<cid>`.
pub struct ObjectStoreBlockstore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBlockstore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Blockstore for ObjectStoreBlockstore {
    #[instrument(skip(self), fields(cid = %cid, backend = self.store.backend_name()))]
    async fn get_block(&self, cid: &Cid) -> StorageResult<Option<Bytes>> {
        let data = match self.store.get(&block_key(cid)).await {
            Ok(data) => data,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        verify_block(cid, &data)?;
        Ok(Some(data))
    }

    #[instrument(skip(self, data), fields(cid = %cid, size = data.len()))]
    async fn put_block(&self, cid: &Cid, data: Bytes) -> StorageResult<()> {
        verify_block(cid, &data)?;
        let written = self.store.put_if_not_exists(&block_key(cid), data).await?;
        if !written {
            tracing::debug!(cid = %cid, "Block already present");
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }
}

/// Read-only blockstore served over HTTP at `GET {base}/blocks/{cid}`.
pub struct HttpGatewayBlockstore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGatewayBlockstore {
    pub fn new(base_url: &str, timeout: Duration) -> StorageResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn block_url(&self, cid: &Cid) -> String {
        format!("{}/blocks/{cid}", self.base_url)
    }
}

#[async_trait]
impl Blockstore for HttpGatewayBlockstore {
    #[instrument(skip(self), fields(cid = %cid, backend = "gateway"))]
    async fn get_block(&self, cid: &Cid) -> StorageResult<Option<Bytes>> {
        let response = self.client.get(self.block_url(cid)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let data = response.error_for_status()?.bytes().await?;
        verify_block(cid, &data)?;
        Ok(Some(data))
    }

    async fn put_block(&self, cid: &Cid, _data: Bytes) -> StorageResult<()> {
        Err(StorageError::Unsupported(format!(
            "gateway blockstore is read-only (block {cid})"
        )))
    }

    fn backend_name(&self) -> &'static str {
        "gateway"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::filesystem::FilesystemBackend;
    use archivist_core::DagNode;

    async fn fs_blockstore() -> (tempfile::TempDir, ObjectStoreBlockstore) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
        (dir, ObjectStoreBlockstore::new(store))
    }

    #[tokio::test]
    async fn test_missing_block_is_none() {
        let (_dir, blocks) = fs_blockstore().await;
        let cid = Cid::compute(b"nothing here");
        assert!(blocks.get_block(&cid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_then_get_block() {
        let (_dir, blocks) = fs_blockstore().await;
        let node = DagNode::file_leaf("a.txt", b"contents".to_vec());
        let encoded = Bytes::from(node.encode().unwrap());
        let cid = node.cid().unwrap();

        blocks.put_block(&cid, encoded.clone()).await.unwrap();
        assert_eq!(blocks.get_block(&cid).await.unwrap(), Some(encoded.clone()));

        // Second write of the same block is accepted and changes nothing.
        blocks.put_block(&cid, encoded.clone()).await.unwrap();
        assert_eq!(blocks.get_block(&cid).await.unwrap(), Some(encoded));
    }

    #[tokio::test]
    async fn test_put_rejects_mismatched_bytes() {
        let (_dir, blocks) = fs_blockstore().await;
        let cid = Cid::compute(b"expected");
        let err = blocks
            .put_block(&cid, Bytes::from_static(b"other"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::IntegrityMismatch { .. }));
    }

    #[tokio::test]
    async fn test_get_detects_corrupted_block() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
        let cid = Cid::compute(b"original");
        store
            .put(&block_key(&cid), Bytes::from_static(b"tampered"))
            .await
            .unwrap();

        let blocks = ObjectStoreBlockstore::new(store);
        assert!(matches!(
            blocks.get_block(&cid).await,
            Err(StorageError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn test_gateway_block_url_trims_slash() {
        let gateway = HttpGatewayBlockstore::new("http://gw.local/", Duration::from_secs(1)).unwrap();
        let cid = Cid::compute(b"x");
        assert_eq!(gateway.block_url(&cid), format!("http://gw.local/blocks/{cid}"));
    }
}
