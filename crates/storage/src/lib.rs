//! Object storage and blockstore backends for archivist.
//!
//! This crate provides:
//! - The `ObjectStore` byte store behind the read-through object cache
//! - Filesystem and S3-compatible backends
//! - The external immutable `Blockstore`, either kept in an object store or
//!   reached through an HTTP gateway

pub mod backends;
pub mod blockstore;
pub mod error;
pub mod traits;

pub use backends::{
    filesystem::FilesystemBackend,
    s3::{S3Backend, S3Options},
};
pub use blockstore::{Blockstore, HttpGatewayBlockstore, ObjectStoreBlockstore};
pub use error::{StorageError, StorageResult};
pub use traits::{ObjectMeta, ObjectStore, StreamingUpload};

use archivist_core::config::{BlockstoreConfig, StorageConfig};
use std::sync::Arc;
use std::time::Duration;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => Ok(Arc::new(FilesystemBackend::new(path).await?)),
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(S3Options {
                bucket: bucket.clone(),
                endpoint: endpoint.clone(),
                region: region.clone(),
                prefix: prefix.clone(),
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                force_path_style: *force_path_style,
            })
            .await?;
            Ok(Arc::new(backend))
        }
    }
}

/// Create the external blockstore from configuration.
pub async fn blockstore_from_config(
    config: &BlockstoreConfig,
) -> StorageResult<Arc<dyn Blockstore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        BlockstoreConfig::Storage { storage } => {
            let store = from_config(storage).await?;
            Ok(Arc::new(ObjectStoreBlockstore::new(store)))
        }
        BlockstoreConfig::Gateway { url, timeout_secs } => Ok(Arc::new(
            HttpGatewayBlockstore::new(url, Duration::from_secs(*timeout_secs))?,
        )),
    }
}
