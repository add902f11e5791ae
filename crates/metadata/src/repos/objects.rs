//! Object repository.

use crate::error::MetadataResult;
use crate::models::ObjectRow;
use async_trait::async_trait;

/// Repository for the per-object archived flag.
#[async_trait]
pub trait ObjectRepo: Send + Sync {
    async fn get_object(&self, root_cid: &str) -> MetadataResult<Option<ObjectRow>>;

    /// Objects not yet flagged archived, ordered by root cid.
    ///
    /// Pass the last root cid of the previous page as `after` to continue.
    async fn get_non_archived_objects(
        &self,
        after: Option<&str>,
        limit: u32,
    ) -> MetadataResult<Vec<ObjectRow>>;

    /// Flag an object archived unless some node under it is still
    /// unarchived. Returns whether the object is flagged after the call.
    ///
    /// Idempotent: the first `archived_at` is kept, and an unknown root is
    /// registered already archived.
    async fn set_object_archived(&self, root_cid: &str) -> MetadataResult<bool>;
}
