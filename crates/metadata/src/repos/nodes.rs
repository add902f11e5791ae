//! Node repository.

use crate::error::MetadataResult;
use crate::models::{ArchivingData, NodeCount, NodeCountFilter, NodeRow};
use async_trait::async_trait;

/// Repository for DAG node operations.
#[async_trait]
pub trait NodeRepo: Send + Sync {
    /// Upsert a node keyed by cid.
    ///
    /// Concurrent saves of the same cid never fail: the unique-key upsert is
    /// the only serialization point. `root_cid`, `head_cid` and `node_type`
    /// are last-write-wins. `payload` and the publish receipt are replaced
    /// when present and kept when the write omits them. The archival
    /// location is set at most once and is never cleared by a later save.
    ///
    /// Also registers the node's object if it is not yet known.
    async fn save_node(&self, node: &NodeRow) -> MetadataResult<()>;

    /// Atomically upsert a set of nodes under the given root and head.
    ///
    /// The root/head of every row is overridden with the arguments. The
    /// object row is created, or its head updated, in the same transaction.
    async fn save_nodes(
        &self,
        root_cid: &str,
        head_cid: &str,
        nodes: &[NodeRow],
    ) -> MetadataResult<()>;

    /// Get a node by cid. Unknown cids yield `None`.
    async fn get_node(&self, cid: &str) -> MetadataResult<Option<NodeRow>>;

    async fn get_nodes_by_root_cid(&self, root_cid: &str) -> MetadataResult<Vec<NodeRow>>;

    async fn get_nodes_by_head_cid(&self, head_cid: &str) -> MetadataResult<Vec<NodeRow>>;

    /// Get every known node among `cids`. Unknown cids are skipped.
    async fn get_nodes_by_cids(&self, cids: &[String]) -> MetadataResult<Vec<NodeRow>>;

    /// Count nodes matching the filter, with published and archived subtotals.
    async fn get_node_count(&self, filter: &NodeCountFilter) -> MetadataResult<NodeCount>;

    /// Record a node's archival location if it has none yet.
    ///
    /// Returns the node's root cid when this call archived the node, and
    /// `None` when the node was already archived (replay) or is unknown.
    async fn set_node_archiving_data(&self, data: &ArchivingData)
    -> MetadataResult<Option<String>>;

    /// Record the ledger block and transaction that published a node.
    ///
    /// Returns `NotFound` for an unknown cid.
    async fn update_node_published_on(
        &self,
        cid: &str,
        block_number: i64,
        tx_hash: &str,
    ) -> MetadataResult<()>;

    /// Clear the payload of every archived node under a root, leaving all
    /// other fields in place. Nodes without an archival location keep their
    /// payload. Returns the number of payloads cleared.
    async fn remove_node_data_by_root_cid(&self, root_cid: &str) -> MetadataResult<u64>;

    /// Cids of nodes that are published but not yet archived.
    async fn get_archiving_nodes_cid(&self) -> MetadataResult<Vec<String>>;

    /// The node with the highest archival location (piece index, then offset).
    async fn get_last_archived_piece_node(&self) -> MetadataResult<Option<NodeRow>>;

    /// Nodes under a root that have a publish block, archived or not.
    async fn get_uploaded_nodes_by_root_cid(&self, root_cid: &str)
    -> MetadataResult<Vec<NodeRow>>;
}

/// Reject rows whose archival location is only half set.
pub(crate) fn check_archival_pair(node: &NodeRow) -> MetadataResult<()> {
    if node.piece_index.is_some() != node.piece_offset.is_some() {
        return Err(crate::MetadataError::Constraint(format!(
            "node {} must set piece_index and piece_offset together",
            node.cid
        )));
    }
    Ok(())
}
