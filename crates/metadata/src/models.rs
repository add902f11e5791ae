//! Database models mapping to the node store schema.

use archivist_core::{DagNode, NodeType};
use sqlx::FromRow;
use time::OffsetDateTime;

// =============================================================================
// Nodes
// =============================================================================

/// A stored DAG node.
///
/// A node is archived once both `piece_index` and `piece_offset` are set.
/// `payload` is the encoded [`DagNode`]; it is cleared when the object is
/// pruned after archival.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct NodeRow {
    pub cid: String,
    pub root_cid: String,
    pub head_cid: String,
    pub node_type: String,
    pub payload: Option<Vec<u8>>,
    pub piece_index: Option<i64>,
    pub piece_offset: Option<i64>,
    pub block_published_on: Option<i64>,
    pub tx_published_on: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl NodeRow {
    /// A fresh, unpublished and unarchived node.
    pub fn new(
        cid: impl Into<String>,
        root_cid: impl Into<String>,
        head_cid: impl Into<String>,
        node_type: NodeType,
        payload: Option<Vec<u8>>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            cid: cid.into(),
            root_cid: root_cid.into(),
            head_cid: head_cid.into(),
            node_type: node_type.as_str().to_string(),
            payload,
            piece_index: None,
            piece_offset: None,
            block_published_on: None,
            tx_published_on: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a row from a DAG node, deriving its cid from the encoding.
    pub fn from_dag_node(
        root_cid: impl Into<String>,
        head_cid: impl Into<String>,
        node: &DagNode,
    ) -> archivist_core::Result<Self> {
        let payload = node.encode()?;
        let cid = archivist_core::Cid::compute(&payload);
        Ok(Self::new(
            cid.to_string(),
            root_cid,
            head_cid,
            node.node_type,
            Some(payload),
        ))
    }

    pub fn is_archived(&self) -> bool {
        self.piece_index.is_some() && self.piece_offset.is_some()
    }

    pub fn is_published(&self) -> bool {
        self.block_published_on.is_some()
    }

    /// Parsed node type.
    pub fn node_type(&self) -> archivist_core::Result<NodeType> {
        self.node_type.parse()
    }
}

/// Filter for [`NodeRepo::get_node_count`](crate::NodeRepo::get_node_count).
///
/// Set fields are combined with AND; an empty filter matches every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeCountFilter {
    pub cid: Option<String>,
    pub root_cid: Option<String>,
    pub head_cid: Option<String>,
    pub node_type: Option<String>,
}

impl NodeCountFilter {
    pub fn by_root_cid(root_cid: impl Into<String>) -> Self {
        Self {
            root_cid: Some(root_cid.into()),
            ..Self::default()
        }
    }

    pub fn by_head_cid(head_cid: impl Into<String>) -> Self {
        Self {
            head_cid: Some(head_cid.into()),
            ..Self::default()
        }
    }

    pub fn by_cid(cid: impl Into<String>) -> Self {
        Self {
            cid: Some(cid.into()),
            ..Self::default()
        }
    }

    pub fn with_node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type.as_str().to_string());
        self
    }

    /// Column/value pairs of the set fields, in a fixed order.
    pub(crate) fn conditions(&self) -> Vec<(&'static str, &str)> {
        [
            ("cid", self.cid.as_deref()),
            ("root_cid", self.root_cid.as_deref()),
            ("head_cid", self.head_cid.as_deref()),
            ("node_type", self.node_type.as_deref()),
        ]
        .into_iter()
        .filter_map(|(column, value)| value.map(|v| (column, v)))
        .collect()
    }
}

/// Node counts for a filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCount {
    pub total: u64,
    /// Nodes with a publish block.
    pub published: u64,
    /// Nodes with an archival location.
    pub archived: u64,
}

impl NodeCount {
    pub(crate) fn from_row((total, published, archived): (i64, i64, i64)) -> Self {
        Self {
            total: total.max(0) as u64,
            published: published.max(0) as u64,
            archived: archived.max(0) as u64,
        }
    }

    /// True when there is at least one node and all of them are archived.
    pub fn is_fully_archived(&self) -> bool {
        self.total > 0 && self.archived == self.total
    }
}

/// Archival location of a node within a ledger segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivingData {
    pub cid: String,
    pub piece_index: i64,
    pub piece_offset: i64,
}

// =============================================================================
// Objects
// =============================================================================

/// Per-object archival flag, keyed by root cid.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ObjectRow {
    pub root_cid: String,
    pub head_cid: Option<String>,
    pub archived: bool,
    pub archived_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
