//! Test fixtures for building DAGs and confirmations.

use archivist_core::{Cid, DagNode};
use archivist_metadata::models::NodeRow;
use archivist_server::ArchivedEntry;

/// Generate deterministic test data based on a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    data
}

/// An object's nodes in upload order, root last.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestObject {
    pub root_cid: Cid,
    pub nodes: Vec<DagNode>,
    /// The reassembled file, for single-file objects.
    pub content: Vec<u8>,
}

#[allow(dead_code)]
impl TestObject {
    /// A single-node file.
    pub fn leaf(name: &str, content: &[u8]) -> Self {
        let node = DagNode::file_leaf(name, content.to_vec());
        Self {
            root_cid: node.cid().unwrap(),
            nodes: vec![node],
            content: content.to_vec(),
        }
    }

    /// A file split into `chunk_size` chunks under one inner node.
    pub fn chunked(name: &str, content: &[u8], chunk_size: usize) -> Self {
        let chunks: Vec<DagNode> = content
            .chunks(chunk_size)
            .map(|c| DagNode::file_chunk(c.to_vec()))
            .collect();
        let links = chunks.iter().map(|c| c.cid().unwrap()).collect();
        let root = DagNode::inner(Some(name.to_string()), links, content.len() as u64);

        let mut nodes = chunks;
        let root_cid = root.cid().unwrap();
        nodes.push(root);
        Self {
            root_cid,
            nodes,
            content: content.to_vec(),
        }
    }

    pub fn root(&self) -> String {
        self.root_cid.to_string()
    }

    pub fn cids(&self) -> Vec<String> {
        self.nodes
            .iter()
            .map(|n| n.cid().unwrap().to_string())
            .collect()
    }

    /// Node rows as the upload pipeline would write them.
    pub fn rows(&self) -> Vec<NodeRow> {
        let root = self.root();
        self.nodes
            .iter()
            .map(|n| NodeRow::from_dag_node(root.as_str(), root.as_str(), n).unwrap())
            .collect()
    }

    /// One confirmation per node, at consecutive offsets in `piece_index`.
    pub fn confirmations(&self, piece_index: i64) -> Vec<ArchivedEntry> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(offset, n)| {
                ArchivedEntry::new(
                    *n.cid().unwrap().content_hash(),
                    piece_index,
                    offset as i64,
                )
            })
            .collect()
    }
}
