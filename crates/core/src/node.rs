//! Encoded DAG nodes.
//!
//! A [`DagNode`] is the unit stored as a node's payload and in the external
//! blockstore. Its cid is the cid of its encoded bytes.

use crate::cid::Cid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of DAG node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    /// A whole file small enough to fit in one node.
    FileLeaf,
    /// One chunk of a larger file.
    FileChunk,
    /// A folder listing its children.
    FolderEntry,
    /// Interior node of a chunked file, linking chunks in order.
    Inner,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileLeaf => "file-leaf",
            Self::FileChunk => "file-chunk",
            Self::FolderEntry => "folder-entry",
            Self::Inner => "inner",
        }
    }

    /// Whether nodes of this type carry raw file bytes.
    pub fn is_chunk(&self) -> bool {
        matches!(self, Self::FileLeaf | Self::FileChunk)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "file-leaf" => Ok(Self::FileLeaf),
            "file-chunk" => Ok(Self::FileChunk),
            "folder-entry" => Ok(Self::FolderEntry),
            "inner" => Ok(Self::Inner),
            other => Err(crate::Error::InvalidNodeType(other.to_string())),
        }
    }
}

/// A single node of an object's DAG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagNode {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Raw bytes for leaf and chunk nodes.
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    /// Children, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Cid>,
    /// Entry name (files and folders).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Logical size in bytes of the content under this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl DagNode {
    /// A single-node file.
    pub fn file_leaf(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            node_type: NodeType::FileLeaf,
            size: Some(data.len() as u64),
            data: Some(data),
            links: Vec::new(),
            name: Some(name.into()),
        }
    }

    /// One chunk of a larger file.
    pub fn file_chunk(data: Vec<u8>) -> Self {
        Self {
            node_type: NodeType::FileChunk,
            size: Some(data.len() as u64),
            data: Some(data),
            links: Vec::new(),
            name: None,
        }
    }

    /// The root of a chunked file.
    pub fn inner(name: Option<String>, links: Vec<Cid>, size: u64) -> Self {
        Self {
            node_type: NodeType::Inner,
            data: None,
            links,
            name,
            size: Some(size),
        }
    }

    /// A folder listing its children.
    pub fn folder_entry(name: impl Into<String>, links: Vec<Cid>) -> Self {
        Self {
            node_type: NodeType::FolderEntry,
            data: None,
            links,
            name: Some(name.into()),
            size: None,
        }
    }

    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| crate::Error::NodeDecode(e.to_string()))
    }

    /// The cid of this node's encoding.
    pub fn cid(&self) -> crate::Result<Cid> {
        Ok(Cid::compute(&self.encode()?))
    }

    /// Raw bytes of a leaf or chunk node.
    ///
    /// Returns [`Error::NotAChunk`](crate::Error::NotAChunk) for folders and
    /// interior nodes. A chunk without data is empty.
    pub fn chunk_data(&self) -> crate::Result<&[u8]> {
        if !self.node_type.is_chunk() {
            return Err(crate::Error::NotAChunk(self.node_type.to_string()));
        }
        Ok(self.data.as_deref().unwrap_or_default())
    }

    /// Consume the node, returning its chunk bytes.
    pub fn into_chunk_data(self) -> crate::Result<Vec<u8>> {
        if !self.node_type.is_chunk() {
            return Err(crate::Error::NotAChunk(self.node_type.to_string()));
        }
        Ok(self.data.unwrap_or_default())
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_strings() {
        for ty in [
            NodeType::FileLeaf,
            NodeType::FileChunk,
            NodeType::FolderEntry,
            NodeType::Inner,
        ] {
            assert_eq!(ty.as_str().parse::<NodeType>().unwrap(), ty);
            assert_eq!(
                serde_json::to_string(&ty).unwrap(),
                format!("\"{}\"", ty.as_str())
            );
        }
        assert!("directory".parse::<NodeType>().is_err());
    }

    #[test]
    fn test_leaf_decode_yields_data() {
        let node = DagNode::file_leaf("hello.txt", b"hello".to_vec());
        let encoded = node.encode().unwrap();
        let decoded = DagNode::decode(&encoded).unwrap();
        assert_eq!(decoded.chunk_data().unwrap(), b"hello");
        assert_eq!(decoded.name.as_deref(), Some("hello.txt"));
    }

    #[test]
    fn test_cid_depends_on_content() {
        let a = DagNode::file_chunk(vec![1, 2, 3]);
        let b = DagNode::file_chunk(vec![1, 2, 4]);
        assert_eq!(a.cid().unwrap(), a.clone().cid().unwrap());
        assert_ne!(a.cid().unwrap(), b.cid().unwrap());
        assert_eq!(a.cid().unwrap(), Cid::compute(&a.encode().unwrap()));
    }

    #[test]
    fn test_non_chunk_nodes_have_no_chunk_data() {
        let chunk = DagNode::file_chunk(vec![9; 4]);
        let inner = DagNode::inner(Some("big.bin".into()), vec![chunk.cid().unwrap()], 4);
        assert!(matches!(
            inner.chunk_data(),
            Err(crate::Error::NotAChunk(t)) if t == "inner"
        ));

        let folder = DagNode::folder_entry("docs", vec![inner.cid().unwrap()]);
        assert!(folder.into_chunk_data().is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            DagNode::decode(b"not json"),
            Err(crate::Error::NodeDecode(_))
        ));
    }
}
