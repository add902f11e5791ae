//! Core domain types for the archivist DAG archival service.
//!
//! This crate defines the data model shared by every other crate:
//! - Content hashes and the content identifiers (cids) derived from them
//! - Encoded DAG nodes and their types
//! - Service configuration

pub mod cid;
pub mod config;
pub mod error;
pub mod hash;
pub mod node;

pub use cid::Cid;
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use node::{DagNode, NodeType};

/// Default number of delivery attempts for a dispatched task.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
