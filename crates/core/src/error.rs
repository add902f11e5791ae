//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid cid: {0}")]
    InvalidCid(String),

    #[error("invalid node type: {0}")]
    InvalidNodeType(String),

    #[error("failed to decode DAG node: {0}")]
    NodeDecode(String),

    #[error("node of type {0} does not carry chunk data")]
    NotAChunk(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
