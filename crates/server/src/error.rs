//! API error types.

use crate::archival::ArchivalError;
use crate::dispatcher::DispatchError;
use crate::resolver::ResolveError;
use archivist_metadata::MetadataError;
use archivist_storage::StorageError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("node store error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] archivist_core::Error),

    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("{0}")]
    Archival(#[from] ArchivalError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

fn metadata_status(e: &MetadataError) -> StatusCode {
    match e {
        MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
        MetadataError::AlreadyExists(_) | MetadataError::Constraint(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
            Self::Metadata(_) => "metadata_error",
            Self::Storage(_) => "storage_error",
            Self::Core(_) => "core_error",
            Self::Resolve(_) => "resolve_error",
            Self::Archival(ArchivalError::IncompleteReceipt { .. }) => "incomplete_receipt",
            Self::Archival(ArchivalError::NotFullyArchived { .. }) => "not_fully_archived",
            Self::Archival(_) => "archival_error",
            Self::Dispatch(_) => "dispatch_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Metadata(e) => metadata_status(e),
            Self::Storage(e) => match e {
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                StorageError::IntegrityMismatch { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
            Self::Resolve(e) => match e {
                ResolveError::Metadata(e) => metadata_status(e),
                ResolveError::Decode {
                    source: archivist_core::Error::NotAChunk(_),
                    ..
                } => StatusCode::BAD_REQUEST,
                ResolveError::Storage(StorageError::IntegrityMismatch { .. }) => {
                    StatusCode::BAD_GATEWAY
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Archival(e) => match e {
                ArchivalError::IncompleteReceipt { .. } | ArchivalError::Core(_) => {
                    StatusCode::BAD_REQUEST
                }
                ArchivalError::NotFullyArchived { .. } => StatusCode::CONFLICT,
                ArchivalError::Metadata(e) => metadata_status(e),
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Dispatch(DispatchError::QueueClosed) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Dispatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
