//! Chunk reads.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use archivist_core::Cid;

/// GET /v1/chunks/{cid} - Raw chunk bytes, local payload first, then the
/// blockstore.
pub async fn get_chunk(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> ApiResult<Response> {
    let cid = Cid::parse(&cid)?;
    let data = state
        .resolver
        .get_chunk_data(&cid)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("chunk {cid}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, data.len().to_string()),
        ],
        data,
    )
        .into_response())
}
