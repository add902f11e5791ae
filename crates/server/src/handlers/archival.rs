//! Chain follower intake and archival status.

use crate::archival::ArchivedEntry;
use crate::error::ApiResult;
use crate::handlers::nodes::NodeResponse;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use archivist_metadata::models::NodeCountFilter;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ConfirmationsRequest {
    pub entries: Vec<ArchivedEntry>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmationsResponse {
    pub scheduled: usize,
}

#[derive(Debug, Serialize)]
pub struct ArchivalProgressResponse {
    /// Node with the highest archival location so far.
    pub last_archived: Option<NodeResponse>,
    /// Nodes published to the ledger but not yet archived.
    pub archiving_nodes: usize,
}

#[derive(Debug, Serialize)]
pub struct ObjectArchivalResponse {
    pub root_cid: String,
    pub total_nodes: u64,
    pub published_nodes: u64,
    pub archived_nodes: u64,
    /// Every node of the object has an archival location.
    pub all_nodes_archived: bool,
    /// The object has been flagged archived and its payloads pruned.
    pub object_archived: bool,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub ready_roots: Vec<String>,
}

/// POST /v1/archival/confirmations - Queue archival confirmations.
pub async fn post_confirmations(
    State(state): State<AppState>,
    Json(request): Json<ConfirmationsRequest>,
) -> ApiResult<(StatusCode, Json<ConfirmationsResponse>)> {
    let scheduled = request.entries.len();
    state.tracker.schedule_node_archiving(request.entries).await?;
    Ok((StatusCode::ACCEPTED, Json(ConfirmationsResponse { scheduled })))
}

/// GET /v1/archival/progress
pub async fn get_progress(
    State(state): State<AppState>,
) -> ApiResult<Json<ArchivalProgressResponse>> {
    let last_archived = state.metadata.get_last_archived_piece_node().await?;
    let archiving = state.metadata.get_archiving_nodes_cid().await?;

    Ok(Json(ArchivalProgressResponse {
        last_archived: last_archived.map(NodeResponse::from),
        archiving_nodes: archiving.len(),
    }))
}

/// GET /v1/objects/{root_cid}/archival
pub async fn get_object_archival(
    State(state): State<AppState>,
    Path(root_cid): Path<String>,
) -> ApiResult<Json<ObjectArchivalResponse>> {
    let count = state
        .metadata
        .get_node_count(&NodeCountFilter::by_root_cid(root_cid.as_str()))
        .await?;
    let object_archived = state
        .metadata
        .get_object(&root_cid)
        .await?
        .is_some_and(|object| object.archived);

    Ok(Json(ObjectArchivalResponse {
        all_nodes_archived: count.is_fully_archived(),
        total_nodes: count.total,
        published_nodes: count.published,
        archived_nodes: count.archived,
        object_archived,
        root_cid,
    }))
}

/// POST /v1/archival/sweep - Run the archival sweep now.
pub async fn trigger_sweep(State(state): State<AppState>) -> ApiResult<Json<SweepResponse>> {
    let ready = state.tracker.check_objects_archival_status().await?;
    Ok(Json(SweepResponse {
        ready_roots: ready.into_iter().collect(),
    }))
}
