//! Node ingestion and read projections.

use crate::archival::PublishReceipt;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use archivist_core::{Cid, DagNode, NodeType};
use archivist_metadata::models::{NodeCount, NodeCountFilter, NodeRow};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Maximum number of cids accepted by a batch lookup.
const MAX_BATCH_CIDS: usize = 10_000;

/// Request body for `POST /v1/nodes`.
#[derive(Debug, Deserialize)]
pub struct SaveNodesRequest {
    pub root_cid: String,
    pub head_cid: String,
    pub nodes: Vec<DagNode>,
}

#[derive(Debug, Serialize)]
pub struct SaveNodesResponse {
    /// Cids of the saved nodes, in request order.
    pub cids: Vec<String>,
}

/// A stored node without its payload bytes.
#[derive(Debug, Serialize)]
pub struct NodeResponse {
    pub cid: String,
    pub root_cid: String,
    pub head_cid: String,
    pub node_type: String,
    /// Size of the local payload; `None` once pruned.
    pub payload_size: Option<usize>,
    pub piece_index: Option<i64>,
    pub piece_offset: Option<i64>,
    pub block_published_on: Option<i64>,
    pub tx_published_on: Option<String>,
    pub archived: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<NodeRow> for NodeResponse {
    fn from(row: NodeRow) -> Self {
        Self {
            archived: row.is_archived(),
            payload_size: row.payload.as_ref().map(Vec::len),
            cid: row.cid,
            root_cid: row.root_cid,
            head_cid: row.head_cid,
            node_type: row.node_type,
            piece_index: row.piece_index,
            piece_offset: row.piece_offset,
            block_published_on: row.block_published_on,
            tx_published_on: row.tx_published_on,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchNodesRequest {
    pub cids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchNodesResponse {
    pub nodes: Vec<NodeResponse>,
}

/// Query for `GET /v1/nodes/count`.
#[derive(Debug, Default, Deserialize)]
pub struct NodeCountQuery {
    pub cid: Option<String>,
    pub root_cid: Option<String>,
    pub head_cid: Option<String>,
    pub node_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NodeCountResponse {
    pub total: u64,
    pub published: u64,
    pub archived: u64,
}

impl From<NodeCount> for NodeCountResponse {
    fn from(count: NodeCount) -> Self {
        Self {
            total: count.total,
            published: count.published,
            archived: count.archived,
        }
    }
}

/// POST /v1/nodes - Save an object's nodes atomically.
pub async fn save_nodes(
    State(state): State<AppState>,
    Json(request): Json<SaveNodesRequest>,
) -> ApiResult<(StatusCode, Json<SaveNodesResponse>)> {
    let root_cid = Cid::parse(&request.root_cid)?.to_string();
    let head_cid = Cid::parse(&request.head_cid)?.to_string();
    if request.nodes.is_empty() {
        return Err(ApiError::BadRequest("nodes cannot be empty".to_string()));
    }

    let rows = request
        .nodes
        .iter()
        .map(|node| NodeRow::from_dag_node(root_cid.as_str(), head_cid.as_str(), node))
        .collect::<archivist_core::Result<Vec<_>>>()?;

    state.metadata.save_nodes(&root_cid, &head_cid, &rows).await?;
    tracing::info!(root_cid = %root_cid, nodes = rows.len(), "Saved nodes");

    let cids = rows.into_iter().map(|row| row.cid).collect();
    Ok((StatusCode::CREATED, Json(SaveNodesResponse { cids })))
}

/// GET /v1/nodes/{cid}
pub async fn get_node(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> ApiResult<Json<NodeResponse>> {
    let row = state
        .metadata
        .get_node(&cid)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("node {cid}")))?;
    Ok(Json(row.into()))
}

/// POST /v1/nodes/batch - Look up many nodes; unknown cids are omitted.
pub async fn get_nodes_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchNodesRequest>,
) -> ApiResult<Json<BatchNodesResponse>> {
    if request.cids.len() > MAX_BATCH_CIDS {
        return Err(ApiError::BadRequest(format!(
            "too many cids: {} (max {MAX_BATCH_CIDS})",
            request.cids.len()
        )));
    }
    let nodes = state.metadata.get_nodes_by_cids(&request.cids).await?;
    Ok(Json(BatchNodesResponse {
        nodes: nodes.into_iter().map(NodeResponse::from).collect(),
    }))
}

/// GET /v1/nodes/count
pub async fn get_node_count(
    State(state): State<AppState>,
    Query(query): Query<NodeCountQuery>,
) -> ApiResult<Json<NodeCountResponse>> {
    let node_type = query
        .node_type
        .as_deref()
        .map(str::parse::<NodeType>)
        .transpose()?;

    let mut filter = NodeCountFilter {
        cid: query.cid,
        root_cid: query.root_cid,
        head_cid: query.head_cid,
        node_type: None,
    };
    if let Some(node_type) = node_type {
        filter = filter.with_node_type(node_type);
    }

    let count = state.metadata.get_node_count(&filter).await?;
    Ok(Json(count.into()))
}

/// POST /v1/nodes/{cid}/published - Record the node's publish receipt.
pub async fn set_published_on(
    State(state): State<AppState>,
    Path(cid): Path<String>,
    Json(receipt): Json<PublishReceipt>,
) -> ApiResult<StatusCode> {
    state.tracker.set_published_on(&cid, &receipt).await?;
    Ok(StatusCode::NO_CONTENT)
}
