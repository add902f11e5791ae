//! Integration tests for HTTP API endpoints.

mod common;

use archivist_core::Cid;
use archivist_server::dispatcher::TaskKind;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::{TestObject, TestServer, seeded_bytes};
use serde_json::{Value, json};
use tower::ServiceExt;

/// Helper to make JSON requests.
async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let request = builder.body(body).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

/// Upload an object through `POST /v1/nodes`.
async fn upload(server: &TestServer, object: &TestObject) -> Vec<String> {
    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/nodes",
        Some(json!({
            "root_cid": object.root(),
            "head_cid": object.root(),
            "nodes": object.nodes,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "upload failed: {body}");
    body["cids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::new().await;
    let (status, body) = json_request(&server.router, "GET", "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_save_and_get_nodes() {
    let server = TestServer::new().await;
    let object = TestObject::chunked("big.bin", &seeded_bytes(9, 3000), 1024);

    let cids = upload(&server, &object).await;
    assert_eq!(cids, object.cids());

    let root = object.root();
    let (status, body) =
        json_request(&server.router, "GET", &format!("/v1/nodes/{root}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cid"], root);
    assert_eq!(body["root_cid"], root);
    assert_eq!(body["node_type"], "inner");
    assert_eq!(body["archived"], false);
    assert!(body["payload_size"].as_u64().unwrap() > 0);

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/nodes/batch",
        Some(json!({ "cids": [cids[0], cids[1], Cid::compute(b"unknown").to_string()] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodes"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_get_unknown_node_is_404() {
    let server = TestServer::new().await;
    let cid = Cid::compute(b"missing");
    let (status, body) =
        json_request(&server.router, "GET", &format!("/v1/nodes/{cid}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_save_rejects_bad_root() {
    let server = TestServer::new().await;
    let object = TestObject::leaf("a.txt", b"alpha");
    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/nodes",
        Some(json!({
            "root_cid": "not-a-cid",
            "head_cid": object.root(),
            "nodes": object.nodes,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "core_error");
}

#[tokio::test]
async fn test_node_count_filters() {
    let server = TestServer::new().await;
    let object = TestObject::chunked("big.bin", &seeded_bytes(2, 4000), 1000);
    upload(&server, &object).await;
    let root = object.root();

    let (status, body) = json_request(
        &server.router,
        "GET",
        &format!("/v1/nodes/count?root_cid={root}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 5);
    assert_eq!(body["archived"], 0);

    let (_, body) = json_request(
        &server.router,
        "GET",
        &format!("/v1/nodes/count?root_cid={root}&node_type=file-chunk"),
        None,
    )
    .await;
    assert_eq!(body["total"], 4);

    let (status, _) = json_request(
        &server.router,
        "GET",
        "/v1/nodes/count?node_type=directory",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_chunk() {
    let server = TestServer::new().await;
    let object = TestObject::leaf("a.txt", b"chunk bytes");
    upload(&server, &object).await;

    let request = Request::builder()
        .uri(format!("/v1/chunks/{}", object.root()))
        .body(Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body.as_ref(), b"chunk bytes");

    let missing = Cid::compute(b"nowhere");
    let (status, _) =
        json_request(&server.router, "GET", &format!("/v1/chunks/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_chunk_of_inner_node_is_bad_request() {
    let server = TestServer::new().await;
    let object = TestObject::chunked("big.bin", &seeded_bytes(3, 2000), 1000);
    upload(&server, &object).await;

    let (status, _) = json_request(
        &server.router,
        "GET",
        &format!("/v1/chunks/{}", object.root()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_published_receipt() {
    let server = TestServer::new().await;
    let object = TestObject::leaf("a.txt", b"alpha");
    upload(&server, &object).await;
    let cid = object.root();

    let (status, body) = json_request(
        &server.router,
        "POST",
        &format!("/v1/nodes/{cid}/published"),
        Some(json!({ "block_number": 7 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "incomplete_receipt");
    assert!(body["message"].as_str().unwrap().contains(&cid));

    let (status, _) = json_request(
        &server.router,
        "POST",
        &format!("/v1/nodes/{cid}/published"),
        Some(json!({ "block_number": 7, "tx_hash": "0x01" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let unknown = Cid::compute(b"unknown node");
    let (status, _) = json_request(
        &server.router,
        "POST",
        &format!("/v1/nodes/{unknown}/published"),
        Some(json!({ "block_number": 7, "tx_hash": "0x01" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) =
        json_request(&server.router, "GET", "/v1/archival/progress", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["archiving_nodes"], 1);
    assert_eq!(body["last_archived"], Value::Null);
}

#[tokio::test]
async fn test_confirmations_are_queued() {
    let server = TestServer::new().await;
    let object = TestObject::leaf("a.txt", b"alpha");
    let entries = object.confirmations(3);

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/archival/confirmations",
        Some(json!({ "entries": entries })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["scheduled"], 1);

    let tasks = server.recorded().of_kind(TaskKind::ArchiveObjects);
    assert_eq!(tasks.len(), 1);
    assert_eq!(
        tasks[0].params["entries"][0]["content_hash"],
        object.root_cid.content_hash().to_hex()
    );
}

#[tokio::test]
async fn test_confirmations_reject_bad_hash() {
    let server = TestServer::new().await;
    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/archival/confirmations",
        Some(json!({ "entries": [{ "content_hash": "zz", "piece_index": 1, "piece_offset": 0 }] })),
    )
    .await;
    assert!(status.is_client_error());
    assert!(server.recorded().published().is_empty());
}

#[tokio::test]
async fn test_object_archival_status_and_sweep() {
    let server = TestServer::new().await;
    let object = TestObject::chunked("big.bin", &seeded_bytes(4, 2500), 1000);
    upload(&server, &object).await;
    let root = object.root();

    let (_, body) = json_request(
        &server.router,
        "GET",
        &format!("/v1/objects/{root}/archival"),
        None,
    )
    .await;
    assert_eq!(body["total_nodes"], 4);
    assert_eq!(body["all_nodes_archived"], false);

    server
        .state
        .tracker
        .process_node_archived(&object.confirmations(2))
        .await
        .unwrap();
    server.recorded().clear();

    let (_, body) = json_request(
        &server.router,
        "GET",
        &format!("/v1/objects/{root}/archival"),
        None,
    )
    .await;
    assert_eq!(body["archived_nodes"], 4);
    assert_eq!(body["all_nodes_archived"], true);
    assert_eq!(body["object_archived"], false);

    let (status, body) =
        json_request(&server.router, "POST", "/v1/archival/sweep", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready_roots"], json!([root]));
    assert_eq!(server.recorded().archived_roots(), vec![root.clone()]);

    let (_, body) = json_request(&server.router, "GET", "/v1/archival/progress", None).await;
    assert_eq!(body["last_archived"]["piece_index"], 2);
    assert_eq!(body["last_archived"]["piece_offset"], 3);
}

#[tokio::test]
async fn test_metrics_route_follows_config() {
    let server = TestServer::new().await;
    let (status, _) = json_request(&server.router, "GET", "/metrics", None).await;
    assert_eq!(
        status,
        if server.state.config.server.metrics_enabled {
            StatusCode::OK
        } else {
            StatusCode::NOT_FOUND
        }
    );
}
