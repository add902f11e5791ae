//! HTTP gateway blockstore tests against a mock gateway.

use archivist_core::{Cid, DagNode};
use archivist_storage::{Blockstore, HttpGatewayBlockstore, StorageError};
use httpmock::prelude::*;
use std::time::Duration;

fn gateway(server: &MockServer) -> HttpGatewayBlockstore {
    HttpGatewayBlockstore::new(&server.base_url(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn fetches_and_verifies_block() {
    let server = MockServer::start_async().await;
    let node = DagNode::file_chunk(b"chunk bytes".to_vec());
    let encoded = node.encode().unwrap();
    let cid = node.cid().unwrap();

    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/blocks/{cid}"));
            then.status(200).body(encoded.clone());
        })
        .await;

    let block = gateway(&server).get_block(&cid).await.unwrap().unwrap();
    assert_eq!(block.as_ref(), encoded.as_slice());
    mock.assert_async().await;
}

#[tokio::test]
async fn missing_block_is_none() {
    let server = MockServer::start_async().await;
    let cid = Cid::compute(b"absent");

    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/blocks/{cid}"));
            then.status(404);
        })
        .await;

    assert!(gateway(&server).get_block(&cid).await.unwrap().is_none());
}

#[tokio::test]
async fn server_error_is_propagated() {
    let server = MockServer::start_async().await;
    let cid = Cid::compute(b"flaky");

    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/blocks/{cid}"));
            then.status(503);
        })
        .await;

    assert!(matches!(
        gateway(&server).get_block(&cid).await,
        Err(StorageError::Http(_))
    ));
}

#[tokio::test]
async fn wrong_bytes_are_rejected() {
    let server = MockServer::start_async().await;
    let cid = Cid::compute(b"expected");

    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/blocks/{cid}"));
            then.status(200).body("something else");
        })
        .await;

    assert!(matches!(
        gateway(&server).get_block(&cid).await,
        Err(StorageError::IntegrityMismatch { .. })
    ));
}

#[tokio::test]
async fn gateway_is_read_only() {
    let server = MockServer::start_async().await;
    let cid = Cid::compute(b"x");

    assert!(matches!(
        gateway(&server)
            .put_block(&cid, bytes::Bytes::from_static(b"x"))
            .await,
        Err(StorageError::Unsupported(_))
    ));
}
