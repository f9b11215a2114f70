// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use analytics_sender::constants::{API_VERSION, API_VERSION_KEY};
use analytics_sender::{SenderConfig, SenderError, SenderService, SuspendReason};
use common::helpers::{container, wait_for_status};
use mockito::{Matcher, Server};
use std::time::Duration;

fn config(base_url: String) -> SenderConfig {
    SenderConfig {
        base_url,
        app_secret: "0123456789abcdef".to_string(),
        install_id: "00000000-0000-0000-0000-000000000001".to_string(),
        retry_intervals: vec![Duration::from_millis(10)],
        timeout: Duration::from_secs(5),
        ..SenderConfig::default()
    }
}

#[tokio::test]
async fn test_batch_is_uploaded_end_to_end() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/logs")
        .match_query(Matcher::UrlEncoded(
            API_VERSION_KEY.into(),
            API_VERSION.into(),
        ))
        .match_header("app-secret", "0123456789abcdef")
        .match_header("install-id", "00000000-0000-0000-0000-000000000001")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "batchId": "b-1",
            "logs": [{"type": "event"}, {"type": "page"}]
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let (service, handle) = SenderService::from_config(&config(server.url()))
        .expect("Failed to create sender service");
    tokio::spawn(service.run());

    let completion = handle.send(container("b-1")).await;

    assert!(completion.result.is_ok(), "{:?}", completion.result);
    assert_eq!(completion.status_code, Some(200));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_compressed_batch_is_uploaded() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/logs")
        .match_query(Matcher::Any)
        .match_header("content-encoding", "zstd")
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let mut config = config(server.url());
    config.compression_level = Some(3);
    let (service, handle) =
        SenderService::from_config(&config).expect("Failed to create sender service");
    tokio::spawn(service.run());

    let completion = handle.send(container("b-1")).await;

    assert!(completion.result.is_ok(), "{:?}", completion.result);
    assert_eq!(completion.status_code, Some(202));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_rejected_batch_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/logs")
        .match_query(Matcher::Any)
        .with_status(403)
        .with_body("unknown app secret")
        .expect(1)
        .create_async()
        .await;

    let (service, handle) = SenderService::from_config(&config(server.url()))
        .expect("Failed to create sender service");
    tokio::spawn(service.run());

    let completion = handle.send(container("b-1")).await;

    match completion.result {
        Err(SenderError::ClientError { status, message }) => {
            assert_eq!(status, 403);
            assert_eq!(message, "unknown app secret");
        }
        other => panic!("expected a client error, got {other:?}"),
    }
    assert_eq!(handle.pending_count().await.unwrap(), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_errors_exhaust_retries_and_suspend() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/logs")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let (service, handle) = SenderService::from_config(&config(server.url()))
        .expect("Failed to create sender service");
    tokio::spawn(service.run());

    let _rx = {
        let (tx, rx) = tokio::sync::oneshot::channel();
        handle.send_async(Some(container("b-1")), move |completion| {
            let _ = tx.send(completion);
        });
        rx
    };

    let status = wait_for_status(&handle, "retries to run out", |s| s.is_suspended()).await;
    assert_eq!(status.suspension, Some(SuspendReason::RetriesExhausted));
    assert_eq!(status.pending, 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unreachable_host_suspends_delivery() {
    // Nothing listens on the discard port.
    let (service, handle) = SenderService::from_config(&config("http://127.0.0.1:9".to_string()))
        .expect("Failed to create sender service");
    tokio::spawn(service.run());

    let (tx, _rx) = tokio::sync::oneshot::channel();
    handle.send_async(Some(container("b-1")), move |completion| {
        let _ = tx.send(completion);
    });

    let status = wait_for_status(&handle, "offline suspension", |s| s.is_suspended()).await;
    assert_eq!(status.suspension, Some(SuspendReason::Offline));
    assert_eq!(status.pending, 1);
}
