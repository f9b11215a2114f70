// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Builders and polling helpers shared by the integration tests

#![allow(dead_code)]

use analytics_sender::{Device, Log, LogContainer, SenderHandle, SenderStatus};
use std::time::Duration;
use tokio::time::{sleep, timeout};

pub fn device() -> Device {
    Device {
        sdk_name: "analytics.android".to_string(),
        sdk_version: "0.5.0".to_string(),
        model: Some("Pixel".to_string()),
        os_name: "Android".to_string(),
        os_version: "7.1".to_string(),
        locale: "fr_FR".to_string(),
        time_zone_offset: 120,
        app_version: "2.3".to_string(),
        app_build: "230".to_string(),
    }
}

pub fn log(kind: &str) -> Log {
    Log {
        kind: kind.to_string(),
        timestamp: Some(1_490_000_000_000),
        sid: None,
        device: Some(device()),
        properties: Default::default(),
    }
}

pub fn container(batch_id: &str) -> LogContainer {
    LogContainer::new(batch_id, vec![log("event"), log("page")])
}

/// Polls `check` until it holds, failing the test after two seconds.
pub async fn wait_for<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    let poll = async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    };
    if timeout(Duration::from_secs(2), poll).await.is_err() {
        panic!("timed out waiting for {what}");
    }
}

/// Waits until the sender status satisfies `predicate` and returns it.
pub async fn wait_for_status<P>(handle: &SenderHandle, what: &str, predicate: P) -> SenderStatus
where
    P: Fn(&SenderStatus) -> bool,
{
    let poll = async {
        loop {
            let status = handle.status().await.expect("sender service stopped");
            if predicate(&status) {
                return status;
            }
            sleep(Duration::from_millis(10)).await;
        }
    };
    match timeout(Duration::from_secs(2), poll).await {
        Ok(status) => status,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}
