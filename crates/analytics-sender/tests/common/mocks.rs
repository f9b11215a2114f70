// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scripted transport and recording delegate for driving the sender in tests

#![allow(dead_code)]

use analytics_sender::{
    HttpTransport, IngestionRequest, IngestionResponse, SenderDelegate, SenderError,
    SenderHandle, TransportError,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// What the stub answers to one request.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Status(u16),
    Offline,
    Timeout,
    /// Never answers; the request stays in flight until it is cancelled.
    Hang,
}

/// Transport answering from a script, then with a fallback reply.
pub struct StubTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    requests: Mutex<Vec<IngestionRequest>>,
}

impl StubTransport {
    pub fn new(script: Vec<Reply>, fallback: Reply) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(reply: Reply) -> Self {
        Self::new(Vec::new(), reply)
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Batch ids of every request received, in order.
    pub fn batch_ids(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| {
                let body: serde_json::Value =
                    serde_json::from_slice(&request.body).expect("body is JSON");
                body["batchId"].as_str().unwrap_or_default().to_string()
            })
            .collect()
    }

    pub fn requests(&self) -> Vec<IngestionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn send(&self, request: IngestionRequest) -> Result<IngestionResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        match reply {
            Reply::Status(status) => Ok(IngestionResponse {
                status,
                body: Bytes::from_static(b"stubbed"),
            }),
            Reply::Offline => Err(TransportError::Offline("connection refused".to_string())),
            Reply::Timeout => Err(TransportError::Timeout("deadline elapsed".to_string())),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Delegate counting every callback it receives.
#[derive(Default)]
pub struct RecordingDelegate {
    pub suspends: AtomicUsize,
    pub resumes: AtomicUsize,
    pub delivered: Mutex<Vec<String>>,
    pub failed: Mutex<Vec<(String, Option<u16>)>>,
}

impl RecordingDelegate {
    pub fn suspends(&self) -> usize {
        self.suspends.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }
}

impl SenderDelegate for RecordingDelegate {
    fn on_suspend(&self, _sender: &SenderHandle) {
        self.suspends.fetch_add(1, Ordering::SeqCst);
    }

    fn on_resume(&self, _sender: &SenderHandle) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_delivered(&self, _sender: &SenderHandle, batch_id: &str) {
        self.delivered.lock().unwrap().push(batch_id.to_string());
    }

    fn on_failed(&self, _sender: &SenderHandle, batch_id: &str, error: &SenderError) {
        self.failed
            .lock()
            .unwrap()
            .push((batch_id.to_string(), error.status_code()));
    }
}
