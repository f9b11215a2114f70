// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Network reachability tracking.
//!
//! The platform layer (or [`ConnectivityMonitor::spawn_probe`]) reports the
//! current status; subscribers only ever observe actual transitions.

use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Reachable,
    Unreachable,
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reachable => write!(f, "reachable"),
            Self::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<NetworkStatus>,
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(initial: NetworkStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    #[must_use]
    pub fn current_status(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    /// Records the latest status. Returns `true` when this was a transition,
    /// `false` when the status was already current and nothing was published.
    pub fn set_status(&self, status: NetworkStatus) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!("SENDER | Network is now {}", status);
        }
        changed
    }

    /// A receiver woken on every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }

    /// Periodically checks whether `addr` accepts TCP connections and reports
    /// the result until `cancel` fires.
    pub fn spawn_probe(
        &self,
        addr: String,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let status = probe(&addr, interval).await;
                        debug!("SENDER | Reachability probe of {} reported {}", addr, status);
                        monitor.set_status(status);
                    }
                }
            }
        })
    }
}

async fn probe(addr: &str, timeout: Duration) -> NetworkStatus {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => NetworkStatus::Reachable,
        _ => NetworkStatus::Unreachable,
    }
}
