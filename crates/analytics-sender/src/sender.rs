// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Actor-based delivery engine.
//!
//! [`SenderService`] owns every pending batch, the suspended flag and the
//! delegate registry. Everything that can change that state (callers, HTTP
//! completions, retry timers, connectivity transitions) is funnelled into the
//! service task as a command and applied one at a time:
//!
//! ```text
//!    SenderHandle (clone) ──┐
//!    HTTP request tasks ────┼──> mpsc ──> SenderService ──> PendingCall map
//!    retry timers ──────────┘                 ^
//!    ConnectivityMonitor ──── watch ──────────┘
//! ```
//!
//! # Delivery rules
//!
//! - 2xx: the batch is removed and its handler gets `Ok(())`.
//! - 4xx (other than 408 and 429): the batch is removed and its handler gets
//!   [`SenderError::ClientError`].
//! - 5xx, 408, 429, timeouts: the batch is retried on the configured schedule.
//!   When the schedule runs out the whole sender is suspended; the batch stays
//!   pending and its handler is not called.
//! - Host unreachable: the whole sender is suspended immediately.
//!
//! A suspended sender accepts new batches but dispatches nothing until it is
//! resumed, either explicitly or because the network came back.
//!
//! Only [`SenderHandle`]s keep the service alive. Request tasks and timers
//! hold weak senders, so once the last handle is dropped the service stops
//! and cancels whatever is still pending.

use crate::config::SenderConfig;
use crate::connectivity::{ConnectivityMonitor, NetworkStatus};
use crate::container::LogContainer;
use crate::delegate::{DelegateId, DelegateRegistry, SenderDelegate};
use crate::error::{SenderError, TransportError};
use crate::http::{HttpTransport, IngestionResponse, ReqwestTransport, RequestTemplate};
use crate::pending_call::{
    CallOutcome, CallScheduler, CallStatus, Completion, CompletionHandler, PendingCall,
};
use crate::redact::RedactedHeaders;
use crate::retry::RetryPolicy;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why delivery is currently suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// [`SenderHandle::suspend`] was called. Only an explicit resume lifts it.
    Manual,
    /// The network or the ingestion host became unreachable.
    Offline,
    /// A batch used up its retry schedule.
    RetriesExhausted,
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Offline => write!(f, "offline"),
            Self::RetriesExhausted => write!(f, "retries exhausted"),
        }
    }
}

/// Snapshot of the service state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderStatus {
    pub suspension: Option<SuspendReason>,
    pub pending: usize,
    pub delegates: usize,
    pub calls: HashMap<String, CallStatus>,
}

impl SenderStatus {
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspension.is_some()
    }
}

/// Commands processed by the sender service.
pub(crate) enum SenderCommand {
    Send {
        batch_id: String,
        log_count: usize,
        body: Bytes,
        handler: CompletionHandler,
    },
    SendCall(String),
    Cancel(String),
    Suspend,
    Resume,
    AddDelegate(DelegateId, Weak<dyn SenderDelegate>),
    RemoveDelegate(DelegateId),
    SetBaseUrl(String, oneshot::Sender<Result<(), SenderError>>),
    Completed {
        batch_id: String,
        generation: u64,
        response: Result<IngestionResponse, TransportError>,
    },
    RetryTimerFired {
        batch_id: String,
        generation: u64,
    },
    Status(oneshot::Sender<SenderStatus>),
    Shutdown,
}

/// Cloneable handle used to submit batches and control the sender.
///
/// Validation and encoding happen on the caller's task; nothing here waits on
/// the network.
#[derive(Clone)]
pub struct SenderHandle {
    tx: mpsc::UnboundedSender<SenderCommand>,
    compression_level: Option<i32>,
}

impl SenderHandle {
    /// Queues a container for delivery.
    ///
    /// A missing or invalid container is rejected immediately: `handler` runs
    /// before this method returns and no pending batch is created. Otherwise
    /// `handler` runs exactly once when the batch is delivered, permanently
    /// rejected or cancelled.
    pub fn send_async<F>(&self, container: Option<LogContainer>, handler: F)
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        let Some(container) = container else {
            warn!("SENDER | Rejecting null log container");
            handler(Completion {
                batch_id: String::new(),
                status_code: None,
                result: Err(SenderError::NullContainer),
            });
            return;
        };

        let prepared = container
            .validate()
            .and_then(|()| container.encode(self.compression_level));
        let body = match prepared {
            Ok(body) => body,
            Err(e) => {
                warn!("SENDER | Rejecting log container: {}", e);
                handler(Completion {
                    batch_id: container.batch_id,
                    status_code: None,
                    result: Err(e),
                });
                return;
            }
        };

        let command = SenderCommand::Send {
            batch_id: container.batch_id,
            log_count: container.logs.len(),
            body,
            handler: Box::new(handler),
        };
        if let Err(mpsc::error::SendError(command)) = self.tx.send(command) {
            error!("SENDER | Failed to queue batch: sender service is not running");
            if let SenderCommand::Send {
                batch_id, handler, ..
            } = command
            {
                handler(Completion {
                    batch_id,
                    status_code: None,
                    result: Err(SenderError::NotRunning),
                });
            }
        }
    }

    /// Queues a container and waits for its completion.
    pub async fn send(&self, container: LogContainer) -> Completion {
        let (response_tx, response_rx) = oneshot::channel();
        let batch_id = container.batch_id.clone();
        self.send_async(Some(container), move |completion| {
            let _ = response_tx.send(completion);
        });

        response_rx.await.unwrap_or(Completion {
            batch_id,
            status_code: None,
            result: Err(SenderError::NotRunning),
        })
    }

    /// Dispatches an already pending batch now, unless it is in flight or the
    /// sender is suspended.
    pub fn send_call(&self, batch_id: &str) -> Result<(), SenderError> {
        self.command(SenderCommand::SendCall(batch_id.to_string()))
    }

    /// Drops a pending batch. Its handler receives [`SenderError::Cancelled`].
    pub fn cancel(&self, batch_id: &str) -> Result<(), SenderError> {
        self.command(SenderCommand::Cancel(batch_id.to_string()))
    }

    pub fn suspend(&self) -> Result<(), SenderError> {
        self.command(SenderCommand::Suspend)
    }

    pub fn resume(&self) -> Result<(), SenderError> {
        self.command(SenderCommand::Resume)
    }

    /// Registers a delegate without taking ownership of it.
    pub fn add_delegate<D: SenderDelegate + 'static>(
        &self,
        delegate: &Arc<D>,
    ) -> Result<(), SenderError> {
        let delegate: Arc<dyn SenderDelegate> = Arc::clone(delegate) as Arc<dyn SenderDelegate>;
        let id = DelegateId::of(&delegate);
        self.command(SenderCommand::AddDelegate(id, Arc::downgrade(&delegate)))
    }

    pub fn remove_delegate<D: SenderDelegate + 'static>(
        &self,
        delegate: &Arc<D>,
    ) -> Result<(), SenderError> {
        let delegate: Arc<dyn SenderDelegate> = Arc::clone(delegate) as Arc<dyn SenderDelegate>;
        self.command(SenderCommand::RemoveDelegate(DelegateId::of(&delegate)))
    }

    /// Points later requests at another ingestion host.
    pub async fn set_base_url(&self, base_url: &str) -> Result<(), SenderError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command(SenderCommand::SetBaseUrl(base_url.to_string(), response_tx))?;
        response_rx.await.map_err(|_| SenderError::NotRunning)?
    }

    pub async fn status(&self) -> Result<SenderStatus, SenderError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command(SenderCommand::Status(response_tx))?;
        response_rx.await.map_err(|_| SenderError::NotRunning)
    }

    pub async fn pending_count(&self) -> Result<usize, SenderError> {
        Ok(self.status().await?.pending)
    }

    pub async fn is_suspended(&self) -> Result<bool, SenderError> {
        Ok(self.status().await?.is_suspended())
    }

    pub async fn delegate_count(&self) -> Result<usize, SenderError> {
        Ok(self.status().await?.delegates)
    }

    pub async fn call_status(&self, batch_id: &str) -> Result<Option<CallStatus>, SenderError> {
        Ok(self.status().await?.calls.get(batch_id).copied())
    }

    /// Stops the service. Batches still pending are cancelled.
    pub fn shutdown(&self) -> Result<(), SenderError> {
        self.command(SenderCommand::Shutdown)
    }

    fn command(&self, command: SenderCommand) -> Result<(), SenderError> {
        self.tx.send(command).map_err(|_| SenderError::NotRunning)
    }
}

impl fmt::Debug for SenderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SenderHandle")
    }
}

/// Issues requests and retry timers on behalf of pending calls.
struct Dispatcher {
    transport: Arc<dyn HttpTransport>,
    template: RequestTemplate,
    tx: mpsc::WeakUnboundedSender<SenderCommand>,
}

impl CallScheduler for Dispatcher {
    fn submit(&self, batch_id: &str, generation: u64, body: Bytes) -> JoinHandle<()> {
        let request = self.template.build(body);
        debug!(
            "SENDER | Sending batch {} to {} [{}]",
            batch_id,
            request.url,
            RedactedHeaders(&request.headers)
        );

        let transport = Arc::clone(&self.transport);
        let tx = self.tx.clone();
        let batch_id = batch_id.to_string();
        tokio::spawn(async move {
            let response = transport.send(request).await;
            // No handle left means the service is stopping; drop the result.
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(SenderCommand::Completed {
                    batch_id,
                    generation,
                    response,
                });
            }
        })
    }

    fn schedule_retry(&self, batch_id: &str, generation: u64, delay: Duration) -> JoinHandle<()> {
        let tx = self.tx.clone();
        let batch_id = batch_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(SenderCommand::RetryTimerFired {
                    batch_id,
                    generation,
                });
            }
        })
    }
}

enum Event {
    Command(SenderCommand),
    Network(NetworkStatus),
    Stop,
}

/// The service task owning all delivery state.
pub struct SenderService {
    calls: HashMap<String, PendingCall>,
    suspension: Option<SuspendReason>,
    delegates: DelegateRegistry,
    dispatcher: Dispatcher,
    retry_policy: RetryPolicy,
    handle_tx: mpsc::WeakUnboundedSender<SenderCommand>,
    compression_level: Option<i32>,
    rx: mpsc::UnboundedReceiver<SenderCommand>,
    connectivity: Option<watch::Receiver<NetworkStatus>>,
    cancel: CancellationToken,
}

impl SenderService {
    /// Creates the service and its handle. Spawn [`SenderService::run`] and
    /// use the handle to submit batches.
    pub fn new(
        config: &SenderConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<(Self, SenderHandle), SenderError> {
        config.validate()?;
        let template = RequestTemplate::new(config)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let service = Self {
            calls: HashMap::new(),
            suspension: None,
            delegates: DelegateRegistry::new(),
            dispatcher: Dispatcher {
                transport,
                template,
                tx: tx.downgrade(),
            },
            retry_policy: config.retry_policy(),
            handle_tx: tx.downgrade(),
            compression_level: config.compression_level,
            rx,
            connectivity: None,
            cancel: CancellationToken::new(),
        };
        let handle = SenderHandle {
            tx,
            compression_level: config.compression_level,
        };
        Ok((service, handle))
    }

    /// Creates a service sending through a [`ReqwestTransport`].
    pub fn from_config(config: &SenderConfig) -> Result<(Self, SenderHandle), SenderError> {
        Self::new(config, Arc::new(ReqwestTransport::new(config)))
    }

    /// Suspends and resumes delivery following `monitor`'s transitions.
    #[must_use]
    pub fn with_connectivity(mut self, monitor: &ConnectivityMonitor) -> Self {
        self.connectivity = Some(monitor.subscribe());
        self
    }

    /// Stops the service when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub async fn run(mut self) {
        debug!("SENDER | Sender service started");

        let initial = self
            .connectivity
            .as_mut()
            .map(|rx| *rx.borrow_and_update());
        if initial == Some(NetworkStatus::Unreachable) {
            self.suspend(SuspendReason::Offline);
        }

        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => Event::Stop,
                command = self.rx.recv() => match command {
                    Some(command) => Event::Command(command),
                    None => Event::Stop,
                },
                Some(status) = next_status(&mut self.connectivity) => Event::Network(status),
            };

            match event {
                Event::Stop | Event::Command(SenderCommand::Shutdown) => break,
                Event::Command(command) => self.handle_command(command),
                Event::Network(status) => self.on_network_change(status),
            }
        }

        self.cancel_all();
        debug!("SENDER | Sender service stopped");
    }

    fn handle_command(&mut self, command: SenderCommand) {
        match command {
            SenderCommand::Send {
                batch_id,
                log_count,
                body,
                handler,
            } => self.enqueue(batch_id, log_count, body, handler),
            SenderCommand::SendCall(batch_id) => self.send_call(&batch_id),
            SenderCommand::Cancel(batch_id) => self.cancel_call(&batch_id),
            SenderCommand::Suspend => self.suspend(SuspendReason::Manual),
            SenderCommand::Resume => self.resume(),
            SenderCommand::AddDelegate(id, delegate) => self.delegates.add(id, delegate),
            SenderCommand::RemoveDelegate(id) => {
                self.delegates.remove(id);
            }
            SenderCommand::SetBaseUrl(base_url, response_tx) => {
                let result = self.dispatcher.template.set_base_url(&base_url);
                if result.is_ok() {
                    info!("SENDER | Ingestion URL set to {}", self.dispatcher.template.url());
                }
                if response_tx.send(result).is_err() {
                    error!("SENDER | Failed to send set_base_url response - receiver dropped");
                }
            }
            SenderCommand::Completed {
                batch_id,
                generation,
                response,
            } => self.on_completed(batch_id, generation, response),
            SenderCommand::RetryTimerFired {
                batch_id,
                generation,
            } => {
                let fired = self
                    .calls
                    .get_mut(&batch_id)
                    .is_some_and(|call| call.on_timer_fired(generation));
                if fired {
                    debug!("SENDER | Retrying batch {}", batch_id);
                    self.send_call(&batch_id);
                }
            }
            SenderCommand::Status(response_tx) => {
                if response_tx.send(self.status()).is_err() {
                    error!("SENDER | Failed to send status response - receiver dropped");
                }
            }
            SenderCommand::Shutdown => {}
        }
    }

    fn enqueue(&mut self, batch_id: String, log_count: usize, body: Bytes, handler: CompletionHandler) {
        if self.calls.contains_key(&batch_id) {
            warn!("SENDER | Batch {} is already pending, ignoring resubmission", batch_id);
            handler(Completion {
                result: Err(SenderError::DuplicateBatch(batch_id.clone())),
                batch_id,
                status_code: None,
            });
            return;
        }

        debug!("SENDER | Queued batch {} with {} logs", batch_id, log_count);
        let call = PendingCall::new(batch_id.clone(), body, handler, self.retry_policy.clone());
        self.calls.insert(batch_id.clone(), call);

        if self.suspension.is_none() {
            self.send_call(&batch_id);
        } else {
            debug!("SENDER | Sender is suspended, batch {} will be sent on resume", batch_id);
        }
    }

    fn send_call(&mut self, batch_id: &str) {
        if let Some(reason) = self.suspension {
            debug!("SENDER | Not sending batch {} while suspended ({})", batch_id, reason);
            return;
        }
        let Some(call) = self.calls.get_mut(batch_id) else {
            warn!("SENDER | No pending batch {}", batch_id);
            return;
        };
        if !call.start(&self.dispatcher) {
            debug!("SENDER | Batch {} is already in flight", call.batch_id());
        }
    }

    fn cancel_call(&mut self, batch_id: &str) {
        match self.calls.remove(batch_id) {
            Some(call) => {
                info!("SENDER | Cancelled batch {}", batch_id);
                call.finish(None, Err(SenderError::Cancelled(batch_id.to_string())));
            }
            None => debug!("SENDER | Nothing to cancel for batch {}", batch_id),
        }
    }

    fn on_completed(
        &mut self,
        batch_id: String,
        generation: u64,
        response: Result<IngestionResponse, TransportError>,
    ) {
        let Some(call) = self.calls.get_mut(&batch_id) else {
            debug!("SENDER | Ignoring completion for unknown batch {}", batch_id);
            return;
        };
        let Some(outcome) = call.on_completed(generation, response, &self.dispatcher) else {
            return;
        };

        match outcome {
            CallOutcome::Delivered { status } => {
                info!("SENDER | Delivered batch {} ({})", batch_id, status);
                if let Some(call) = self.calls.remove(&batch_id) {
                    call.finish(Some(status), Ok(()));
                }
                self.notify_delegates(|delegate, handle| {
                    delegate.on_delivered(handle, &batch_id);
                });
            }
            CallOutcome::Failed(err) => {
                error!("SENDER | Dropping batch {}: {}", batch_id, err);
                self.notify_delegates(|delegate, handle| {
                    delegate.on_failed(handle, &batch_id, &err);
                });
                if let Some(call) = self.calls.remove(&batch_id) {
                    call.finish(err.status_code(), Err(err));
                }
            }
            CallOutcome::RetryScheduled { delay, cause } => {
                warn!(
                    "SENDER | Batch {} failed: {}. Retrying in {} ms",
                    batch_id,
                    cause,
                    delay.as_millis()
                );
            }
            CallOutcome::Suspend { reason, cause } => {
                warn!("SENDER | Batch {} failed: {}. Suspending delivery", batch_id, cause);
                self.suspend(reason);
            }
        }
    }

    fn on_network_change(&mut self, status: NetworkStatus) {
        match status {
            NetworkStatus::Unreachable => self.suspend(SuspendReason::Offline),
            NetworkStatus::Reachable => match self.suspension {
                Some(SuspendReason::Offline | SuspendReason::RetriesExhausted) => self.resume(),
                Some(SuspendReason::Manual) => {
                    debug!("SENDER | Network is back but sender was suspended manually");
                }
                None => {}
            },
        }
    }

    fn suspend(&mut self, reason: SuspendReason) {
        if let Some(current) = self.suspension {
            // Already suspended. An explicit suspend still pins the state so a
            // network transition cannot lift it.
            if reason == SuspendReason::Manual && current != SuspendReason::Manual {
                self.suspension = Some(SuspendReason::Manual);
            }
            return;
        }

        info!(
            "SENDER | Suspending delivery ({}), {} batches pending",
            reason,
            self.calls.len()
        );
        self.suspension = Some(reason);
        for call in self.calls.values_mut() {
            call.suspend();
        }

        self.notify_delegates(|delegate, handle| delegate.on_suspend(handle));
    }

    fn resume(&mut self) {
        if self.suspension.take().is_none() {
            return;
        }

        info!("SENDER | Resuming delivery of {} batches", self.calls.len());
        for call in self.calls.values_mut() {
            call.start(&self.dispatcher);
        }

        self.notify_delegates(|delegate, handle| delegate.on_resume(handle));
    }

    /// Calls `f` for every live delegate. Skipped once no handle is left,
    /// since the service is then about to stop.
    fn notify_delegates(&mut self, mut f: impl FnMut(&dyn SenderDelegate, &SenderHandle)) {
        let Some(tx) = self.handle_tx.upgrade() else {
            return;
        };
        let handle = SenderHandle {
            tx,
            compression_level: self.compression_level,
        };
        self.delegates.notify(|delegate| f(delegate, &handle));
    }

    fn cancel_all(&mut self) {
        if !self.calls.is_empty() {
            warn!("SENDER | Cancelling {} pending batches", self.calls.len());
        }
        for (batch_id, call) in self.calls.drain() {
            call.finish(None, Err(SenderError::Cancelled(batch_id)));
        }
    }

    fn status(&mut self) -> SenderStatus {
        SenderStatus {
            suspension: self.suspension,
            pending: self.calls.len(),
            delegates: self.delegates.len(),
            calls: self
                .calls
                .iter()
                .map(|(batch_id, call)| (batch_id.clone(), call.status()))
                .collect(),
        }
    }
}

/// Next connectivity transition, or `None` once the monitor is gone.
async fn next_status(rx: &mut Option<watch::Receiver<NetworkStatus>>) -> Option<NetworkStatus> {
    let Some(receiver) = rx.as_mut() else {
        return std::future::pending().await;
    };
    if receiver.changed().await.is_ok() {
        return Some(*receiver.borrow_and_update());
    }
    *rx = None;
    None
}
