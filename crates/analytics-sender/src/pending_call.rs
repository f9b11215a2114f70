// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery state of a single batch.
//!
//! A [`PendingCall`] is owned by the sender service and moves between three
//! states:
//!
//! ```text
//!            start()                 5xx / timeout, schedule left
//!   Idle ─────────────> Submitted ─────────────────────────────> RetryScheduled
//!    ^  <───────────────────┘  │                                        │
//!    │   suspend()             │ 2xx / 4xx: finish()                    │
//!    │                         v                                        │
//!    │                      removed                                     │
//!    └──────────────────────── timer fired / suspend() ─────────────────┘
//! ```
//!
//! Every request and timer is tagged with a generation number. Messages from
//! a request or timer that has since been cancelled carry an old generation
//! and are ignored, so a late completion can never revive a call.

use crate::error::{SenderError, TransportError};
use crate::http::{classify, IngestionResponse, ResponseClass};
use crate::retry::RetryPolicy;
use crate::sender::SuspendReason;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Result delivered to a batch's completion handler.
#[derive(Debug)]
pub struct Completion {
    pub batch_id: String,
    /// Status of the last HTTP response, if the batch got one.
    pub status_code: Option<u16>,
    pub result: Result<(), SenderError>,
}

pub type CompletionHandler = Box<dyn FnOnce(Completion) + Send + 'static>;

/// Observable state of a pending call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Nothing in flight and no retry scheduled.
    Idle,
    /// A request is in flight.
    Submitted,
    /// Waiting for the retry timer.
    RetryScheduled,
}

/// Spawns the asynchronous work a call needs.
///
/// Both tasks report back to the sender service tagged with `generation`.
pub(crate) trait CallScheduler {
    fn submit(&self, batch_id: &str, generation: u64, body: Bytes) -> JoinHandle<()>;

    fn schedule_retry(&self, batch_id: &str, generation: u64, delay: Duration) -> JoinHandle<()>;
}

/// What the service has to do after a request completed.
#[derive(Debug)]
pub(crate) enum CallOutcome {
    Delivered { status: u16 },
    Failed(SenderError),
    RetryScheduled { delay: Duration, cause: SenderError },
    Suspend { reason: SuspendReason, cause: SenderError },
}

enum CallState {
    Idle,
    Submitted { generation: u64, task: JoinHandle<()> },
    RetryScheduled { generation: u64, timer: JoinHandle<()> },
}

pub(crate) struct PendingCall {
    batch_id: String,
    body: Bytes,
    handler: Option<CompletionHandler>,
    retry_policy: RetryPolicy,
    attempt: usize,
    generation: u64,
    state: CallState,
}

impl PendingCall {
    pub(crate) fn new(
        batch_id: String,
        body: Bytes,
        handler: CompletionHandler,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            batch_id,
            body,
            handler: Some(handler),
            retry_policy,
            attempt: 0,
            generation: 0,
            state: CallState::Idle,
        }
    }

    pub(crate) fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub(crate) fn status(&self) -> CallStatus {
        match self.state {
            CallState::Idle => CallStatus::Idle,
            CallState::Submitted { .. } => CallStatus::Submitted,
            CallState::RetryScheduled { .. } => CallStatus::RetryScheduled,
        }
    }

    pub(crate) fn is_submitted(&self) -> bool {
        matches!(self.state, CallState::Submitted { .. })
    }

    /// Sends the batch. A call that is already in flight is left alone and
    /// `false` is returned.
    pub(crate) fn start(&mut self, scheduler: &impl CallScheduler) -> bool {
        if self.is_submitted() {
            return false;
        }
        self.cancel_retry_timer();

        self.generation += 1;
        let task = scheduler.submit(&self.batch_id, self.generation, self.body.clone());
        self.state = CallState::Submitted {
            generation: self.generation,
            task,
        };
        true
    }

    /// Interprets the result of the request tagged `generation`.
    ///
    /// Returns `None` when the completion is stale.
    pub(crate) fn on_completed(
        &mut self,
        generation: u64,
        response: Result<IngestionResponse, TransportError>,
        scheduler: &impl CallScheduler,
    ) -> Option<CallOutcome> {
        match &self.state {
            CallState::Submitted {
                generation: current,
                ..
            } if *current == generation => {}
            _ => {
                debug!(
                    "SENDER | Ignoring stale completion for batch {} (generation {})",
                    self.batch_id, generation
                );
                return None;
            }
        }
        self.state = CallState::Idle;

        let outcome = match classify(response) {
            ResponseClass::Success { status } => CallOutcome::Delivered { status },
            ResponseClass::Terminal(err) => CallOutcome::Failed(err),
            ResponseClass::Offline(err) => CallOutcome::Suspend {
                reason: SuspendReason::Offline,
                cause: err.into(),
            },
            ResponseClass::Recoverable(cause) => match self.retry_policy.delay_for(self.attempt) {
                Some(delay) => {
                    self.attempt += 1;
                    self.generation += 1;
                    let timer = scheduler.schedule_retry(&self.batch_id, self.generation, delay);
                    self.state = CallState::RetryScheduled {
                        generation: self.generation,
                        timer,
                    };
                    CallOutcome::RetryScheduled { delay, cause }
                }
                None => CallOutcome::Suspend {
                    reason: SuspendReason::RetriesExhausted,
                    cause,
                },
            },
        };
        Some(outcome)
    }

    /// Accepts the timer tagged `generation` if it is the one currently
    /// scheduled. The call is then idle and ready to be started.
    pub(crate) fn on_timer_fired(&mut self, generation: u64) -> bool {
        match &self.state {
            CallState::RetryScheduled {
                generation: current,
                ..
            } if *current == generation => {
                self.state = CallState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Drops a scheduled retry. An in-flight request is not affected.
    pub(crate) fn cancel_retry_timer(&mut self) {
        if let CallState::RetryScheduled { timer, .. } = &self.state {
            timer.abort();
            self.state = CallState::Idle;
        }
    }

    /// Cancels the timer or in-flight request and rewinds the retry schedule.
    /// The call stays dormant until started again.
    pub(crate) fn suspend(&mut self) {
        match std::mem::replace(&mut self.state, CallState::Idle) {
            CallState::Submitted { task, .. } => task.abort(),
            CallState::RetryScheduled { timer, .. } => timer.abort(),
            CallState::Idle => {}
        }
        self.attempt = 0;
    }

    /// Ends the call and hands the result to its completion handler.
    pub(crate) fn finish(mut self, status_code: Option<u16>, result: Result<(), SenderError>) {
        self.suspend();
        if let Some(handler) = self.handler.take() {
            handler(Completion {
                batch_id: self.batch_id.clone(),
                status_code,
                result,
            });
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.suspend();
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("batch_id", &self.batch_id)
            .field("status", &self.status())
            .field("attempt", &self.attempt)
            .field("generation", &self.generation)
            .finish()
    }
}
