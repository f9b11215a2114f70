// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery engine for batched analytics logs.
//!
//! Containers of log entries are handed to a [`sender::SenderHandle`], which
//! forwards them to a single [`sender::SenderService`] actor. The service owns
//! every pending batch, dispatches it over HTTP, retries recoverable failures
//! on a fixed schedule and suspends all delivery when the network goes away or
//! retries run out. Delivery resumes when connectivity returns.
//!
//! ```text
//!   SenderHandle ──commands──> SenderService ──spawn──> HttpTransport
//!        ^                      │   ^    ^                    │
//!        │                      │   │    └──── completion ────┘
//!   delegates <── suspend/resume┘   └── ConnectivityMonitor (watch)
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod connectivity;
pub mod constants;
pub mod container;
pub mod delegate;
pub mod error;
pub mod http;
pub mod logger;
pub mod pending_call;
pub mod redact;
pub mod retry;
pub mod sender;

pub use config::SenderConfig;
pub use connectivity::{ConnectivityMonitor, NetworkStatus};
pub use container::{Device, Log, LogContainer};
pub use delegate::SenderDelegate;
pub use error::{SenderError, TransportError};
pub use http::{HttpTransport, IngestionRequest, IngestionResponse, ReqwestTransport};
pub use pending_call::{CallStatus, Completion};
pub use retry::RetryPolicy;
pub use sender::{SenderHandle, SenderService, SenderStatus, SuspendReason};
