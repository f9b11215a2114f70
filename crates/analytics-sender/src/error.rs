// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors reported by the sender.
///
/// Only `NullContainer`, `InvalidContainer`, `DuplicateBatch`, `Serialization`,
/// `ClientError` and `Cancelled` ever reach a completion handler. Server and
/// transport failures are absorbed by the retry and suspend machinery.
#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    #[error("Log container is null")]
    NullContainer,

    #[error("Log container {batch_id} is invalid: {reason}")]
    InvalidContainer { batch_id: String, reason: String },

    #[error("Batch {0} is already pending")]
    DuplicateBatch(String),

    #[error("Failed to encode batch {batch_id}: {reason}")]
    Serialization { batch_id: String, reason: String },

    #[error("Ingestion rejected the batch with status {status}: {message}")]
    ClientError { status: u16, message: String },

    #[error("Ingestion returned server error status {status}")]
    ServerError { status: u16 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Batch {0} was cancelled")]
    Cancelled(String),

    #[error("Sender service is not running")]
    NotRunning,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SenderError {
    /// HTTP status carried by the error, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ClientError { status, .. } | Self::ServerError { status } => Some(*status),
            _ => None,
        }
    }
}

/// Failures below the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The host could not be reached at all. Treated as connectivity loss.
    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transport failure: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Offline(err.to_string())
        } else if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}
