// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log batches and their wire encoding.
//!
//! A [`LogContainer`] is the unit of upload: a batch id plus the logs it holds.
//! Containers are validated before they are accepted by the sender, then
//! encoded once into the JSON body that every attempt re-sends.

use crate::error::SenderError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Device metadata attached to every log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub sdk_name: String,
    pub sdk_version: String,
    pub model: Option<String>,
    pub os_name: String,
    pub os_version: String,
    pub locale: String,
    pub time_zone_offset: i32,
    pub app_version: String,
    pub app_build: String,
}

impl Device {
    fn missing_field(&self) -> Option<&'static str> {
        [
            ("sdkName", &self.sdk_name),
            ("sdkVersion", &self.sdk_version),
            ("osName", &self.os_name),
            ("osVersion", &self.os_version),
            ("locale", &self.locale),
            ("appVersion", &self.app_version),
            ("appBuild", &self.app_build),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

/// A single analytics log entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    #[serde(rename = "type")]
    pub kind: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub device: Option<Device>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl Log {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Returns the reason the log would be rejected, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.kind.trim().is_empty() {
            return Err("log type is missing".to_string());
        }
        if self.timestamp.is_none() {
            return Err(format!("{} log has no timestamp", self.kind));
        }
        let Some(device) = &self.device else {
            return Err(format!("{} log has no device metadata", self.kind));
        };
        if let Some(field) = device.missing_field() {
            return Err(format!("{} log device is missing {field}", self.kind));
        }
        Ok(())
    }
}

/// A named batch of logs submitted as one upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogContainer {
    pub batch_id: String,
    pub logs: Vec<Log>,
}

impl LogContainer {
    #[must_use]
    pub fn new(batch_id: impl Into<String>, logs: Vec<Log>) -> Self {
        Self {
            batch_id: batch_id.into(),
            logs,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Checks the batch id, that the batch is not empty and that every log is valid.
    pub fn validate(&self) -> Result<(), SenderError> {
        let invalid = |reason: String| SenderError::InvalidContainer {
            batch_id: self.batch_id.clone(),
            reason,
        };

        if self.batch_id.trim().is_empty() {
            return Err(invalid("batch id is empty".to_string()));
        }
        if self.logs.is_empty() {
            return Err(invalid("container holds no logs".to_string()));
        }
        for (index, log) in self.logs.iter().enumerate() {
            log.validate()
                .map_err(|reason| invalid(format!("log #{index}: {reason}")))?;
        }
        Ok(())
    }

    /// Serializes the container into a request body, compressing it with zstd
    /// when a level is given.
    pub fn encode(&self, compression_level: Option<i32>) -> Result<Bytes, SenderError> {
        let serialization = |reason: String| SenderError::Serialization {
            batch_id: self.batch_id.clone(),
            reason,
        };

        let json = serde_json::to_vec(self).map_err(|e| serialization(e.to_string()))?;
        match compression_level {
            None => Ok(Bytes::from(json)),
            Some(level) => zstd::bulk::compress(&json, level)
                .map(Bytes::from)
                .map_err(|e| serialization(e.to_string())),
        }
    }
}
