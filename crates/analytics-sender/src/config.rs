// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{
    API_VERSION, API_VERSION_KEY, DEFAULT_API_PATH, DEFAULT_BASE_URL, DEFAULT_RETRY_INTERVALS,
    DEFAULT_TIMEOUT,
};
use crate::error::SenderError;
use crate::redact::hide_secret;
use crate::retry::RetryPolicy;
use reqwest::Url;
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::time::Duration;

/// Configuration for the log sender.
#[derive(Clone)]
pub struct SenderConfig {
    /// Ingestion host, e.g. `https://in.mobile.azure.com`
    pub base_url: String,
    /// Path appended to the base URL for log uploads
    pub api_path: String,
    /// Application secret sent with every request
    pub app_secret: String,
    /// Installation identifier sent with every request
    pub install_id: String,
    /// Extra static headers
    pub headers: BTreeMap<String, String>,
    /// Query parameters appended to the upload URL
    pub query_params: BTreeMap<String, String>,
    /// Delay before each successive retry of a failed batch
    pub retry_intervals: Vec<Duration>,
    /// Randomize retry delays within the upper half of each interval
    pub retry_jitter: bool,
    /// Per-request timeout
    pub timeout: Duration,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// zstd level used to compress request bodies; `None` sends plain JSON
    pub compression_level: Option<i32>,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for SenderConfig {
    fn default() -> Self {
        let mut query_params = BTreeMap::new();
        query_params.insert(API_VERSION_KEY.to_string(), API_VERSION.to_string());

        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_path: DEFAULT_API_PATH.to_string(),
            app_secret: String::new(),
            install_id: String::new(),
            headers: BTreeMap::new(),
            query_params,
            retry_intervals: DEFAULT_RETRY_INTERVALS.to_vec(),
            retry_jitter: false,
            timeout: DEFAULT_TIMEOUT,
            https_proxy: None,
            compression_level: None,
            log_level: "info".to_string(),
        }
    }
}

impl SenderConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, SenderError> {
        let defaults = Self::default();

        let base_url = env::var("INGESTION_URL").unwrap_or(defaults.base_url);
        let app_secret = env::var("INGESTION_APP_SECRET").unwrap_or_default();
        let install_id = env::var("INGESTION_INSTALL_ID").unwrap_or_default();
        let retry_intervals = match env::var("INGESTION_RETRY_INTERVALS") {
            Ok(val) => parse_retry_intervals(&val)?,
            Err(_) => defaults.retry_intervals,
        };
        let retry_jitter = env::var("INGESTION_RETRY_JITTER")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);
        let timeout = env::var("INGESTION_TIMEOUT")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);
        let https_proxy = env::var("INGESTION_PROXY_HTTPS")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();
        let compression_level = env::var("INGESTION_COMPRESSION_LEVEL")
            .ok()
            .and_then(|val| val.parse::<i32>().ok());
        let log_level = env::var("INGESTION_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            base_url,
            app_secret,
            install_id,
            retry_intervals,
            retry_jitter,
            timeout,
            https_proxy,
            compression_level,
            log_level,
            ..Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SenderError> {
        self.upload_url()?;

        if self.timeout.is_zero() {
            return Err(SenderError::InvalidConfig(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if let Some(level) = self.compression_level {
            if !(1..=22).contains(&level) {
                return Err(SenderError::InvalidConfig(format!(
                    "Invalid compression level {level}. Must be between 1 and 22"
                )));
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(SenderError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Full upload URL including the API path and query parameters.
    pub fn upload_url(&self) -> Result<Url, SenderError> {
        upload_url(&self.base_url, &self.api_path, &self.query_params)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_intervals.clone()).with_jitter(self.retry_jitter)
    }
}

pub(crate) fn upload_url(
    base_url: &str,
    api_path: &str,
    query_params: &BTreeMap<String, String>,
) -> Result<Url, SenderError> {
    let raw = format!("{}{}", base_url.trim_end_matches('/'), api_path);
    let mut url = Url::parse(&raw)
        .map_err(|e| SenderError::InvalidConfig(format!("Invalid ingestion URL '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SenderError::InvalidConfig(format!(
            "Ingestion URL must use http or https, got '{}'",
            url.scheme()
        )));
    }
    if !query_params.is_empty() {
        url.query_pairs_mut().extend_pairs(query_params.iter());
    }
    Ok(url)
}

fn parse_retry_intervals(raw: &str) -> Result<Vec<Duration>, SenderError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                SenderError::InvalidConfig(format!(
                    "Invalid retry interval '{part}'. Expected whole seconds"
                ))
            })
        })
        .collect()
}

impl fmt::Debug for SenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderConfig")
            .field("base_url", &self.base_url)
            .field("api_path", &self.api_path)
            .field("app_secret", &hide_secret(&self.app_secret))
            .field("install_id", &self.install_id)
            .field("headers", &self.headers)
            .field("query_params", &self.query_params)
            .field("retry_intervals", &self.retry_intervals)
            .field("retry_jitter", &self.retry_jitter)
            .field("timeout", &self.timeout)
            .field("https_proxy", &self.https_proxy)
            .field("compression_level", &self.compression_level)
            .field("log_level", &self.log_level)
            .finish()
    }
}
