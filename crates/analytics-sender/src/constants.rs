// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://in.mobile.azure.com";
pub const DEFAULT_API_PATH: &str = "/logs";

pub const API_VERSION_KEY: &str = "api-version";
pub const API_VERSION: &str = "1.0.0-preview20160914";

pub const APP_SECRET_HEADER: &str = "App-Secret";
pub const INSTALL_ID_HEADER: &str = "Install-ID";

/// Headers whose values are masked whenever they are displayed.
pub const SECRET_HEADERS: &[&str] = &[APP_SECRET_HEADER];

/// Delays before the first, second and third retry of a batch.
pub const DEFAULT_RETRY_INTERVALS: [Duration; 3] = [
    Duration::from_secs(10),
    Duration::from_secs(5 * 60),
    Duration::from_secs(20 * 60),
];

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Trailing characters of a secret left visible by redaction.
pub const SECRET_VISIBLE_CHARS: usize = 8;
pub const SECRET_MASK_CHAR: char = '*';
