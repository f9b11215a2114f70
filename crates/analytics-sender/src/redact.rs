// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Masking of credentials before they are displayed or logged.

use crate::constants::{SECRET_HEADERS, SECRET_MASK_CHAR, SECRET_VISIBLE_CHARS};
use reqwest::header::HeaderMap;
use std::fmt;

/// Masks a secret so only its last [`SECRET_VISIBLE_CHARS`] characters stay readable.
///
/// Secrets no longer than the visible window are masked entirely. The output
/// always has as many characters as the input.
///
/// # Examples
///
/// ```
/// use analytics_sender::redact::hide_secret;
///
/// assert_eq!(hide_secret("abc"), "***");
/// assert_eq!(hide_secret("0123456789"), "**23456789");
/// ```
#[must_use]
pub fn hide_secret(secret: &str) -> String {
    let len = secret.chars().count();
    if len <= SECRET_VISIBLE_CHARS {
        return SECRET_MASK_CHAR.to_string().repeat(len);
    }

    let hidden = len - SECRET_VISIBLE_CHARS;
    secret
        .chars()
        .enumerate()
        .map(|(i, ch)| if i < hidden { SECRET_MASK_CHAR } else { ch })
        .collect()
}

/// Display adapter for a header map with secret-bearing headers masked.
pub struct RedactedHeaders<'a>(pub &'a HeaderMap);

impl fmt::Display for RedactedHeaders<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.0 {
            if !first {
                write!(f, ", ")?;
            }
            first = false;

            let value = value.to_str().unwrap_or("<binary>");
            let is_secret = SECRET_HEADERS
                .iter()
                .any(|secret| name.as_str().eq_ignore_ascii_case(secret));
            if is_secret {
                write!(f, "{}: {}", name, hide_secret(value))?;
            } else {
                write!(f, "{}: {}", name, value)?;
            }
        }
        Ok(())
    }
}
