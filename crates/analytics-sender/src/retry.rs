// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry schedule for batches that failed with a recoverable error.

use crate::constants::DEFAULT_RETRY_INTERVALS;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Maps an attempt index to the delay before the next retry.
///
/// The schedule is a fixed, ordered list of intervals. Attempt `n` (0-indexed)
/// waits `intervals[n]`; once `n` reaches the end of the list the policy is
/// exhausted. An empty schedule never retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    intervals: Arc<[Duration]>,
    jitter: bool,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(intervals: impl Into<Vec<Duration>>) -> Self {
        Self {
            intervals: intervals.into().into(),
            jitter: false,
        }
    }

    /// A policy that treats every failure as exhausted.
    #[must_use]
    pub fn never() -> Self {
        Self::new(Vec::new())
    }

    /// Draw each delay uniformly from `[interval / 2, interval]`.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt`, or `None` when the schedule is exhausted.
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Option<Duration> {
        let interval = *self.intervals.get(attempt)?;
        if !self.jitter || interval.is_zero() {
            return Some(interval);
        }

        let half = interval / 2;
        let spread = (interval - half).as_millis() as u64;
        let offset = rand::rng().random_range(0..=spread);
        Some(half + Duration::from_millis(offset))
    }

    #[must_use]
    pub fn max_retries(&self) -> usize {
        self.intervals.len()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_INTERVALS.to_vec())
    }
}
