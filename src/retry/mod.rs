// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Retry policy with exponential backoff.
//!
//! The decision is a pure function of `(attempt, error kind, policy, jitter
//! sample)`. The executor owns the loop and any logging; this module only
//! answers "retry?" and "after how long?".
//!
//! Delay for attempt `n` (1-based, counting the attempt that just failed):
//!
//! ```text
//! base  = kind default delay (5s for HTTP 500, 15s for 503, ...)
//! delay = min(base * multiplier^(n-1), max_backoff)
//! delay = delay + delay * jitter_ratio * sample        sample in [0, 1)
//! ```
//!
//! A rate-limit error carrying `Retry-After` skips all of that and waits
//! exactly the upstream value.

use rand::Rng;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::errors::ApiErrorKind;

/// Whether to retry, and how long to wait first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub fn stop() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
        }
    }

    pub fn after(delay: Duration) -> Self {
        Self {
            should_retry: true,
            delay,
        }
    }
}

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts allowed, first try included.
    pub max_attempts: u32,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    /// Jitter as a fraction of the computed delay.
    pub jitter_ratio: f64,
}

/// A not-found error is retried at most once: the resource may be in flight.
const NOT_FOUND_MAX_ATTEMPTS: u32 = 2;

impl RetryPolicy {
    /// Create a policy from a client's configuration.
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            backoff_multiplier: config.backoff_multiplier,
            max_backoff: config.max_backoff,
            jitter_ratio: config.jitter_ratio,
        }
    }

    /// Same policy with a different attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Decide after `attempt` failed attempts, drawing a random jitter sample.
    pub fn decide(&self, attempt: u32, kind: &ApiErrorKind) -> RetryDecision {
        let sample = rand::thread_rng().gen::<f64>();
        self.decide_with_jitter(attempt, kind, sample)
    }

    /// Deterministic decision given an explicit jitter sample in `[0, 1)`.
    pub fn decide_with_jitter(&self, attempt: u32, kind: &ApiErrorKind, sample: f64) -> RetryDecision {
        if attempt >= self.max_attempts || !kind.is_retryable() {
            return RetryDecision::stop();
        }
        if matches!(kind, ApiErrorKind::NotFound { .. }) && attempt >= NOT_FOUND_MAX_ATTEMPTS {
            return RetryDecision::stop();
        }

        if let ApiErrorKind::RateLimit {
            retry_after: Some(retry_after),
        } = kind
        {
            return RetryDecision::after(*retry_after);
        }

        let Some(base) = kind.retry_delay() else {
            return RetryDecision::stop();
        };

        RetryDecision::after(self.backoff(base, attempt, sample))
    }

    /// Exponential delay for `attempt` starting from `base`, capped and jittered.
    pub fn backoff(&self, base: Duration, attempt: u32, sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let raw = base.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_backoff.as_secs_f64());
        let jitter = capped * self.jitter_ratio * sample.clamp(0.0, 1.0);
        Duration::from_secs_f64(capped + jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
            jitter_ratio: 0.1,
        }
    }
}
