// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-client circuit breaker.
//!
//! # State Machine
//!
//! ```text
//! Closed   --[failure_threshold consecutive outage failures]--> Open
//! Open     --[open_duration elapsed, next call]---------------> HalfOpen
//! HalfOpen --[probe succeeds]----------------------------------> Closed
//! HalfOpen --[probe fails]-------------------------------------> Open (reset timer)
//! ```
//!
//! Only failures that say something about upstream health count (see
//! [`ApiErrorKind::indicates_outage`]). An authentication or validation
//! failure means the backend answered, so it resets the failure streak like a
//! success does.
//!
//! Time is passed in explicitly by the `*_at` methods so transitions can be
//! tested without sleeping.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::BreakerConfig;
use crate::errors::ApiErrorKind;
use crate::locks::resilient_lock;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls go through.
    Closed,
    /// Calls fail fast.
    Open,
    /// One probe call is in flight to test recovery.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Why a call was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpen {
    /// Time left until a probe will be allowed.
    pub retry_in: Duration,
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        resilient_lock(&self.inner).state
    }

    pub fn consecutive_failures(&self) -> u32 {
        resilient_lock(&self.inner).consecutive_failures
    }

    /// Ask permission for a call.
    ///
    /// The returned permit must be settled with [`CallPermit::success`] or
    /// [`CallPermit::failure`]. A half-open probe permit dropped unsettled
    /// (cancelled call, request never built) frees the probe slot so the next
    /// call can try instead.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CircuitOpen> {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> Result<CallPermit<'_>, CircuitOpen> {
        let mut inner = resilient_lock(&self.inner);
        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false)),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.config.open_duration {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::info!(target: "arrgate::circuit", "Circuit half-open, allowing probe");
                    Ok(CallPermit::new(self, true))
                } else {
                    Err(CircuitOpen {
                        retry_in: self.config.open_duration - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CircuitOpen {
                        retry_in: Duration::ZERO,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(CallPermit::new(self, true))
                }
            }
        }
    }

    /// Give back an unsettled probe slot. The circuit stays half-open.
    fn release_probe(&self) {
        let mut inner = resilient_lock(&self.inner);
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            inner.probe_in_flight = false;
            tracing::debug!(target: "arrgate::circuit", "Probe abandoned, slot released");
        }
    }

    /// Record a call that got an answer from upstream.
    pub fn record_success(&self) {
        let mut inner = resilient_lock(&self.inner);
        if inner.state != CircuitState::Closed {
            tracing::info!(target: "arrgate::circuit", "Circuit closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    /// Record a terminal failure of the given kind.
    pub fn record_failure(&self, kind: &ApiErrorKind) {
        self.record_failure_at(kind, Instant::now());
    }

    pub fn record_failure_at(&self, kind: &ApiErrorKind, now: Instant) {
        if !kind.indicates_outage() {
            self.record_success();
            return;
        }

        let mut inner = resilient_lock(&self.inner);
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.probe_in_flight = false;

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            tracing::warn!(
                target: "arrgate::circuit",
                failures = inner.consecutive_failures,
                open_secs = self.config.open_duration.as_secs(),
                "Circuit opened"
            );
        }
    }
}

/// Permission for one call, handed out by [`CircuitBreaker::try_acquire`].
#[must_use = "settle the permit with success() or failure()"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// Whether this call is the half-open recovery probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(self, kind: &ApiErrorKind) {
        self.failure_at(kind, Instant::now());
    }

    pub fn failure_at(mut self, kind: &ApiErrorKind, now: Instant) {
        self.settled = true;
        self.breaker.record_failure_at(kind, now);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.release_probe();
        }
    }
}
