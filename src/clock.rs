// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Suspension points.
//!
//! Every intentional wait (retry backoff, episode-availability retries, the
//! pre-recheck pause) goes through a [`Sleeper`] so tests can run them
//! instantly and assert on what was requested.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use crate::locks::resilient_lock;

/// Something that can wait.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real waits on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and records every requested duration.
#[derive(Debug, Default)]
pub struct InstantSleeper {
    requested: Mutex<Vec<Duration>>,
}

impl InstantSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every duration requested so far, in order.
    pub fn requested(&self) -> Vec<Duration> {
        resilient_lock(&self.requested).clone()
    }

    /// Sum of all requested durations.
    pub fn total(&self) -> Duration {
        resilient_lock(&self.requested).iter().sum()
    }
}

#[async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, duration: Duration) {
        resilient_lock(&self.requested).push(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_instant_sleeper_records() {
        let sleeper = InstantSleeper::new();
        sleeper.sleep(Duration::from_secs(5)).await;
        sleeper.sleep(Duration::from_secs(10)).await;

        assert_eq!(
            sleeper.requested(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
        assert_eq!(sleeper.total(), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_tokio_sleeper_waits() {
        let start = std::time::Instant::now();
        TokioSleeper.sleep(Duration::from_millis(10)).await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
