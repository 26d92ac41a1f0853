// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Waiting out backend lag.
//!
//! Episode listings for a series that was just added or just changed can come
//! back empty or stale for a few seconds. Two tools here:
//!
//! - [`fetch_episodes_with_retry`]: retry one listing with increasing waits
//!   while it errors or comes back empty.
//! - [`schedule_recheck`] then [`PendingRecheck::recheck`]: the two-phase
//!   "is anything still monitored" check run after unmonitoring. Splitting the
//!   wait from the check lets tests drive it with an instant sleeper.

use std::future::Future;
use std::time::Duration;

use super::strategy::has_remaining_monitored_content;
use crate::backends::models::Episode;
use crate::clock::Sleeper;
use crate::errors::{ApiError, ApiResult};

/// Retry tuning for episode listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingRetry {
    /// Total fetches, first included.
    pub attempts: u32,
    /// Wait before retry `n` is `base_delay * n`.
    pub base_delay: Duration,
}

impl Default for ListingRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// Fetch an episode listing, retrying while it errors or is empty.
///
/// Returns the last error if every attempt errored, or an empty list if the
/// last attempt succeeded with nothing in it.
pub async fn fetch_episodes_with_retry<F, Fut>(
    sleeper: &dyn Sleeper,
    retry: ListingRetry,
    mut fetch: F,
) -> ApiResult<Vec<Episode>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<Vec<Episode>>>,
{
    let attempts = retry.attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = fetch().await;
        let done = matches!(&result, Ok(episodes) if !episodes.is_empty());
        if done || attempt >= attempts {
            return result;
        }
        sleeper.sleep(retry.base_delay * attempt).await;
        attempt += 1;
    }
}

/// What the re-check found for one season.
#[derive(Debug, Clone, PartialEq)]
pub enum SeasonContent {
    /// At least one episode is still monitored.
    Monitored,
    /// No monitored episodes, or no episodes at all after retries.
    Empty,
    /// The listing kept failing; treated as still having content.
    Unknown(ApiError),
}

/// Result of a re-check across seasons.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecheckReport {
    pub seasons: Vec<(u32, SeasonContent)>,
}

impl RecheckReport {
    /// Anything left that should keep the series alive.
    ///
    /// Seasons that could not be read count as remaining, so a flaky backend
    /// never causes a deletion.
    pub fn has_remaining_content(&self) -> bool {
        self.seasons
            .iter()
            .any(|(_, content)| !matches!(content, SeasonContent::Empty))
    }

    /// Seasons whose listing kept failing.
    pub fn unreadable(&self) -> impl Iterator<Item = (u32, &ApiError)> {
        self.seasons.iter().filter_map(|(season, content)| match content {
            SeasonContent::Unknown(err) => Some((*season, err)),
            _ => None,
        })
    }
}

/// A re-check waiting to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a scheduled re-check does nothing until `recheck` is awaited"]
pub struct PendingRecheck {
    after: Duration,
    retry: ListingRetry,
}

/// Phase one: decide how long to wait before re-checking.
pub fn schedule_recheck(after: Duration) -> PendingRecheck {
    PendingRecheck {
        after,
        retry: ListingRetry::default(),
    }
}

impl PendingRecheck {
    pub fn with_retry(mut self, retry: ListingRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn delay(&self) -> Duration {
        self.after
    }

    /// Phase two: wait, then check each season in turn.
    ///
    /// Each season's listing is retried on its own; one slow season does not
    /// restart the whole check.
    pub async fn recheck<F, Fut>(self, sleeper: &dyn Sleeper, seasons: &[u32], mut fetch_season: F) -> RecheckReport
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ApiResult<Vec<Episode>>>,
    {
        sleeper.sleep(self.after).await;

        let mut report = RecheckReport::default();
        for &season in seasons {
            let listing = fetch_episodes_with_retry(sleeper, self.retry, || fetch_season(season)).await;
            let content = match listing {
                Ok(episodes) if has_remaining_monitored_content(&episodes) => SeasonContent::Monitored,
                Ok(_) => SeasonContent::Empty,
                Err(err) => SeasonContent::Unknown(err),
            };
            report.seasons.push((season, content));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::InstantSleeper;
    use crate::errors::ApiErrorKind;
    use std::cell::Cell;

    fn episode(season: u32, monitored: bool) -> Episode {
        Episode {
            id: 1,
            series_id: 1,
            season_number: season,
            episode_number: 1,
            title: None,
            monitored,
            has_file: false,
            episode_file_id: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_retries_empty_with_increasing_waits() {
        let sleeper = InstantSleeper::new();
        let calls = Cell::new(0);

        let result = fetch_episodes_with_retry(&sleeper, ListingRetry::default(), || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Ok(Vec::new())
                } else {
                    Ok(vec![episode(1, true)])
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(calls.get(), 3);
        assert_eq!(
            sleeper.requested(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn test_fetch_returns_last_error() {
        let sleeper = InstantSleeper::new();
        let result = fetch_episodes_with_retry(&sleeper, ListingRetry::default(), || async {
            Err(ApiError::new(ApiErrorKind::ServiceUnavailable { status: 503 }))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(sleeper.requested().len(), 2);
    }

    #[tokio::test]
    async fn test_recheck_waits_then_classifies() {
        let sleeper = InstantSleeper::new();
        let report = schedule_recheck(Duration::from_secs(5))
            .recheck(&sleeper, &[1, 2, 3], |season| async move {
                match season {
                    1 => Ok(vec![episode(1, false)]),
                    2 => Ok(vec![]),
                    _ => Err(ApiError::new(ApiErrorKind::Network {
                        code: crate::errors::NetworkCode::Timeout,
                    })),
                }
            })
            .await;

        assert_eq!(sleeper.requested()[0], Duration::from_secs(5));
        assert_eq!(report.seasons[0], (1, SeasonContent::Empty));
        assert_eq!(report.seasons[1], (2, SeasonContent::Empty));
        assert!(matches!(report.seasons[2].1, SeasonContent::Unknown(_)));
        // The unreadable season keeps the series alive
        assert!(report.has_remaining_content());
        assert_eq!(report.unreadable().count(), 1);
    }

    #[tokio::test]
    async fn test_recheck_all_empty() {
        let sleeper = InstantSleeper::new();
        let report = schedule_recheck(Duration::from_secs(1))
            .recheck(&sleeper, &[1], |_| async { Ok(vec![episode(0, true), episode(1, false)]) })
            .await;
        assert!(!report.has_remaining_content());
    }
}
