// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Monitoring orchestration.
//!
//! Turns coarse intents ("get this show", "stop downloading these episodes",
//! "add this movie") into ordered backend calls. The orchestrators only see
//! the typed [`SeriesOperations`] / [`MovieOperations`] traits, never HTTP.
//!
//! Both flows are best-effort. Failures that leave the requested state
//! undeterminable (no such series, no quality profile configured, invalid
//! selection, deadline hit) end the call with `success = false`. Anything
//! after the main state change (a search that didn't trigger, one season's
//! episodes that never showed up) becomes a warning on a successful outcome.

pub mod movie;
pub mod recheck;
pub mod selection;
pub mod series;
pub mod strategy;

pub use movie::{AddMovieRequest, MovieOperations, MovieOrchestrator, MovieOutcome, RemoveMovieRequest};
pub use selection::{validate_selection, EpisodeSelection, SeasonSelection, SelectionError, SelectionErrors};
pub use series::{MonitorRequest, SeriesOperations, SeriesOrchestrator, UnmonitorRequest};
pub use strategy::{determine_monitoring_strategy, has_remaining_monitored_content};

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::backends::models::{QualityProfile, RootFolder};
use crate::errors::ApiError;
use crate::utils::OperationContext;
use recheck::ListingRetry;

/// What the orchestrator did, one entry per effective change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Monitored,
    Unmonitored,
    UnmonitoredSeason,
    DeletedSeries,
    DeletedFiles,
}

/// Audit-trail entry. Records what actually happened, not what was asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoringChange {
    /// `None` for series-wide changes.
    pub season: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episodes: Option<Vec<u32>>,
    pub action: ChangeAction,
}

impl MonitoringChange {
    pub fn season(season: u32, episodes: Option<Vec<u32>>, action: ChangeAction) -> Self {
        Self {
            season: Some(season),
            episodes,
            action,
        }
    }

    pub fn series(action: ChangeAction) -> Self {
        Self {
            season: None,
            episodes: None,
            action,
        }
    }
}

/// Result of one series orchestration call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitoringOutcome {
    pub success: bool,
    pub series_id: Option<u64>,
    pub title: Option<String>,
    pub changes: Vec<MonitoringChange>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub series_added: bool,
    pub series_deleted: bool,
    pub search_triggered: bool,
    pub command_id: Option<u64>,
}

impl MonitoringOutcome {
    pub fn has_change(&self, action: ChangeAction) -> bool {
        self.changes.iter().any(|c| c.action == action)
    }

    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Failures that end an orchestration call.
#[derive(Debug, Clone, Error)]
pub enum OrchestrationError {
    #[error("{0}")]
    InvalidSelection(#[from] SelectionErrors),

    #[error("{resource} {id} was not found")]
    NotFound { resource: &'static str, id: u64 },

    #[error("no quality profiles are configured on the {0}")]
    NoQualityProfile(&'static str),

    #[error("no root folders are configured on the {0}")]
    NoRootFolder(&'static str),

    #[error("operation did not finish within its deadline")]
    DeadlineExceeded,

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl OrchestrationError {
    /// Message for the end user. API errors use their kind-derived text.
    pub fn user_message(&self) -> String {
        match self {
            OrchestrationError::Api(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

/// Waits used by both orchestrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Retries for episode listings of a series that was just added.
    pub episode_retry: ListingRetry,
    /// Pause before the post-unmonitor emptiness check.
    pub recheck_delay: Duration,
    /// Retries per season during that check.
    pub recheck_retry: ListingRetry,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            episode_retry: ListingRetry::default(),
            recheck_delay: Duration::from_secs(3),
            recheck_retry: ListingRetry::default(),
        }
    }
}

/// Run `work` under the context's deadline, if it has one.
pub(crate) async fn with_deadline<F>(ctx: &OperationContext, work: F) -> Result<(), OrchestrationError>
where
    F: Future<Output = Result<(), OrchestrationError>>,
{
    match ctx.deadline {
        None => work.await,
        Some(deadline) => tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), work)
            .await
            .unwrap_or(Err(OrchestrationError::DeadlineExceeded)),
    }
}

/// The requested profile, or the first one the backend has.
pub(crate) fn pick_quality_profile(
    requested: Option<u32>,
    profiles: &[QualityProfile],
    backend: &'static str,
) -> Result<u32, OrchestrationError> {
    if let Some(id) = requested {
        return Ok(id);
    }
    profiles
        .first()
        .map(|p| p.id)
        .ok_or(OrchestrationError::NoQualityProfile(backend))
}

/// The requested root folder, or the first one the backend has.
pub(crate) fn pick_root_folder(
    requested: Option<&str>,
    folders: &[RootFolder],
    backend: &'static str,
) -> Result<String, OrchestrationError> {
    if let Some(path) = requested {
        return Ok(path.to_string());
    }
    folders
        .first()
        .map(|f| f.path.clone())
        .ok_or(OrchestrationError::NoRootFolder(backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_defaults() {
        let profiles = vec![
            QualityProfile { id: 4, name: "HD-1080p".to_string() },
            QualityProfile { id: 6, name: "Any".to_string() },
        ];
        assert_eq!(pick_quality_profile(None, &profiles, "series manager").unwrap(), 4);
        assert_eq!(pick_quality_profile(Some(9), &[], "series manager").unwrap(), 9);
        assert!(matches!(
            pick_quality_profile(None, &[], "series manager"),
            Err(OrchestrationError::NoQualityProfile(_))
        ));

        assert!(matches!(
            pick_root_folder(None, &[], "movie manager"),
            Err(OrchestrationError::NoRootFolder(_))
        ));
        assert_eq!(pick_root_folder(Some("/tv"), &[], "series manager").unwrap(), "/tv");
    }

    #[tokio::test]
    async fn test_deadline_cancels_work() {
        let ctx = OperationContext::with_timeout(Duration::from_millis(10));
        let result = with_deadline(&ctx, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(OrchestrationError::DeadlineExceeded)));
    }

    #[test]
    fn test_change_serialization() {
        let change = MonitoringChange::season(1, None, ChangeAction::UnmonitoredSeason);
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["action"], "unmonitored_season");
        assert!(json.get("episodes").is_none());
    }
}
