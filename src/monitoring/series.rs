// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Series orchestration (episode granular).
//!
//! Monitor-and-download:
//!
//! ```text
//! NotInLibrary -> Added -> EpisodesConfigured -> SearchTriggered
//! ```
//!
//! Unmonitor-and-delete:
//!
//! ```text
//! Present -> DownloadsCancelled -> EpisodesUnmonitored
//!         -> [SeasonAutoUnmonitored] -> [SeriesDeleted]
//! ```
//!
//! Per-season work fans out concurrently. The series-level season list is
//! written back once, after every season has finished.

use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;

use super::recheck::{fetch_episodes_with_retry, schedule_recheck};
use super::selection::{validate_selection, EpisodeSelection, SeasonSelection, SelectionErrors};
use super::strategy::{determine_monitoring_strategy, plan_episode_monitoring, select_target_episodes, SPECIALS_SEASON};
use super::{
    pick_quality_profile, pick_root_folder, with_deadline, ChangeAction, MonitoringChange, MonitoringOutcome,
    OrchestrationError, OrchestratorSettings,
};
use crate::backends::models::{
    AddSeriesOptions, CommandResource, Episode, QualityProfile, QueueItem, RootFolder, Series,
};
use crate::backends::SeriesClient;
use crate::clock::{Sleeper, TokioSleeper};
use crate::errors::{ApiError, ApiErrorKind, ApiResult};
use crate::utils::OperationContext;

const BACKEND_NAME: &str = "series manager";

/// The series manager operations the orchestrator relies on.
#[async_trait]
pub trait SeriesOperations: Send + Sync {
    async fn series_by_tvdb(&self, ctx: &OperationContext, tvdb_id: u64) -> ApiResult<Option<Series>>;
    async fn lookup_by_tvdb(&self, ctx: &OperationContext, tvdb_id: u64) -> ApiResult<Option<Series>>;
    async fn quality_profiles(&self, ctx: &OperationContext) -> ApiResult<Vec<QualityProfile>>;
    async fn root_folders(&self, ctx: &OperationContext) -> ApiResult<Vec<RootFolder>>;
    async fn add_series(&self, ctx: &OperationContext, series: &Series) -> ApiResult<Series>;
    async fn update_series(&self, ctx: &OperationContext, series: &Series) -> ApiResult<Series>;
    async fn delete_series(&self, ctx: &OperationContext, series_id: u64, delete_files: bool) -> ApiResult<()>;
    async fn season_episodes(&self, ctx: &OperationContext, series_id: u64, season: u32) -> ApiResult<Vec<Episode>>;
    async fn set_episodes_monitored(&self, ctx: &OperationContext, episode_ids: &[u64], monitored: bool) -> ApiResult<()>;
    async fn delete_episode_file(&self, ctx: &OperationContext, file_id: u64) -> ApiResult<()>;
    async fn queue_for_series(&self, ctx: &OperationContext, series_id: u64) -> ApiResult<Vec<QueueItem>>;
    async fn remove_queue_item(
        &self,
        ctx: &OperationContext,
        queue_id: u64,
        remove_from_client: bool,
        blocklist: bool,
    ) -> ApiResult<()>;
    async fn search_series(&self, ctx: &OperationContext, series_id: u64) -> ApiResult<CommandResource>;
    async fn search_episodes(&self, ctx: &OperationContext, episode_ids: &[u64]) -> ApiResult<CommandResource>;
}

#[async_trait]
impl SeriesOperations for SeriesClient {
    async fn series_by_tvdb(&self, ctx: &OperationContext, tvdb_id: u64) -> ApiResult<Option<Series>> {
        SeriesClient::series_by_tvdb(self, ctx, tvdb_id).await
    }

    async fn lookup_by_tvdb(&self, ctx: &OperationContext, tvdb_id: u64) -> ApiResult<Option<Series>> {
        SeriesClient::lookup_by_tvdb(self, ctx, tvdb_id).await
    }

    async fn quality_profiles(&self, ctx: &OperationContext) -> ApiResult<Vec<QualityProfile>> {
        SeriesClient::quality_profiles(self, ctx).await
    }

    async fn root_folders(&self, ctx: &OperationContext) -> ApiResult<Vec<RootFolder>> {
        SeriesClient::root_folders(self, ctx).await
    }

    async fn add_series(&self, ctx: &OperationContext, series: &Series) -> ApiResult<Series> {
        SeriesClient::add_series(self, ctx, series).await
    }

    async fn update_series(&self, ctx: &OperationContext, series: &Series) -> ApiResult<Series> {
        SeriesClient::update_series(self, ctx, series).await
    }

    async fn delete_series(&self, ctx: &OperationContext, series_id: u64, delete_files: bool) -> ApiResult<()> {
        SeriesClient::delete_series(self, ctx, series_id, delete_files).await
    }

    async fn season_episodes(&self, ctx: &OperationContext, series_id: u64, season: u32) -> ApiResult<Vec<Episode>> {
        SeriesClient::season_episodes(self, ctx, series_id, season).await
    }

    async fn set_episodes_monitored(&self, ctx: &OperationContext, episode_ids: &[u64], monitored: bool) -> ApiResult<()> {
        SeriesClient::set_episodes_monitored(self, ctx, episode_ids, monitored).await
    }

    async fn delete_episode_file(&self, ctx: &OperationContext, file_id: u64) -> ApiResult<()> {
        SeriesClient::delete_episode_file(self, ctx, file_id).await
    }

    async fn queue_for_series(&self, ctx: &OperationContext, series_id: u64) -> ApiResult<Vec<QueueItem>> {
        SeriesClient::queue_for_series(self, ctx, series_id).await
    }

    async fn remove_queue_item(
        &self,
        ctx: &OperationContext,
        queue_id: u64,
        remove_from_client: bool,
        blocklist: bool,
    ) -> ApiResult<()> {
        SeriesClient::remove_queue_item(self, ctx, queue_id, remove_from_client, blocklist).await
    }

    async fn search_series(&self, ctx: &OperationContext, series_id: u64) -> ApiResult<CommandResource> {
        SeriesClient::search_series(self, ctx, series_id).await
    }

    async fn search_episodes(&self, ctx: &OperationContext, episode_ids: &[u64]) -> ApiResult<CommandResource> {
        SeriesClient::search_episodes(self, ctx, episode_ids).await
    }
}

/// Monitor a series (or part of it) and start downloading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorRequest {
    pub tvdb_id: u64,
    /// `None` means every regular season.
    pub selection: Option<Vec<EpisodeSelection>>,
    pub quality_profile_id: Option<u32>,
    pub root_folder_path: Option<String>,
}

impl MonitorRequest {
    pub fn new(tvdb_id: u64) -> Self {
        Self {
            tvdb_id,
            selection: None,
            quality_profile_id: None,
            root_folder_path: None,
        }
    }

    pub fn with_selection(mut self, selection: Vec<EpisodeSelection>) -> Self {
        self.selection = Some(selection);
        self
    }
}

/// Stop monitoring a series (or part of it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmonitorRequest {
    pub tvdb_id: u64,
    /// `None` deletes the whole series.
    pub selection: Option<Vec<EpisodeSelection>>,
    /// Used if the series ends up deleted because nothing is left monitored.
    pub delete_files: bool,
}

impl UnmonitorRequest {
    pub fn new(tvdb_id: u64) -> Self {
        Self {
            tvdb_id,
            selection: None,
            delete_files: false,
        }
    }

    pub fn with_selection(mut self, selection: Vec<EpisodeSelection>) -> Self {
        self.selection = Some(selection);
        self
    }
}

/// A season whose episodes were configured during a monitor call.
struct SeasonConfigured {
    season: u32,
    episodes: Option<Vec<u32>>,
    wanted_ids: Vec<u64>,
    missing: Vec<u32>,
    /// Whether any episode flag was flipped.
    changed: bool,
}

/// What unmonitoring one selection entry did.
struct SeasonUnmonitored {
    season: u32,
    changes: Vec<MonitoringChange>,
    warnings: Vec<String>,
    emptied: bool,
}

pub struct SeriesOrchestrator {
    ops: Arc<dyn SeriesOperations>,
    sleeper: Arc<dyn Sleeper>,
    settings: OrchestratorSettings,
}

impl SeriesOrchestrator {
    pub fn new(ops: Arc<dyn SeriesOperations>) -> Self {
        Self {
            ops,
            sleeper: Arc::new(TokioSleeper),
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    // =========================================================================
    // MONITOR AND DOWNLOAD
    // =========================================================================

    pub async fn monitor_and_download(&self, ctx: &OperationContext, request: MonitorRequest) -> MonitoringOutcome {
        let mut outcome = MonitoringOutcome::default();
        let result = match validate_optional(request.selection.as_deref()) {
            Err(errors) => Err(errors.into()),
            Ok(selection) => {
                with_deadline(ctx, self.monitor_inner(ctx, &request, selection.as_deref(), &mut outcome)).await
            }
        };
        finish(ctx, "monitor", request.tvdb_id, outcome, result)
    }

    async fn monitor_inner(
        &self,
        ctx: &OperationContext,
        request: &MonitorRequest,
        selection: Option<&[SeasonSelection]>,
        outcome: &mut MonitoringOutcome,
    ) -> Result<(), OrchestrationError> {
        let ops = self.ops.as_ref();
        let existing = ops.series_by_tvdb(ctx, request.tvdb_id).await?;

        if let Some(series) = &existing {
            if selection.is_none() && series.is_fully_monitored() {
                let series_id = series_id_of(series)?;
                outcome.series_id = Some(series_id);
                outcome.title = Some(series.title.clone());
                tracing::info!(
                    correlation_id = %ctx.correlation_id,
                    series_id,
                    "Series already fully monitored, triggering search"
                );
                self.trigger_search(ctx, series_id, None, outcome).await;
                return Ok(());
            }
        }

        let series = match existing {
            Some(mut series) => {
                series.seasons = determine_monitoring_strategy(&series.seasons, selection);
                series.monitored = true;
                ops.update_series(ctx, &series).await?
            }
            None => {
                let mut series = ops
                    .lookup_by_tvdb(ctx, request.tvdb_id)
                    .await?
                    .ok_or(OrchestrationError::NotFound {
                        resource: "series",
                        id: request.tvdb_id,
                    })?;

                let quality_profile_id = match request.quality_profile_id {
                    Some(id) => id,
                    None => pick_quality_profile(None, &ops.quality_profiles(ctx).await?, BACKEND_NAME)?,
                };
                let root_folder_path = match &request.root_folder_path {
                    Some(path) => path.clone(),
                    None => pick_root_folder(None, &ops.root_folders(ctx).await?, BACKEND_NAME)?,
                };

                series.quality_profile_id = Some(quality_profile_id);
                series.root_folder_path = Some(root_folder_path);
                series.seasons = determine_monitoring_strategy(&series.seasons, selection);
                series.monitored = true;
                // Episodes are configured explicitly below, then searched once
                series.add_options = Some(AddSeriesOptions {
                    monitor: "none".to_string(),
                    search_for_missing_episodes: false,
                });

                let added = ops.add_series(ctx, &series).await?;
                outcome.series_added = true;
                tracing::info!(
                    correlation_id = %ctx.correlation_id,
                    tvdb_id = request.tvdb_id,
                    title = %added.title,
                    "Series added"
                );
                added
            }
        };

        let series_id = series_id_of(&series)?;
        outcome.series_id = Some(series_id);
        outcome.title = Some(series.title.clone());

        let targets: Vec<SeasonSelection> = match selection {
            Some(selection) => selection.to_vec(),
            None => series
                .seasons
                .iter()
                .filter(|s| s.season_number != SPECIALS_SEASON)
                .map(|s| SeasonSelection {
                    season: s.season_number,
                    episodes: None,
                })
                .collect(),
        };

        let results = join_all(
            targets
                .iter()
                .map(|target| self.configure_season(ctx, series_id, target)),
        )
        .await;

        let mut search_ids = Vec::new();
        for result in results {
            match result {
                Ok(configured) => {
                    if !configured.missing.is_empty() {
                        outcome.warn(format!(
                            "Season {}: episodes {:?} do not exist",
                            configured.season, configured.missing
                        ));
                    }
                    search_ids.extend(configured.wanted_ids);
                    if configured.changed {
                        outcome.changes.push(MonitoringChange::season(
                            configured.season,
                            configured.episodes,
                            ChangeAction::Monitored,
                        ));
                    } else {
                        tracing::debug!(
                            correlation_id = %ctx.correlation_id,
                            season = configured.season,
                            "Season already monitored as requested"
                        );
                    }
                }
                Err(warning) => outcome.warn(warning),
            }
        }

        if outcome.changes.is_empty() {
            outcome.warn("No monitoring changes were applied, so no search was triggered");
            return Ok(());
        }

        let episodes_only = selection
            .map(|s| s.iter().all(|entry| !entry.is_whole_season()))
            .unwrap_or(false);
        let episode_ids = episodes_only.then_some(search_ids);
        self.trigger_search(ctx, series_id, episode_ids, outcome).await;
        Ok(())
    }

    /// Apply episode-level monitoring for one season.
    async fn configure_season(
        &self,
        ctx: &OperationContext,
        series_id: u64,
        target: &SeasonSelection,
    ) -> Result<SeasonConfigured, String> {
        let season = target.season;
        let episodes = fetch_episodes_with_retry(self.sleeper.as_ref(), self.settings.episode_retry, || {
            self.ops.season_episodes(ctx, series_id, season)
        })
        .await
        .map_err(|e| format!("Season {}: could not list episodes ({})", season, e.user_message()))?;

        if episodes.is_empty() {
            return Err(format!("Season {}: no episodes available yet", season));
        }

        let wanted = target.episodes.as_deref();
        let plan = plan_episode_monitoring(&episodes, wanted);
        let changed = !plan.monitor.is_empty() || !plan.unmonitor.is_empty();
        self.ops
            .set_episodes_monitored(ctx, &plan.monitor, true)
            .await
            .map_err(|e| format!("Season {}: could not monitor episodes ({})", season, e.user_message()))?;
        self.ops
            .set_episodes_monitored(ctx, &plan.unmonitor, false)
            .await
            .map_err(|e| format!("Season {}: could not unmonitor other episodes ({})", season, e.user_message()))?;

        let wanted_ids = select_target_episodes(&episodes, wanted)
            .iter()
            .map(|e| e.id)
            .collect();

        Ok(SeasonConfigured {
            season,
            episodes: target.episodes.clone(),
            wanted_ids,
            missing: plan.missing,
            changed,
        })
    }

    async fn trigger_search(
        &self,
        ctx: &OperationContext,
        series_id: u64,
        episode_ids: Option<Vec<u64>>,
        outcome: &mut MonitoringOutcome,
    ) {
        let result = match episode_ids {
            Some(ids) if !ids.is_empty() => self.ops.search_episodes(ctx, &ids).await,
            _ => self.ops.search_series(ctx, series_id).await,
        };
        match result {
            Ok(command) => {
                outcome.search_triggered = true;
                outcome.command_id = Some(command.id);
            }
            Err(e) => outcome.warn(format!("Search could not be triggered: {}", e.user_message())),
        }
    }

    // =========================================================================
    // UNMONITOR AND DELETE
    // =========================================================================

    pub async fn unmonitor_and_delete(&self, ctx: &OperationContext, request: UnmonitorRequest) -> MonitoringOutcome {
        let mut outcome = MonitoringOutcome::default();
        let result = match validate_optional(request.selection.as_deref()) {
            Err(errors) => Err(errors.into()),
            Ok(selection) => {
                with_deadline(ctx, self.unmonitor_inner(ctx, &request, selection.as_deref(), &mut outcome)).await
            }
        };
        finish(ctx, "unmonitor", request.tvdb_id, outcome, result)
    }

    async fn unmonitor_inner(
        &self,
        ctx: &OperationContext,
        request: &UnmonitorRequest,
        selection: Option<&[SeasonSelection]>,
        outcome: &mut MonitoringOutcome,
    ) -> Result<(), OrchestrationError> {
        let ops = self.ops.as_ref();
        let series = ops
            .series_by_tvdb(ctx, request.tvdb_id)
            .await?
            .ok_or(OrchestrationError::NotFound {
                resource: "series",
                id: request.tvdb_id,
            })?;
        let series_id = series_id_of(&series)?;
        outcome.series_id = Some(series_id);
        outcome.title = Some(series.title.clone());

        let queue = match ops.queue_for_series(ctx, series_id).await {
            Ok(queue) => queue,
            Err(e) => {
                outcome.warn(format!("Could not read the download queue: {}", e.user_message()));
                Vec::new()
            }
        };

        let Some(selection) = selection else {
            for item in &queue {
                if let Err(e) = ops.remove_queue_item(ctx, item.id, true, false).await {
                    outcome.warn(format!("Could not cancel download {}: {}", item.id, e.user_message()));
                }
            }
            ops.delete_series(ctx, series_id, true).await?;
            outcome.changes.push(MonitoringChange::series(ChangeAction::DeletedSeries));
            outcome.series_deleted = true;
            return Ok(());
        };

        let results = join_all(
            selection
                .iter()
                .map(|entry| self.unmonitor_season(ctx, series_id, entry, &queue)),
        )
        .await;

        let mut emptied = Vec::new();
        for result in results {
            outcome.changes.extend(result.changes);
            for warning in result.warnings {
                outcome.warn(warning);
            }
            if result.emptied {
                emptied.push(result.season);
            }
        }

        // One write for every emptied season, so concurrent entries can't clobber each other
        if !emptied.is_empty() {
            let mut updated = series.clone();
            for season in updated.seasons.iter_mut() {
                if emptied.contains(&season.season_number) {
                    season.monitored = false;
                }
            }
            match ops.update_series(ctx, &updated).await {
                Ok(_) => {
                    for season in &emptied {
                        outcome
                            .changes
                            .push(MonitoringChange::season(*season, None, ChangeAction::UnmonitoredSeason));
                    }
                }
                Err(e) => outcome.warn(format!("Could not unmonitor emptied seasons: {}", e.user_message())),
            }
        }

        let seasons: Vec<u32> = series
            .seasons
            .iter()
            .map(|s| s.season_number)
            .filter(|n| *n != SPECIALS_SEASON)
            .collect();
        if seasons.is_empty() {
            return Ok(());
        }

        let report = schedule_recheck(self.settings.recheck_delay)
            .with_retry(self.settings.recheck_retry)
            .recheck(self.sleeper.as_ref(), &seasons, |season| {
                self.ops.season_episodes(ctx, series_id, season)
            })
            .await;

        for (season, err) in report.unreadable() {
            outcome.warn(format!(
                "Season {}: could not confirm monitoring state ({}); series kept",
                season,
                err.user_message()
            ));
        }

        if !report.has_remaining_content() {
            match ops.delete_series(ctx, series_id, request.delete_files).await {
                Ok(()) => {
                    outcome.changes.push(MonitoringChange::series(ChangeAction::DeletedSeries));
                    outcome.series_deleted = true;
                }
                Err(e) => outcome.warn(format!(
                    "Nothing is monitored any more but the series could not be deleted: {}",
                    e.user_message()
                )),
            }
        }

        Ok(())
    }

    /// Cancel, delete files and unmonitor for one selection entry.
    async fn unmonitor_season(
        &self,
        ctx: &OperationContext,
        series_id: u64,
        entry: &SeasonSelection,
        queue: &[QueueItem],
    ) -> SeasonUnmonitored {
        let season = entry.season;
        let mut result = SeasonUnmonitored {
            season,
            changes: Vec::new(),
            warnings: Vec::new(),
            emptied: false,
        };

        let episodes = match fetch_episodes_with_retry(self.sleeper.as_ref(), self.settings.episode_retry, || {
            self.ops.season_episodes(ctx, series_id, season)
        })
        .await
        {
            Ok(episodes) if !episodes.is_empty() => episodes,
            Ok(_) => {
                result.warnings.push(format!("Season {}: no episodes found", season));
                return result;
            }
            Err(e) => {
                result
                    .warnings
                    .push(format!("Season {}: could not list episodes ({})", season, e.user_message()));
                return result;
            }
        };

        let targets = select_target_episodes(&episodes, entry.episodes.as_deref());
        let target_ids: HashSet<u64> = targets.iter().map(|e| e.id).collect();

        for item in queue
            .iter()
            .filter(|item| item.episode_id.is_some_and(|id| target_ids.contains(&id)))
        {
            if let Err(e) = self.ops.remove_queue_item(ctx, item.id, true, false).await {
                result
                    .warnings
                    .push(format!("Could not cancel download {}: {}", item.id, e.user_message()));
            }
        }

        let mut deleted = Vec::new();
        for episode in &targets {
            let Some(file_id) = episode.file_id() else {
                continue;
            };
            match self.ops.delete_episode_file(ctx, file_id).await {
                Ok(()) => deleted.push(episode.episode_number),
                Err(e) => result.warnings.push(format!(
                    "Season {} episode {}: could not delete file ({})",
                    season,
                    episode.episode_number,
                    e.user_message()
                )),
            }
        }
        if !deleted.is_empty() {
            result
                .changes
                .push(MonitoringChange::season(season, Some(deleted), ChangeAction::DeletedFiles));
        }

        let ids: Vec<u64> = targets.iter().map(|e| e.id).collect();
        if let Err(e) = self.ops.set_episodes_monitored(ctx, &ids, false).await {
            result
                .warnings
                .push(format!("Season {}: could not unmonitor episodes ({})", season, e.user_message()));
            return result;
        }
        result
            .changes
            .push(MonitoringChange::season(season, entry.episodes.clone(), ChangeAction::Unmonitored));

        let still_monitored = episodes
            .iter()
            .any(|e| e.monitored && !target_ids.contains(&e.id));
        result.emptied = season != SPECIALS_SEASON && !still_monitored;
        result
    }
}

fn validate_optional(selection: Option<&[EpisodeSelection]>) -> Result<Option<Vec<SeasonSelection>>, SelectionErrors> {
    match selection {
        None => Ok(None),
        Some([]) => Ok(None),
        Some(entries) => validate_selection(entries).map(Some),
    }
}

fn series_id_of(series: &Series) -> Result<u64, OrchestrationError> {
    series.id.ok_or_else(|| {
        OrchestrationError::Api(ApiError::new(ApiErrorKind::MalformedResponse {
            details: format!("series '{}' has no id", series.title),
        }))
    })
}

fn finish(
    ctx: &OperationContext,
    operation: &str,
    tvdb_id: u64,
    mut outcome: MonitoringOutcome,
    result: Result<(), OrchestrationError>,
) -> MonitoringOutcome {
    match result {
        Ok(()) => {
            outcome.success = true;
            tracing::info!(
                correlation_id = %ctx.correlation_id,
                operation,
                tvdb_id,
                changes = outcome.changes.len(),
                warnings = outcome.warnings.len(),
                search_triggered = outcome.search_triggered,
                "Series orchestration finished"
            );
        }
        Err(err) => {
            outcome.success = false;
            tracing::error!(
                correlation_id = %ctx.correlation_id,
                operation,
                tvdb_id,
                changes = outcome.changes.len(),
                error = %err,
                "Series orchestration failed"
            );
            outcome.error = Some(err.user_message());
        }
    }
    outcome
}
