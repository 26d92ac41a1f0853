// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Series manager client (`/api/v3`).

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::models::{
    CommandResource, Episode, QualityProfile, QueueItem, RootFolder, Series, SystemStatus,
};
use super::{fetch_queue, validate_search_term, BackendClient, Capabilities, ClientCore};
use crate::auth::AuthStrategy;
use crate::config::ClientConfig;
use crate::errors::{ApiError, ApiResult};
use crate::health::HealthStatus;
use crate::http::{ApiRequest, RequestExecutor};
use crate::types::BackendKind;
use crate::utils::OperationContext;
use crate::version::ApiVersionResult;

pub struct SeriesClient {
    core: ClientCore,
}

impl SeriesClient {
    pub fn new(config: ClientConfig, auth: AuthStrategy) -> ApiResult<Self> {
        Ok(Self {
            core: ClientCore::new(config, auth)?,
        })
    }

    pub fn with_executor(config: ClientConfig, executor: RequestExecutor) -> Self {
        Self {
            core: ClientCore::with_executor(config, executor),
        }
    }

    fn exec(&self) -> &RequestExecutor {
        self.core.executor()
    }

    fn validation(&self, details: &str) -> ApiError {
        ApiError::validation(details).with_backend(BackendKind::SeriesManager)
    }

    // -------------------------------------------------------------------------
    // Lookup and library
    // -------------------------------------------------------------------------

    /// Free-text lookup against the series manager's metadata source.
    pub async fn lookup(&self, ctx: &OperationContext, term: &str) -> ApiResult<Vec<Series>> {
        let term = validate_search_term(term).map_err(|e| e.with_backend(BackendKind::SeriesManager))?;
        self.exec()
            .execute(ctx, ApiRequest::get("/api/v3/series/lookup").with_query("term", term))
            .await
    }

    /// Exact-match lookup by TVDB id.
    pub async fn lookup_by_tvdb(&self, ctx: &OperationContext, tvdb_id: u64) -> ApiResult<Option<Series>> {
        let results: Vec<Series> = self
            .exec()
            .execute(
                ctx,
                ApiRequest::get("/api/v3/series/lookup").with_query("term", format!("tvdb:{}", tvdb_id)),
            )
            .await?;
        Ok(results.into_iter().find(|s| s.tvdb_id == tvdb_id))
    }

    pub async fn list_series(&self, ctx: &OperationContext) -> ApiResult<Vec<Series>> {
        self.exec().execute(ctx, ApiRequest::get("/api/v3/series")).await
    }

    pub async fn get_series(&self, ctx: &OperationContext, id: u64) -> ApiResult<Series> {
        self.exec()
            .execute(ctx, ApiRequest::get(format!("/api/v3/series/{}", id)))
            .await
    }

    /// The library entry for a TVDB id, if the series has been added.
    pub async fn series_by_tvdb(&self, ctx: &OperationContext, tvdb_id: u64) -> ApiResult<Option<Series>> {
        let results: Vec<Series> = self
            .exec()
            .execute(ctx, ApiRequest::get("/api/v3/series").with_query("tvdbId", tvdb_id))
            .await?;
        Ok(results.into_iter().find(|s| s.tvdb_id == tvdb_id))
    }

    pub async fn add_series(&self, ctx: &OperationContext, series: &Series) -> ApiResult<Series> {
        let body = serde_json::to_value(series).map_err(|e| self.validation(&e.to_string()))?;
        self.exec()
            .execute(ctx, ApiRequest::post("/api/v3/series", body))
            .await
    }

    pub async fn update_series(&self, ctx: &OperationContext, series: &Series) -> ApiResult<Series> {
        let id = series
            .id
            .ok_or_else(|| self.validation("cannot update a series without an id"))?;
        let body = serde_json::to_value(series).map_err(|e| self.validation(&e.to_string()))?;
        self.exec()
            .execute(ctx, ApiRequest::put(format!("/api/v3/series/{}", id), body))
            .await
    }

    pub async fn delete_series(&self, ctx: &OperationContext, id: u64, delete_files: bool) -> ApiResult<()> {
        self.exec()
            .execute_empty(
                ctx,
                ApiRequest::delete(format!("/api/v3/series/{}", id))
                    .with_query("deleteFiles", delete_files)
                    .with_query("addImportListExclusion", false),
            )
            .await
    }

    // -------------------------------------------------------------------------
    // Episodes
    // -------------------------------------------------------------------------

    pub async fn episodes(&self, ctx: &OperationContext, series_id: u64) -> ApiResult<Vec<Episode>> {
        self.exec()
            .execute(ctx, ApiRequest::get("/api/v3/episode").with_query("seriesId", series_id))
            .await
    }

    pub async fn season_episodes(
        &self,
        ctx: &OperationContext,
        series_id: u64,
        season: u32,
    ) -> ApiResult<Vec<Episode>> {
        self.exec()
            .execute(
                ctx,
                ApiRequest::get("/api/v3/episode")
                    .with_query("seriesId", series_id)
                    .with_query("seasonNumber", season),
            )
            .await
    }

    /// Set the monitored flag on many episodes in one call.
    pub async fn set_episodes_monitored(
        &self,
        ctx: &OperationContext,
        episode_ids: &[u64],
        monitored: bool,
    ) -> ApiResult<()> {
        if episode_ids.is_empty() {
            return Ok(());
        }
        let body = json!({ "episodeIds": episode_ids, "monitored": monitored });
        self.exec()
            .execute_empty(ctx, ApiRequest::put("/api/v3/episode/monitor", body))
            .await
    }

    pub async fn delete_episode_file(&self, ctx: &OperationContext, file_id: u64) -> ApiResult<()> {
        self.exec()
            .execute_empty(ctx, ApiRequest::delete(format!("/api/v3/episodefile/{}", file_id)))
            .await
    }

    // -------------------------------------------------------------------------
    // Queue
    // -------------------------------------------------------------------------

    pub async fn queue(&self, ctx: &OperationContext) -> ApiResult<Vec<QueueItem>> {
        fetch_queue(self.exec(), ctx).await
    }

    pub async fn queue_for_series(&self, ctx: &OperationContext, series_id: u64) -> ApiResult<Vec<QueueItem>> {
        let items = self.queue(ctx).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.series_id == Some(series_id))
            .collect())
    }

    pub async fn remove_queue_item(
        &self,
        ctx: &OperationContext,
        id: u64,
        remove_from_client: bool,
        blocklist: bool,
    ) -> ApiResult<()> {
        self.exec()
            .execute_empty(
                ctx,
                ApiRequest::delete(format!("/api/v3/queue/{}", id))
                    .with_query("removeFromClient", remove_from_client)
                    .with_query("blocklist", blocklist),
            )
            .await
    }

    // -------------------------------------------------------------------------
    // Commands and settings
    // -------------------------------------------------------------------------

    pub async fn search_series(&self, ctx: &OperationContext, series_id: u64) -> ApiResult<CommandResource> {
        let body = json!({ "name": "SeriesSearch", "seriesId": series_id });
        self.exec()
            .execute(ctx, ApiRequest::post("/api/v3/command", body))
            .await
    }

    pub async fn search_episodes(&self, ctx: &OperationContext, episode_ids: &[u64]) -> ApiResult<CommandResource> {
        if episode_ids.is_empty() {
            return Err(self.validation("episode search needs at least one episode"));
        }
        let body = json!({ "name": "EpisodeSearch", "episodeIds": episode_ids });
        self.exec()
            .execute(ctx, ApiRequest::post("/api/v3/command", body))
            .await
    }

    pub async fn quality_profiles(&self, ctx: &OperationContext) -> ApiResult<Vec<QualityProfile>> {
        self.exec()
            .execute(ctx, ApiRequest::get("/api/v3/qualityprofile"))
            .await
    }

    pub async fn root_folders(&self, ctx: &OperationContext) -> ApiResult<Vec<RootFolder>> {
        self.exec()
            .execute(ctx, ApiRequest::get("/api/v3/rootfolder"))
            .await
    }

    pub async fn system_status(&self, ctx: &OperationContext) -> ApiResult<SystemStatus> {
        self.exec()
            .execute(ctx, ApiRequest::get("/api/v3/system/status"))
            .await
    }
}

#[async_trait]
impl BackendClient for SeriesClient {
    fn kind(&self) -> BackendKind {
        BackendKind::SeriesManager
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            search: true,
            queue: true,
            commands: true,
            episodes: true,
            library_refresh: false,
        }
    }

    async fn api_version(&self, ctx: &OperationContext) -> Arc<ApiVersionResult> {
        self.core.api_version(ctx).await
    }

    async fn refresh_api_version(&self, ctx: &OperationContext) -> Arc<ApiVersionResult> {
        self.core.refresh_api_version(ctx).await
    }

    async fn health_check(&self, ctx: &OperationContext) -> HealthStatus {
        self.core.health_check(ctx).await
    }
}
