// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Movie manager client (`/api/v3`).

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::models::{CommandResource, Movie, QualityProfile, QueueItem, RootFolder, SystemStatus};
use super::{fetch_queue, validate_search_term, BackendClient, Capabilities, ClientCore};
use crate::auth::AuthStrategy;
use crate::config::ClientConfig;
use crate::errors::{ApiError, ApiResult};
use crate::health::HealthStatus;
use crate::http::{ApiRequest, RequestExecutor};
use crate::types::BackendKind;
use crate::utils::OperationContext;
use crate::version::ApiVersionResult;

pub struct MovieClient {
    core: ClientCore,
}

impl MovieClient {
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
        ApiError::validation(details).with_backend(BackendKind::MovieManager)
    }

    pub async fn lookup(&self, ctx: &OperationContext, term: &str) -> ApiResult<Vec<Movie>> {
        let term = validate_search_term(term).map_err(|e| e.with_backend(BackendKind::MovieManager))?;
        self.exec()
            .execute(ctx, ApiRequest::get("/api/v3/movie/lookup").with_query("term", term))
            .await
    }

    /// Exact lookup by TMDB id. The backend answers 404 for unknown ids.
    pub async fn lookup_by_tmdb(&self, ctx: &OperationContext, tmdb_id: u64) -> ApiResult<Movie> {
        self.exec()
            .execute(ctx, ApiRequest::get("/api/v3/movie/lookup/tmdb").with_query("tmdbId", tmdb_id))
            .await
    }

    pub async fn list_movies(&self, ctx: &OperationContext) -> ApiResult<Vec<Movie>> {
        self.exec().execute(ctx, ApiRequest::get("/api/v3/movie")).await
    }

    pub async fn get_movie(&self, ctx: &OperationContext, id: u64) -> ApiResult<Movie> {
        self.exec()
            .execute(ctx, ApiRequest::get(format!("/api/v3/movie/{}", id)))
            .await
    }

    /// The library entry for a TMDB id, if the movie has been added.
    pub async fn movie_by_tmdb(&self, ctx: &OperationContext, tmdb_id: u64) -> ApiResult<Option<Movie>> {
        let results: Vec<Movie> = self
            .exec()
            .execute(ctx, ApiRequest::get("/api/v3/movie").with_query("tmdbId", tmdb_id))
            .await?;
        Ok(results.into_iter().find(|m| m.tmdb_id == tmdb_id))
    }

    pub async fn add_movie(&self, ctx: &OperationContext, movie: &Movie) -> ApiResult<Movie> {
        let body = serde_json::to_value(movie).map_err(|e| self.validation(&e.to_string()))?;
        self.exec()
            .execute(ctx, ApiRequest::post("/api/v3/movie", body))
            .await
    }

    pub async fn update_movie(&self, ctx: &OperationContext, movie: &Movie) -> ApiResult<Movie> {
        let id = movie
            .id
            .ok_or_else(|| self.validation("cannot update a movie without an id"))?;
        let body = serde_json::to_value(movie).map_err(|e| self.validation(&e.to_string()))?;
        self.exec()
            .execute(ctx, ApiRequest::put(format!("/api/v3/movie/{}", id), body))
            .await
    }

    pub async fn delete_movie(&self, ctx: &OperationContext, id: u64, delete_files: bool) -> ApiResult<()> {
        self.exec()
            .execute_empty(
                ctx,
                ApiRequest::delete(format!("/api/v3/movie/{}", id))
                    .with_query("deleteFiles", delete_files)
                    .with_query("addImportExclusion", false),
            )
            .await
    }

    pub async fn queue(&self, ctx: &OperationContext) -> ApiResult<Vec<QueueItem>> {
        fetch_queue(self.exec(), ctx).await
    }

    pub async fn queue_for_movie(&self, ctx: &OperationContext, movie_id: u64) -> ApiResult<Vec<QueueItem>> {
        let items = self.queue(ctx).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.movie_id == Some(movie_id))
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

    pub async fn search_movies(&self, ctx: &OperationContext, movie_ids: &[u64]) -> ApiResult<CommandResource> {
        if movie_ids.is_empty() {
            return Err(self.validation("movie search needs at least one movie"));
        }
        let body = json!({ "name": "MoviesSearch", "movieIds": movie_ids });
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
impl BackendClient for MovieClient {
    fn kind(&self) -> BackendKind {
        BackendKind::MovieManager
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            search: true,
            queue: true,
            commands: true,
            episodes: false,
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
