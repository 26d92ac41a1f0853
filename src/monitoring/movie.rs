// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Movie orchestration.
//!
//! Movies are all-or-nothing: a movie is either monitored or not, and a
//! removal always deletes the library entry. No season logic.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use super::{pick_quality_profile, pick_root_folder, with_deadline, OrchestrationError};
use crate::backends::models::{AddMovieOptions, CommandResource, Movie, QualityProfile, QueueItem, RootFolder};
use crate::backends::MovieClient;
use crate::errors::{ApiError, ApiErrorKind, ApiResult};
use crate::utils::OperationContext;

const BACKEND_NAME: &str = "movie manager";

/// The movie manager operations the orchestrator relies on.
#[async_trait]
pub trait MovieOperations: Send + Sync {
    async fn movie_by_tmdb(&self, ctx: &OperationContext, tmdb_id: u64) -> ApiResult<Option<Movie>>;
    /// `None` if the metadata provider doesn't know the id.
    async fn lookup_by_tmdb(&self, ctx: &OperationContext, tmdb_id: u64) -> ApiResult<Option<Movie>>;
    async fn quality_profiles(&self, ctx: &OperationContext) -> ApiResult<Vec<QualityProfile>>;
    async fn root_folders(&self, ctx: &OperationContext) -> ApiResult<Vec<RootFolder>>;
    async fn add_movie(&self, ctx: &OperationContext, movie: &Movie) -> ApiResult<Movie>;
    async fn update_movie(&self, ctx: &OperationContext, movie: &Movie) -> ApiResult<Movie>;
    async fn delete_movie(&self, ctx: &OperationContext, movie_id: u64, delete_files: bool) -> ApiResult<()>;
    async fn queue_for_movie(&self, ctx: &OperationContext, movie_id: u64) -> ApiResult<Vec<QueueItem>>;
    async fn remove_queue_item(
        &self,
        ctx: &OperationContext,
        queue_id: u64,
        remove_from_client: bool,
        blocklist: bool,
    ) -> ApiResult<()>;
    async fn search_movies(&self, ctx: &OperationContext, movie_ids: &[u64]) -> ApiResult<CommandResource>;
}

#[async_trait]
impl MovieOperations for MovieClient {
    async fn movie_by_tmdb(&self, ctx: &OperationContext, tmdb_id: u64) -> ApiResult<Option<Movie>> {
        MovieClient::movie_by_tmdb(self, ctx, tmdb_id).await
    }

    async fn lookup_by_tmdb(&self, ctx: &OperationContext, tmdb_id: u64) -> ApiResult<Option<Movie>> {
        match MovieClient::lookup_by_tmdb(self, ctx, tmdb_id).await {
            Ok(movie) => Ok(Some(movie)),
            Err(err) if matches!(err.kind, ApiErrorKind::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn quality_profiles(&self, ctx: &OperationContext) -> ApiResult<Vec<QualityProfile>> {
        MovieClient::quality_profiles(self, ctx).await
    }

    async fn root_folders(&self, ctx: &OperationContext) -> ApiResult<Vec<RootFolder>> {
        MovieClient::root_folders(self, ctx).await
    }

    async fn add_movie(&self, ctx: &OperationContext, movie: &Movie) -> ApiResult<Movie> {
        MovieClient::add_movie(self, ctx, movie).await
    }

    async fn update_movie(&self, ctx: &OperationContext, movie: &Movie) -> ApiResult<Movie> {
        MovieClient::update_movie(self, ctx, movie).await
    }

    async fn delete_movie(&self, ctx: &OperationContext, movie_id: u64, delete_files: bool) -> ApiResult<()> {
        MovieClient::delete_movie(self, ctx, movie_id, delete_files).await
    }

    async fn queue_for_movie(&self, ctx: &OperationContext, movie_id: u64) -> ApiResult<Vec<QueueItem>> {
        MovieClient::queue_for_movie(self, ctx, movie_id).await
    }

    async fn remove_queue_item(
        &self,
        ctx: &OperationContext,
        queue_id: u64,
        remove_from_client: bool,
        blocklist: bool,
    ) -> ApiResult<()> {
        MovieClient::remove_queue_item(self, ctx, queue_id, remove_from_client, blocklist).await
    }

    async fn search_movies(&self, ctx: &OperationContext, movie_ids: &[u64]) -> ApiResult<CommandResource> {
        MovieClient::search_movies(self, ctx, movie_ids).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddMovieRequest {
    pub tmdb_id: u64,
    pub quality_profile_id: Option<u32>,
    pub root_folder_path: Option<String>,
}

impl AddMovieRequest {
    pub fn new(tmdb_id: u64) -> Self {
        Self {
            tmdb_id,
            quality_profile_id: None,
            root_folder_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveMovieRequest {
    pub tmdb_id: u64,
    pub delete_files: bool,
}

/// Result of one movie orchestration call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MovieOutcome {
    pub success: bool,
    pub movie_id: Option<u64>,
    pub title: Option<String>,
    pub added: bool,
    pub search_triggered: bool,
    pub command_id: Option<u64>,
    pub deleted: bool,
    pub files_deleted: bool,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl MovieOutcome {
    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

pub struct MovieOrchestrator {
    ops: Arc<dyn MovieOperations>,
}

impl MovieOrchestrator {
    pub fn new(ops: Arc<dyn MovieOperations>) -> Self {
        Self { ops }
    }

    /// Make sure the movie is in the library, monitored, and being searched for.
    pub async fn add_and_download(&self, ctx: &OperationContext, request: AddMovieRequest) -> MovieOutcome {
        let mut outcome = MovieOutcome::default();
        let result = with_deadline(ctx, self.add_inner(ctx, &request, &mut outcome)).await;
        finish(ctx, "add_movie", request.tmdb_id, outcome, result)
    }

    async fn add_inner(
        &self,
        ctx: &OperationContext,
        request: &AddMovieRequest,
        outcome: &mut MovieOutcome,
    ) -> Result<(), OrchestrationError> {
        let ops = self.ops.as_ref();

        let movie = match ops.movie_by_tmdb(ctx, request.tmdb_id).await? {
            Some(movie) if movie.monitored => movie,
            Some(mut movie) => {
                movie.monitored = true;
                ops.update_movie(ctx, &movie).await?
            }
            None => {
                let mut movie = ops
                    .lookup_by_tmdb(ctx, request.tmdb_id)
                    .await?
                    .ok_or(OrchestrationError::NotFound {
                        resource: "movie",
                        id: request.tmdb_id,
                    })?;

                let quality_profile_id = match request.quality_profile_id {
                    Some(id) => id,
                    None => pick_quality_profile(None, &ops.quality_profiles(ctx).await?, BACKEND_NAME)?,
                };
                let root_folder_path = match &request.root_folder_path {
                    Some(path) => path.clone(),
                    None => pick_root_folder(None, &ops.root_folders(ctx).await?, BACKEND_NAME)?,
                };

                movie.quality_profile_id = Some(quality_profile_id);
                movie.root_folder_path = Some(root_folder_path);
                movie.monitored = true;
                movie.add_options = Some(AddMovieOptions { search_for_movie: false });

                let added = ops.add_movie(ctx, &movie).await?;
                outcome.added = true;
                tracing::info!(
                    correlation_id = %ctx.correlation_id,
                    tmdb_id = request.tmdb_id,
                    title = %added.title,
                    "Movie added"
                );
                added
            }
        };

        let movie_id = movie_id_of(&movie)?;
        outcome.movie_id = Some(movie_id);
        outcome.title = Some(movie.title.clone());

        match ops.search_movies(ctx, &[movie_id]).await {
            Ok(command) => {
                outcome.search_triggered = true;
                outcome.command_id = Some(command.id);
            }
            Err(e) => outcome.warn(format!("Search could not be triggered: {}", e.user_message())),
        }
        Ok(())
    }

    /// Cancel downloads and remove the movie from the library.
    pub async fn remove(&self, ctx: &OperationContext, request: RemoveMovieRequest) -> MovieOutcome {
        let mut outcome = MovieOutcome::default();
        let result = with_deadline(ctx, self.remove_inner(ctx, &request, &mut outcome)).await;
        finish(ctx, "remove_movie", request.tmdb_id, outcome, result)
    }

    async fn remove_inner(
        &self,
        ctx: &OperationContext,
        request: &RemoveMovieRequest,
        outcome: &mut MovieOutcome,
    ) -> Result<(), OrchestrationError> {
        let ops = self.ops.as_ref();
        let movie = ops
            .movie_by_tmdb(ctx, request.tmdb_id)
            .await?
            .ok_or(OrchestrationError::NotFound {
                resource: "movie",
                id: request.tmdb_id,
            })?;
        let movie_id = movie_id_of(&movie)?;
        outcome.movie_id = Some(movie_id);
        outcome.title = Some(movie.title.clone());

        match ops.queue_for_movie(ctx, movie_id).await {
            Ok(queue) => {
                for item in queue {
                    if let Err(e) = ops.remove_queue_item(ctx, item.id, true, false).await {
                        outcome.warn(format!("Could not cancel download {}: {}", item.id, e.user_message()));
                    }
                }
            }
            Err(e) => outcome.warn(format!("Could not read the download queue: {}", e.user_message())),
        }

        ops.delete_movie(ctx, movie_id, request.delete_files).await?;
        outcome.deleted = true;
        outcome.files_deleted = request.delete_files && movie.has_file;
        Ok(())
    }
}

fn movie_id_of(movie: &Movie) -> Result<u64, OrchestrationError> {
    movie.id.ok_or_else(|| {
        OrchestrationError::Api(ApiError::new(ApiErrorKind::MalformedResponse {
            details: format!("movie '{}' has no id", movie.title),
        }))
    })
}

fn finish(
    ctx: &OperationContext,
    operation: &str,
    tmdb_id: u64,
    mut outcome: MovieOutcome,
    result: Result<(), OrchestrationError>,
) -> MovieOutcome {
    match result {
        Ok(()) => {
            outcome.success = true;
            tracing::info!(
                correlation_id = %ctx.correlation_id,
                operation,
                tmdb_id,
                added = outcome.added,
                deleted = outcome.deleted,
                search_triggered = outcome.search_triggered,
                "Movie orchestration finished"
            );
        }
        Err(err) => {
            tracing::error!(
                correlation_id = %ctx.correlation_id,
                operation,
                tmdb_id,
                error = %err,
                "Movie orchestration failed"
            );
            outcome.error = Some(err.user_message());
        }
    }
    outcome
}
