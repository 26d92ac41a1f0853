// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed backend clients.
//!
//! One struct per backend, each composed from a [`ClientCore`]: the immutable
//! [`ClientConfig`], a [`RequestExecutor`] carrying the backend's
//! [`AuthStrategy`](crate::auth::AuthStrategy), and a [`VersionNegotiator`]
//! holding that client's cached version.
//!
//! - [`SeriesClient`]: series manager (`X-Api-Key` header auth)
//! - [`MovieClient`]: movie manager (`X-Api-Key` header auth)
//! - [`LibraryClient`]: media library server (`api_key`/`userId` query auth)

pub mod library;
pub mod models;
pub mod movies;
pub mod series;

pub use library::LibraryClient;
pub use movies::MovieClient;
pub use series::SeriesClient;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use crate::auth::AuthStrategy;
use crate::config::ClientConfig;
use crate::errors::{ApiError, ApiResult};
use crate::health::HealthStatus;
use crate::http::{ApiRequest, RequestExecutor, RequestOptions};
use crate::types::BackendKind;
use crate::utils::OperationContext;
use crate::version::{probe_endpoints, ApiVersionResult, VersionNegotiator};

/// Shortest accepted search term, after trimming.
pub const MIN_SEARCH_LENGTH: usize = 2;

/// What a backend client can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub search: bool,
    pub queue: bool,
    pub commands: bool,
    pub episodes: bool,
    pub library_refresh: bool,
}

/// Behavior shared by every backend client.
#[async_trait]
pub trait BackendClient: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> Capabilities;

    /// Cached API version, detected on first use.
    async fn api_version(&self, ctx: &OperationContext) -> Arc<ApiVersionResult>;

    /// Detect the API version again, replacing the cached value.
    async fn refresh_api_version(&self, ctx: &OperationContext) -> Arc<ApiVersionResult>;

    async fn health_check(&self, ctx: &OperationContext) -> HealthStatus;
}

/// State every concrete client is built from.
pub struct ClientCore {
    config: ClientConfig,
    executor: RequestExecutor,
    version: VersionNegotiator,
}

impl ClientCore {
    /// Core over a pooled reqwest transport.
    pub fn new(config: ClientConfig, auth: AuthStrategy) -> ApiResult<Self> {
        let executor = RequestExecutor::from_config(&config, auth)?;
        Ok(Self::with_executor(config, executor))
    }

    /// Core over a caller-built executor (custom transport, sleeper or observer).
    pub fn with_executor(config: ClientConfig, executor: RequestExecutor) -> Self {
        let version = VersionNegotiator::new(&config);
        Self {
            config,
            executor,
            version,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn kind(&self) -> BackendKind {
        self.config.backend
    }

    pub async fn api_version(&self, ctx: &OperationContext) -> Arc<ApiVersionResult> {
        self.version.get_version(&self.executor, ctx).await
    }

    pub async fn refresh_api_version(&self, ctx: &OperationContext) -> Arc<ApiVersionResult> {
        self.version.refresh(&self.executor, ctx).await
    }

    /// Probe the primary status endpoint once, then fold in the version.
    pub async fn health_check(&self, ctx: &OperationContext) -> HealthStatus {
        let mut status = HealthStatus::new(self.kind());
        let endpoint = probe_endpoints(self.kind())[0];

        let started = Instant::now();
        let probe = self
            .executor
            .execute_with::<serde_json::Value>(ctx, ApiRequest::get(endpoint), RequestOptions::single_attempt())
            .await;

        match probe {
            Ok(_) => {
                status.record_probe(Ok(started.elapsed()));
                let version = self.api_version(ctx).await;
                status.record_version(&version);
            }
            Err(err) => status.record_probe(Err(&err)),
        }

        tracing::info!(
            backend = %self.kind(),
            correlation_id = %ctx.correlation_id,
            healthy = status.is_healthy(),
            issues = status.issues.len(),
            "Health check finished"
        );
        status
    }
}

/// Records per queue page.
const QUEUE_PAGE_SIZE: u32 = 100;
/// Upper bound on pages fetched, in case the backend miscounts.
const QUEUE_MAX_PAGES: u32 = 50;

/// Fetch every page of a series or movie manager's queue.
pub(crate) async fn fetch_queue(
    executor: &RequestExecutor,
    ctx: &OperationContext,
) -> ApiResult<Vec<models::QueueItem>> {
    let mut items = Vec::new();
    for page in 1..=QUEUE_MAX_PAGES {
        let request = ApiRequest::get("/api/v3/queue")
            .with_query("page", page)
            .with_query("pageSize", QUEUE_PAGE_SIZE);
        let batch: models::QueuePage = executor.execute(ctx, request).await?;

        let received = batch.records.len();
        items.extend(batch.records);
        if received == 0 || items.len() >= batch.total_records as usize {
            break;
        }
    }
    Ok(items)
}

/// Trim a search term and reject it if too short, before any request is built.
pub fn validate_search_term(term: &str) -> ApiResult<String> {
    let trimmed = term.trim();
    if trimmed.chars().count() < MIN_SEARCH_LENGTH {
        return Err(ApiError::validation(format!(
            "search term must be at least {} characters",
            MIN_SEARCH_LENGTH
        )));
    }
    Ok(trimmed.to_string())
}
