// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Media library server client.
//!
//! Auth rides in the query string (`api_key`, `userId`), so the user id the
//! client acts as comes from its [`AuthStrategy`].

use async_trait::async_trait;
use std::sync::Arc;

use super::models::{LibraryItem, LibraryItemPage, LibrarySystemInfo};
use super::{validate_search_term, BackendClient, Capabilities, ClientCore};
use crate::auth::AuthStrategy;
use crate::config::ClientConfig;
use crate::errors::{ApiError, ApiResult};
use crate::health::HealthStatus;
use crate::http::{ApiRequest, RequestExecutor};
use crate::types::BackendKind;
use crate::utils::OperationContext;
use crate::version::ApiVersionResult;

/// Item types returned by [`LibraryClient::search`].
const SEARCH_ITEM_TYPES: &str = "Series,Movie";

pub struct LibraryClient {
    core: ClientCore,
}

impl LibraryClient {
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

    fn user_id(&self) -> ApiResult<String> {
        self.exec()
            .auth()
            .query_value("userId")
            .map(str::to_string)
            .ok_or_else(|| {
                ApiError::validation("no user id configured for the library server")
                    .with_backend(BackendKind::LibraryServer)
            })
    }

    /// Search series and movies by name.
    pub async fn search(&self, ctx: &OperationContext, term: &str, limit: u32) -> ApiResult<Vec<LibraryItem>> {
        let term = validate_search_term(term).map_err(|e| e.with_backend(BackendKind::LibraryServer))?;
        let page: LibraryItemPage = self
            .exec()
            .execute(
                ctx,
                ApiRequest::get("/Items")
                    .with_query("searchTerm", term)
                    .with_query("IncludeItemTypes", SEARCH_ITEM_TYPES)
                    .with_query("Recursive", true)
                    .with_query("Limit", limit),
            )
            .await?;
        Ok(page.items)
    }

    /// Most recently added items for the configured user.
    pub async fn latest_items(&self, ctx: &OperationContext, limit: u32) -> ApiResult<Vec<LibraryItem>> {
        let user_id = self.user_id()?;
        self.exec()
            .execute(
                ctx,
                ApiRequest::get(format!("/Users/{}/Items/Latest", user_id)).with_query("Limit", limit),
            )
            .await
    }

    /// Ask the server to rescan its libraries.
    pub async fn refresh_library(&self, ctx: &OperationContext) -> ApiResult<()> {
        self.exec()
            .execute_empty(ctx, ApiRequest::new(crate::types::HttpMethod::Post, "/Library/Refresh"))
            .await
    }

    pub async fn system_info(&self, ctx: &OperationContext) -> ApiResult<LibrarySystemInfo> {
        self.exec()
            .execute(ctx, ApiRequest::get("/System/Info/Public"))
            .await
    }
}

#[async_trait]
impl BackendClient for LibraryClient {
    fn kind(&self) -> BackendKind {
        BackendKind::LibraryServer
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            search: true,
            queue: false,
            commands: false,
            episodes: false,
            library_refresh: true,
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
