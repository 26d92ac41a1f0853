// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire shapes for the three backends.
//!
//! Series and movie records keep every field they don't model in `extra`, so
//! a record read with GET can be written back with PUT without dropping
//! upstream data.

use serde::{Deserialize, Serialize};

type Extra = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// SHARED (series + movie managers)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityProfile {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootFolder {
    #[serde(default)]
    pub id: u32,
    pub path: String,
    #[serde(default)]
    pub free_space: Option<u64>,
}

/// A download-queue entry. Owned by the backend; only read or cancelled here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: u64,
    #[serde(default)]
    pub series_id: Option<u64>,
    #[serde(default)]
    pub episode_id: Option<u64>,
    #[serde(default)]
    pub movie_id: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// One page of the queue endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePage {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub total_records: u32,
    #[serde(default)]
    pub records: Vec<QueueItem>,
}

/// Reply to a command POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResource {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

// =============================================================================
// SERIES MANAGER
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonStatistics {
    #[serde(default)]
    pub episode_file_count: u32,
    #[serde(default)]
    pub episode_count: u32,
    #[serde(default)]
    pub total_episode_count: u32,
}

/// Monitoring state of one season. Season 0 holds specials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonState {
    pub season_number: u32,
    pub monitored: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<SeasonStatistics>,
}

impl SeasonState {
    pub fn new(season_number: u32, monitored: bool) -> Self {
        Self {
            season_number,
            monitored,
            statistics: None,
        }
    }
}

/// Options applied when a series is first added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSeriesOptions {
    /// Backend monitor preset (`all`, `none`, ...).
    pub monitor: String,
    pub search_for_missing_episodes: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub title: String,
    pub tvdb_id: u64,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_profile_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_folder_path: Option<String>,
    #[serde(default)]
    pub seasons: Vec<SeasonState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_options: Option<AddSeriesOptions>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Series {
    /// Monitored, with every regular season monitored. Specials are ignored.
    pub fn is_fully_monitored(&self) -> bool {
        self.monitored
            && self
                .seasons
                .iter()
                .filter(|s| s.season_number != 0)
                .all(|s| s.monitored)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: u64,
    pub series_id: u64,
    pub season_number: u32,
    pub episode_number: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default)]
    pub has_file: bool,
    #[serde(default)]
    pub episode_file_id: Option<u64>,
}

impl Episode {
    /// File id, treating the backend's `0` placeholder as absent.
    pub fn file_id(&self) -> Option<u64> {
        self.episode_file_id.filter(|id| *id != 0)
    }
}

// =============================================================================
// MOVIE MANAGER
// =============================================================================

/// Options applied when a movie is first added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMovieOptions {
    pub search_for_movie: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub title: String,
    pub tmdb_id: u64,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default)]
    pub has_file: bool,
    #[serde(default)]
    pub size_on_disk: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_profile_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_folder_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_options: Option<AddMovieOptions>,
    #[serde(flatten)]
    pub extra: Extra,
}

// =============================================================================
// LIBRARY SERVER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LibraryItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub item_type: String,
    #[serde(default)]
    pub production_year: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LibraryItemPage {
    #[serde(default)]
    pub items: Vec<LibraryItem>,
    #[serde(default)]
    pub total_record_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LibrarySystemInfo {
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}
