// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! Canonical types used across arrgate.
//!
//! This module provides unified type definitions to avoid duplication.

use serde::{Deserialize, Serialize};

/// The backend families a client can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// TV-series manager (Sonarr-compatible API)
    SeriesManager,
    /// Movie manager (Radarr-compatible API)
    MovieManager,
    /// Media-library server (Jellyfin-compatible API)
    LibraryServer,
}

impl BackendKind {
    /// Short identifier used in logs and config keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SeriesManager => "series",
            Self::MovieManager => "movies",
            Self::LibraryServer => "library",
        }
    }

    /// Human-readable name for user-facing messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::SeriesManager => "series manager",
            Self::MovieManager => "movie manager",
            Self::LibraryServer => "media library server",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How strictly a detected API version is matched against the supported table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityMode {
    /// Only exact matches are compatible.
    Strict,
    /// Exact matches, or the same major version as any supported version.
    #[default]
    Loose,
    /// Like `Loose`, and an undetected version is always treated as compatible.
    Fallback,
}

/// HTTP methods the executor supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_serde() {
        let json = serde_json::to_string(&BackendKind::MovieManager).unwrap();
        assert_eq!(json, "\"movie_manager\"");
        let kind: BackendKind = serde_json::from_str("\"library_server\"").unwrap();
        assert_eq!(kind, BackendKind::LibraryServer);
    }

    #[test]
    fn test_compatibility_default_is_loose() {
        assert_eq!(CompatibilityMode::default(), CompatibilityMode::Loose);
        let mode: CompatibilityMode = serde_json::from_str("\"strict\"").unwrap();
        assert_eq!(mode, CompatibilityMode::Strict);
    }
}
