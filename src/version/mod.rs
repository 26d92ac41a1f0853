// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! API version negotiation.
//!
//! Each client probes a short, ordered list of status endpoints the first
//! time its version is needed. The first response carrying a recognizable
//! version field wins. If none does, the configured fallback version is used
//! with `detected = false` and a warning: detection is advisory, never fatal.
//!
//! The result is cached per client in an [`ArcSwapOption`]. Reads are a
//! lock-free atomic load; [`VersionNegotiator::refresh`] swaps in a fresh
//! value whole, so nobody ever sees a half-built result.

use arc_swap::ArcSwapOption;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, LazyLock};

use crate::config::ClientConfig;
use crate::http::{ApiRequest, RequestExecutor, RequestOptions};
use crate::types::{BackendKind, CompatibilityMode};
use crate::utils::OperationContext;

/// Keys tried on every backend, in order.
const COMMON_VERSION_KEYS: &[&str] = &["version", "Version", "apiVersion", "serverVersion", "buildVersion"];

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*v?(\d+)\.(\d+)\.(\d+)").expect("Version regex"));

/// Outcome of version detection for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiVersionResult {
    pub version: String,
    /// `false` when the fallback version was substituted.
    pub detected: bool,
    /// Exactly one of the tested versions.
    pub is_supported: bool,
    pub is_compatible: bool,
    pub warnings: Vec<String>,
}

/// Extract the leading `major.minor.patch` from a version string.
///
/// `"3.0.0.4821"` becomes `"3.0.0"`; anything without that prefix is `None`.
pub fn clean_version_string(raw: &str) -> Option<String> {
    VERSION_PATTERN
        .captures(raw)
        .map(|caps| format!("{}.{}.{}", &caps[1], &caps[2], &caps[3]))
}

fn major_of(version: &str) -> Option<u64> {
    version.split('.').next()?.trim().parse().ok()
}

/// Whether `version` is compatible with `supported` under `mode`.
pub fn is_compatible(version: &str, supported: &[String], mode: CompatibilityMode) -> bool {
    if supported.iter().any(|s| s == version) {
        return true;
    }
    match mode {
        CompatibilityMode::Strict => false,
        CompatibilityMode::Loose | CompatibilityMode::Fallback => match major_of(version) {
            Some(major) => supported.iter().any(|s| major_of(s) == Some(major)),
            None => false,
        },
    }
}

/// Find a version string in a status payload.
pub fn extract_version(payload: &serde_json::Value, extra_keys: &[&str]) -> Option<String> {
    COMMON_VERSION_KEYS
        .iter()
        .chain(extra_keys.iter())
        .filter_map(|key| payload.get(*key))
        .filter_map(|value| value.as_str())
        .find_map(clean_version_string)
}

/// Status endpoints probed for a backend, in order.
pub fn probe_endpoints(backend: BackendKind) -> &'static [&'static str] {
    match backend {
        BackendKind::SeriesManager | BackendKind::MovieManager => {
            &["/api/v3/system/status", "/api/system/status"]
        }
        BackendKind::LibraryServer => &["/System/Info/Public", "/System/Info"],
    }
}

/// Backend-specific version keys tried after the common ones.
pub fn extra_version_keys(backend: BackendKind) -> &'static [&'static str] {
    match backend {
        BackendKind::SeriesManager | BackendKind::MovieManager => &["packageVersion"],
        BackendKind::LibraryServer => &["ServerVersion", "ProductVersion"],
    }
}

/// Detects, evaluates and caches a client's API version.
#[derive(Debug)]
pub struct VersionNegotiator {
    backend: BackendKind,
    supported: Vec<String>,
    fallback: String,
    mode: CompatibilityMode,
    cache: ArcSwapOption<ApiVersionResult>,
    // Serializes population so concurrent first calls probe once.
    populate: tokio::sync::Mutex<()>,
}

impl VersionNegotiator {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            backend: config.backend,
            supported: config.supported_versions.clone(),
            fallback: config.fallback_version.clone(),
            mode: config.compatibility,
            cache: ArcSwapOption::empty(),
            populate: tokio::sync::Mutex::new(()),
        }
    }

    /// The cached result, if any.
    pub fn cached(&self) -> Option<Arc<ApiVersionResult>> {
        self.cache.load_full()
    }

    /// Cached version, detecting it on first use.
    pub async fn get_version(&self, executor: &RequestExecutor, ctx: &OperationContext) -> Arc<ApiVersionResult> {
        if let Some(result) = self.cached() {
            return result;
        }

        let _guard = self.populate.lock().await;
        if let Some(result) = self.cached() {
            return result;
        }
        self.detect_and_store(executor, ctx).await
    }

    /// Discard the cached value and detect again.
    pub async fn refresh(&self, executor: &RequestExecutor, ctx: &OperationContext) -> Arc<ApiVersionResult> {
        let _guard = self.populate.lock().await;
        self.detect_and_store(executor, ctx).await
    }

    async fn detect_and_store(&self, executor: &RequestExecutor, ctx: &OperationContext) -> Arc<ApiVersionResult> {
        let detected = self.probe(executor, ctx).await;
        let result = Arc::new(self.evaluate(detected));

        if !result.warnings.is_empty() {
            tracing::warn!(
                backend = %self.backend,
                correlation_id = %ctx.correlation_id,
                version = %result.version,
                detected = result.detected,
                "{}",
                result.warnings.join("; ")
            );
        } else {
            tracing::info!(
                backend = %self.backend,
                correlation_id = %ctx.correlation_id,
                version = %result.version,
                "Detected API version"
            );
        }

        self.cache.store(Some(Arc::clone(&result)));
        result
    }

    async fn probe(&self, executor: &RequestExecutor, ctx: &OperationContext) -> Option<String> {
        let extra_keys = extra_version_keys(self.backend);
        for endpoint in probe_endpoints(self.backend) {
            let response = executor
                .execute_with::<serde_json::Value>(ctx, ApiRequest::get(*endpoint), RequestOptions::single_attempt())
                .await;
            match response {
                Ok(payload) => {
                    if let Some(version) = extract_version(&payload, extra_keys) {
                        return Some(version);
                    }
                    tracing::debug!(backend = %self.backend, endpoint, "No version field in probe response");
                }
                Err(e) => {
                    tracing::debug!(backend = %self.backend, endpoint, error = %e, "Version probe failed");
                }
            }
        }
        None
    }

    /// Build the result for a detected version, or the fallback when `None`.
    pub fn evaluate(&self, detected: Option<String>) -> ApiVersionResult {
        let mut warnings = Vec::new();
        let was_detected = detected.is_some();
        let version = match detected {
            Some(v) => v,
            None => {
                warnings.push(format!(
                    "Could not detect the {} API version; assuming {}",
                    self.backend.display_name(),
                    self.fallback
                ));
                self.fallback.clone()
            }
        };

        let is_supported = self.supported.iter().any(|s| *s == version);
        let is_compatible = if !was_detected && self.mode == CompatibilityMode::Fallback {
            true
        } else {
            is_compatible(&version, &self.supported, self.mode)
        };

        if !is_compatible {
            warnings.push(format!(
                "Version {} is not compatible with supported versions ({})",
                version,
                self.supported.join(", ")
            ));
        } else if !is_supported && was_detected {
            warnings.push(format!(
                "Version {} has not been tested; major version matches a supported release",
                version
            ));
        }

        ApiVersionResult {
            version,
            detected: was_detected,
            is_supported,
            is_compatible,
            warnings,
        }
    }
}
