// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! Backend health reporting.
//!
//! A health check is one status probe plus the cached version result,
//! reported as a list of [`HealthIssue`]s, each with an actionable fix.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo(client: &dyn arrgate::backends::BackendClient) {
//! use arrgate::utils::OperationContext;
//!
//! let status = client.health_check(&OperationContext::new()).await;
//! if status.has_critical_issues() {
//!     for issue in status.critical_issues() {
//!         eprintln!("  - {}: {}", issue.message, issue.fix);
//!     }
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{ApiError, ApiErrorKind};
use crate::types::BackendKind;
use crate::version::ApiVersionResult;

/// Severity level for health issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Informational - not a problem, just FYI
    Info,
    /// Warning - the backend works but something is off
    Warning,
    /// Critical - the backend cannot be used
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Represents a health issue with actionable fix instructions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthIssue {
    pub severity: Severity,
    /// Component affected (e.g., "series manager", "API version")
    pub component: String,
    pub message: String,
    /// Actionable fix instruction
    pub fix: String,
}

impl HealthIssue {
    pub fn new(severity: Severity, component: &str, message: &str, fix: &str) -> Self {
        Self {
            severity,
            component: component.to_string(),
            message: message.to_string(),
            fix: fix.to_string(),
        }
    }

    pub fn critical(component: &str, message: &str, fix: &str) -> Self {
        Self::new(Severity::Critical, component, message, fix)
    }

    pub fn warning(component: &str, message: &str, fix: &str) -> Self {
        Self::new(Severity::Warning, component, message, fix)
    }

    pub fn info(component: &str, message: &str, fix: &str) -> Self {
        Self::new(Severity::Info, component, message, fix)
    }
}

impl std::fmt::Display for HealthIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let icon = match self.severity {
            Severity::Critical => "[X]",
            Severity::Warning => "[!]",
            Severity::Info => "[i]",
        };
        write!(f, "{} {}: {}", icon, self.component, self.message)
    }
}

/// Health of one backend.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub backend: BackendKind,
    /// Whether the status endpoint answered successfully.
    pub reachable: bool,
    pub response_time: Option<Duration>,
    pub version: Option<ApiVersionResult>,
    pub issues: Vec<HealthIssue>,
}

impl HealthStatus {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            reachable: false,
            response_time: None,
            version: None,
            issues: Vec::new(),
        }
    }

    /// Healthy means reachable with no critical issues.
    pub fn is_healthy(&self) -> bool {
        self.reachable && !self.has_critical_issues()
    }

    pub fn has_critical_issues(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }

    pub fn has_warnings(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Warning)
    }

    pub fn critical_issues(&self) -> Vec<&HealthIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .collect()
    }

    pub fn warning_issues(&self) -> Vec<&HealthIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .collect()
    }

    /// Record the outcome of the status probe.
    pub fn record_probe(&mut self, result: Result<Duration, &ApiError>) {
        let component = self.backend.display_name();
        match result {
            Ok(elapsed) => {
                self.reachable = true;
                self.response_time = Some(elapsed);
                if elapsed > SLOW_RESPONSE {
                    self.issues.push(HealthIssue::warning(
                        component,
                        &format!("Status endpoint took {}ms to respond", elapsed.as_millis()),
                        "Check the backend host load or network path",
                    ));
                }
            }
            Err(err) => {
                self.issues.push(issue_for_error(component, err));
            }
        }
    }

    /// Fold the version result into the report.
    pub fn record_version(&mut self, version: &ApiVersionResult) {
        if !version.detected {
            self.issues.push(HealthIssue::warning(
                "API version",
                &format!("Version not detected, assuming {}", version.version),
                "Check that the base URL points at the right service",
            ));
        }
        if !version.is_compatible {
            self.issues.push(HealthIssue::critical(
                "API version",
                &format!("Version {} is not compatible", version.version),
                "Upgrade the backend or set compatibility to \"loose\"",
            ));
        } else if !version.is_supported && version.detected {
            self.issues.push(HealthIssue::info(
                "API version",
                &format!("Version {} is untested but compatible", version.version),
                "No action needed",
            ));
        }
        self.version = Some(version.clone());
    }
}

/// A status endpoint slower than this is reported as a warning.
const SLOW_RESPONSE: Duration = Duration::from_secs(5);

fn issue_for_error(component: &str, err: &ApiError) -> HealthIssue {
    let message = err.user_message();
    match &err.kind {
        ApiErrorKind::Authentication => HealthIssue::critical(
            component,
            &message,
            "Check API key configuration",
        ),
        ApiErrorKind::Network { .. } => HealthIssue::critical(
            component,
            &message,
            "Check that the service is running and the base URL is correct",
        ),
        ApiErrorKind::ServiceUnavailable { .. } | ApiErrorKind::RateLimit { .. } => {
            HealthIssue::warning(component, &message, "Try again shortly")
        }
        _ => HealthIssue::critical(
            component,
            &message,
            "Check that the base URL points at the right service",
        ),
    }
}
