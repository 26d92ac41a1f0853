// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy for backend calls.
//!
//! Every failed HTTP interaction is classified into exactly one [`ApiErrorKind`].
//! Retryability and the default backoff delay are derived from the kind, never
//! stored, so two errors of the same kind always behave the same way.
//!
//! | HTTP / condition            | Kind               | Retryable | Default delay |
//! |-----------------------------|--------------------|-----------|---------------|
//! | 401, 403                    | Authentication     | no        | -             |
//! | 429                         | RateLimit          | yes       | Retry-After, else 30s |
//! | 404                         | NotFound           | once      | 2s            |
//! | 400, 409, 422, other 4xx    | Validation         | no        | -             |
//! | 500 / 502 / 503 / 504       | ServiceUnavailable | yes       | 5s / 10s / 15s / 20s |
//! | transport failure           | Network            | yes       | 10-30s by code |
//! | HTML where JSON expected    | Validation         | no        | -             |
//!
//! User-facing text comes from [`ApiError::user_message`], which only looks at
//! the kind. Raw upstream text goes through [`sanitize_error_details`] before
//! it is logged.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

use crate::types::BackendKind;
use crate::utils::CorrelationId;

/// Result type for every backend call.
pub type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// ERROR KINDS
// =============================================================================

/// Transport-level failure codes, ordered roughly by how long recovery takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkCode {
    /// The peer actively refused the connection.
    ConnectionRefused,
    /// The connection dropped mid-request.
    ConnectionReset,
    /// The request did not complete within its timeout.
    Timeout,
    /// The host name could not be resolved.
    Dns,
    /// Anything else the transport reported.
    Other,
}

impl NetworkCode {
    /// Default wait before retrying this transport failure.
    pub fn default_delay(&self) -> Duration {
        match self {
            NetworkCode::ConnectionRefused => Duration::from_secs(10),
            NetworkCode::Other => Duration::from_secs(10),
            NetworkCode::ConnectionReset => Duration::from_secs(15),
            NetworkCode::Timeout => Duration::from_secs(20),
            NetworkCode::Dns => Duration::from_secs(30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkCode::ConnectionRefused => "connection_refused",
            NetworkCode::ConnectionReset => "connection_reset",
            NetworkCode::Timeout => "timeout",
            NetworkCode::Dns => "dns",
            NetworkCode::Other => "other",
        }
    }
}

impl std::fmt::Display for NetworkCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kinds of failure a backend call can end in.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApiErrorKind {
    #[error("authentication failed")]
    Authentication,

    #[error("rate limited")]
    RateLimit {
        #[serde(skip)]
        retry_after: Option<Duration>,
    },

    #[error("service unavailable (HTTP {status})")]
    ServiceUnavailable { status: u16 },

    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    #[error("validation failed: {details}")]
    Validation { details: String },

    #[error("network error ({code})")]
    Network { code: NetworkCode },

    /// The call succeeded at the transport level but the JSON payload did not
    /// match the expected shape. Never retried.
    #[error("malformed response: {details}")]
    MalformedResponse { details: String },
}

impl ApiErrorKind {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiErrorKind::RateLimit { .. }
                | ApiErrorKind::ServiceUnavailable { .. }
                | ApiErrorKind::NotFound { .. }
                | ApiErrorKind::Network { .. }
        )
    }

    /// Default wait before the next attempt; `None` for non-retryable kinds.
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            ApiErrorKind::RateLimit { retry_after } => {
                Some(retry_after.unwrap_or(Duration::from_secs(30)))
            }
            ApiErrorKind::NotFound { .. } => Some(Duration::from_secs(2)),
            ApiErrorKind::ServiceUnavailable { status } => Some(match status {
                502 => Duration::from_secs(10),
                503 => Duration::from_secs(15),
                504 => Duration::from_secs(20),
                _ => Duration::from_secs(5),
            }),
            ApiErrorKind::Network { code } => Some(code.default_delay()),
            ApiErrorKind::Authentication
            | ApiErrorKind::Validation { .. }
            | ApiErrorKind::MalformedResponse { .. } => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ApiErrorKind::Authentication => "authentication",
            ApiErrorKind::RateLimit { .. } => "rate_limit",
            ApiErrorKind::ServiceUnavailable { .. } => "service_unavailable",
            ApiErrorKind::NotFound { .. } => "not_found",
            ApiErrorKind::Validation { .. } => "validation",
            ApiErrorKind::Network { .. } => "network",
            ApiErrorKind::MalformedResponse { .. } => "malformed_response",
        }
    }

    /// Whether this failure says something about upstream health.
    ///
    /// Only these count towards opening the circuit breaker.
    pub fn indicates_outage(&self) -> bool {
        matches!(
            self,
            ApiErrorKind::RateLimit { .. }
                | ApiErrorKind::ServiceUnavailable { .. }
                | ApiErrorKind::Network { .. }
        )
    }
}

/// A classified backend error, tagged with where and for whom it happened.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub backend: Option<BackendKind>,
    pub correlation_id: Option<CorrelationId>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind) -> Self {
        Self {
            kind,
            backend: None,
            correlation_id: None,
        }
    }

    /// A validation error raised locally, before any request is sent.
    pub fn validation(details: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Validation {
            details: details.into(),
        })
    }

    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound {
            resource: resource.into(),
            id: id.into(),
        })
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_correlation_id(mut self, id: &CorrelationId) -> Self {
        self.correlation_id = Some(id.clone());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn retry_delay(&self) -> Option<Duration> {
        self.kind.retry_delay()
    }

    /// Actionable message safe to show to an end user.
    ///
    /// Derived from the kind only; upstream text never appears here except the
    /// sanitized details of a validation failure.
    pub fn user_message(&self) -> String {
        let name = self
            .backend
            .map(|b| b.display_name())
            .unwrap_or("backend service");

        match &self.kind {
            ApiErrorKind::Authentication => format!(
                "Authentication with the {} failed. Check API key configuration.",
                name
            ),
            ApiErrorKind::RateLimit { .. } => format!(
                "The {} is rate limiting requests. Try again shortly.",
                name
            ),
            ApiErrorKind::ServiceUnavailable { .. } => format!(
                "The {} is temporarily unavailable. Try again shortly.",
                name
            ),
            ApiErrorKind::NotFound { resource, .. } => {
                format!("The requested {} was not found in the {}.", resource, name)
            }
            ApiErrorKind::Validation { details } => format!(
                "The request was rejected: {}",
                sanitize_error_details(details)
            ),
            ApiErrorKind::Network { .. } => format!(
                "Could not reach the {}. Check that it is running and the base URL is correct.",
                name
            ),
            ApiErrorKind::MalformedResponse { .. } => format!(
                "The {} returned an unexpected response. Check that the base URL points at the right service.",
                name
            ),
        }
    }
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// A transport failure as reported by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct TransportError {
    pub code: NetworkCode,
    pub message: String,
}

impl TransportError {
    pub fn new(code: NetworkCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// An unclassified failure observed by the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFailure<'a> {
    /// The request never produced an HTTP response.
    Transport(&'a TransportError),
    /// The backend answered with a non-success status.
    Status {
        status: u16,
        retry_after: Option<Duration>,
        path: &'a str,
    },
    /// A successful status, but the body is HTML where JSON was expected.
    UnexpectedHtml { status: u16 },
}

/// Map a raw failure to its error kind.
///
/// Pure and deterministic: identical input always yields an identical kind.
pub fn classify(failure: &RawFailure<'_>) -> ApiErrorKind {
    match failure {
        RawFailure::Transport(err) => ApiErrorKind::Network { code: err.code },
        RawFailure::UnexpectedHtml { status } => ApiErrorKind::Validation {
            details: format!(
                "expected JSON but received HTML (HTTP {}); the request was probably redirected to a login page",
                status
            ),
        },
        RawFailure::Status {
            status,
            retry_after,
            path,
        } => match status {
            401 | 403 => ApiErrorKind::Authentication,
            429 => ApiErrorKind::RateLimit {
                retry_after: *retry_after,
            },
            404 => {
                let (resource, id) = resource_from_path(path);
                ApiErrorKind::NotFound { resource, id }
            }
            500..=599 => ApiErrorKind::ServiceUnavailable { status: *status },
            _ => ApiErrorKind::Validation {
                details: format!("HTTP {}", status),
            },
        },
    }
}

/// Derive `(resource, id)` from a REST path like `/api/v3/series/42`.
fn resource_from_path(path: &str) -> (String, String) {
    let path = path.split('?').next().unwrap_or(path);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        [.., resource, id] if id.chars().all(|c| c.is_ascii_digit()) => {
            (resource.to_string(), id.to_string())
        }
        [.., resource] => (resource.to_string(), String::new()),
        [] => ("resource".to_string(), String::new()),
    }
}

// =============================================================================
// ERROR SANITIZATION
// =============================================================================

/// Patterns for sanitizing sensitive information from error messages.
/// These patterns are compiled once at startup.
static SANITIZE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // Credentials carried in query strings or headers
        (Regex::new(r"(?i)(api_?key|apikey|userid|token)=[^&\s]+").expect("Query credential regex"), "$1=[REDACTED]"),
        (Regex::new(r"(?i)x-api-key:\s*[^\s,]+").expect("Header credential regex"), "X-Api-Key: [REDACTED]"),
        (Regex::new(r"Bearer [a-zA-Z0-9-._~+/]+=*").expect("Bearer token regex"), "Bearer [TOKEN_REDACTED]"),

        // 32-char hex keys used by the series and movie managers
        (Regex::new(r"\b[a-fA-F0-9]{32}\b").expect("Hex key regex"), "[API_KEY_REDACTED]"),

        // File paths (Windows and Unix)
        (Regex::new(r"[A-Za-z]:\\[^\s]+").expect("Windows path regex"), "[PATH_REDACTED]"),
        (Regex::new(r"/(?:home|usr|var|etc|opt|tmp|root|mnt|media|data)/[^\s]+").expect("Unix path regex"), "[PATH_REDACTED]"),

        // IP addresses
        (Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("IPv4 regex"), "[IP_REDACTED]"),

        // Email addresses (PII)
        (Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("Email regex"), "[EMAIL_REDACTED]"),

        // Generic long alphanumeric strings (potential secrets)
        (Regex::new(r"\b[A-Za-z0-9]{40,}\b").expect("Long secret regex"), "[SECRET_REDACTED]"),
    ]
});

/// Sanitize error details to remove sensitive information.
///
/// Removes credentials (query, header and bare hex keys), file paths, IP
/// addresses, emails and long opaque secrets.
pub fn sanitize_error_details(error: &str) -> String {
    let mut result = error.to_string();

    for (pattern, replacement) in SANITIZE_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }

    result
}

/// Check if an error message contains potentially sensitive information.
pub fn contains_sensitive_info(error: &str) -> bool {
    SANITIZE_PATTERNS
        .iter()
        .any(|(pattern, _)| pattern.is_match(error))
}
