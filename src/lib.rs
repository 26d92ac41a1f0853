// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! arrgate - Resilient API gateway for self-hosted media managers
//!
//! One typed client layer over a series manager, a movie manager and a media
//! library server, with an orchestration layer on top that turns "get this
//! show" into the right sequence of backend calls.
//!
//! Every call goes through the same pipeline:
//!
//! **Auth** -> **Circuit breaker** -> **Request** -> **Classify** -> **Retry**
//!
//! # Core Modules
//!
//! - [`errors`] - Error taxonomy, classification and sanitizing
//! - [`auth`] - Credential placement (header or query)
//! - [`retry`] - Retry decisions and backoff
//! - [`circuit`] - Per-client circuit breaker
//! - [`http`] - Transport seam and the request executor
//! - [`version`] - API version probing and compatibility
//! - [`backends`] - Typed clients for the three backends
//! - [`monitoring`] - Series and movie orchestration
//! - [`health`] - Health reports
//! - [`config`] - Client configuration and the config file

pub mod auth;
pub mod backends;
pub mod circuit;
pub mod clock;
pub mod config;
pub mod errors;
pub mod health;
pub mod http;
pub mod locks;
pub mod monitoring;
pub mod retry;
pub mod types;
pub mod utils;
pub mod version;

// Re-export commonly used types
pub use types::{BackendKind, CompatibilityMode, HttpMethod};
pub use utils::{mask_sensitive, CorrelationId, OperationContext};

pub use auth::AuthStrategy;
pub use config::{BackendSettings, ClientConfig, Config, ConfigError};

pub use errors::{
    classify, contains_sensitive_info, sanitize_error_details, ApiError, ApiErrorKind, ApiResult, NetworkCode,
    RawFailure, TransportError,
};

pub use retry::{RetryDecision, RetryPolicy};
pub use circuit::{CallPermit, CircuitBreaker, CircuitState};
pub use clock::{InstantSleeper, Sleeper, TokioSleeper};

pub use http::{
    ApiRequest, HttpRequest, HttpResponse, HttpTransport, RequestExecutor, RequestObserver, RequestOptions,
    ReqwestTransport,
};

pub use version::{ApiVersionResult, VersionNegotiator};

pub use backends::{BackendClient, Capabilities, LibraryClient, MovieClient, SeriesClient};

pub use monitoring::{
    AddMovieRequest, ChangeAction, EpisodeSelection, MonitorRequest, MonitoringChange, MonitoringOutcome,
    MovieOrchestrator, MovieOutcome, OrchestrationError, RemoveMovieRequest, SeriesOrchestrator, UnmonitorRequest,
};

pub use health::{HealthIssue, HealthStatus, Severity};
