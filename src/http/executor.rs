// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request executor.
//!
//! One [`RequestExecutor`] per backend client. For each logical call it:
//!
//! 1. asks the circuit breaker for permission (fails fast when open)
//! 2. builds the request: base URL + path, auth headers or query params,
//!    `X-Correlation-Id`, per-attempt timeout clamped to the deadline
//! 3. sends it, classifies any failure, and asks the [`RetryPolicy`] whether
//!    to go again and how long to wait
//! 4. reports every attempt and the overall call to a [`RequestObserver`]
//!
//! The executor owns retry exhaustion. Callers get one terminal [`ApiError`],
//! never a raw transport error.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use super::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use crate::auth::AuthStrategy;
use crate::circuit::{CircuitBreaker, CircuitState};
use crate::clock::{Sleeper, TokioSleeper};
use crate::config::ClientConfig;
use crate::errors::{
    classify, sanitize_error_details, ApiError, ApiErrorKind, ApiResult, NetworkCode, RawFailure,
};
use crate::retry::RetryPolicy;
use crate::types::{BackendKind, HttpMethod};
use crate::utils::OperationContext;

/// Header carrying the correlation id on every outbound request.
pub const CORRELATION_HEADER: &str = "X-Correlation-Id";

// =============================================================================
// REQUEST DESCRIPTION
// =============================================================================

/// A logical API call, relative to the backend's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Path starting with `/`, without query string.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Put, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Narrow the attempt budget for this call (never widens it).
    pub max_attempts: Option<u32>,
}

impl RequestOptions {
    /// A single attempt, no retries.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: Some(1),
        }
    }
}

// =============================================================================
// OBSERVER
// =============================================================================

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success { status: u16 },
    Failure {
        kind: &'static str,
        status: Option<u16>,
        /// Sanitized upstream or transport text.
        detail: String,
        /// Wait before the next attempt; `None` when this was the last one.
        retry_in: Option<Duration>,
    },
}

/// One HTTP attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptEvent {
    pub backend: BackendKind,
    pub correlation_id: String,
    pub method: HttpMethod,
    pub path: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub duration: Duration,
    pub outcome: AttemptOutcome,
}

/// One logical call, after all attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEvent {
    pub backend: BackendKind,
    pub correlation_id: String,
    pub method: HttpMethod,
    pub path: String,
    pub attempts: u32,
    pub duration: Duration,
    /// Error label, `None` on success.
    pub error: Option<&'static str>,
}

/// Receives executor events. All logging of the retry loop goes through here.
pub trait RequestObserver: Send + Sync {
    fn on_attempt(&self, event: &AttemptEvent);
    fn on_call(&self, event: &CallEvent);
}

/// Default observer: structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RequestObserver for TracingObserver {
    fn on_attempt(&self, event: &AttemptEvent) {
        match &event.outcome {
            AttemptOutcome::Success { status } => tracing::debug!(
                backend = %event.backend,
                correlation_id = %event.correlation_id,
                method = %event.method,
                path = %event.path,
                attempt = event.attempt,
                status = *status,
                duration_ms = event.duration.as_millis() as u64,
                "Request attempt succeeded"
            ),
            AttemptOutcome::Failure {
                kind,
                status,
                detail,
                retry_in,
            } => tracing::warn!(
                backend = %event.backend,
                correlation_id = %event.correlation_id,
                method = %event.method,
                path = %event.path,
                attempt = event.attempt,
                max_attempts = event.max_attempts,
                kind = *kind,
                status = ?status,
                retry_in_ms = retry_in.map(|d| d.as_millis() as u64),
                duration_ms = event.duration.as_millis() as u64,
                "Request attempt failed: {}",
                detail
            ),
        }
    }

    fn on_call(&self, event: &CallEvent) {
        match event.error {
            None => tracing::info!(
                backend = %event.backend,
                correlation_id = %event.correlation_id,
                method = %event.method,
                path = %event.path,
                attempts = event.attempts,
                duration_ms = event.duration.as_millis() as u64,
                "Request completed"
            ),
            Some(kind) => tracing::error!(
                backend = %event.backend,
                correlation_id = %event.correlation_id,
                method = %event.method,
                path = %event.path,
                attempts = event.attempts,
                kind,
                duration_ms = event.duration.as_millis() as u64,
                "Request failed"
            ),
        }
    }
}

// =============================================================================
// EXECUTOR
// =============================================================================

/// Drives one backend's HTTP calls through auth, retries and the breaker.
pub struct RequestExecutor {
    backend: BackendKind,
    base_url: String,
    timeout: Duration,
    auth: AuthStrategy,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
    transport: Arc<dyn HttpTransport>,
    sleeper: Arc<dyn Sleeper>,
    observer: Arc<dyn RequestObserver>,
}

impl RequestExecutor {
    /// Executor over an explicit transport.
    pub fn new(config: &ClientConfig, auth: AuthStrategy, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            backend: config.backend,
            base_url: config.base_url.clone(),
            timeout: config.timeout,
            auth,
            policy: RetryPolicy::new(config),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            transport,
            sleeper: Arc::new(TokioSleeper),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Executor over a pooled reqwest transport.
    pub fn from_config(config: &ClientConfig, auth: AuthStrategy) -> ApiResult<Self> {
        let transport = ReqwestTransport::new(&config.pool).map_err(|e| {
            ApiError::new(ApiErrorKind::Network { code: e.code }).with_backend(config.backend)
        })?;
        Ok(Self::new(config, auth, Arc::new(transport)))
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn auth(&self) -> &AuthStrategy {
        &self.auth
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Execute and decode a JSON response.
    ///
    /// An empty body decodes as JSON `null`, so `Option<T>` works for
    /// endpoints that may return nothing.
    pub async fn execute<T: DeserializeOwned>(&self, ctx: &OperationContext, request: ApiRequest) -> ApiResult<T> {
        self.execute_with(ctx, request, RequestOptions::default()).await
    }

    pub async fn execute_with<T: DeserializeOwned>(
        &self,
        ctx: &OperationContext,
        request: ApiRequest,
        options: RequestOptions,
    ) -> ApiResult<T> {
        self.call(ctx, &request, options, |response| decode_json(&response.body))
            .await
    }

    /// Execute and discard the body.
    pub async fn execute_empty(&self, ctx: &OperationContext, request: ApiRequest) -> ApiResult<()> {
        self.call(ctx, &request, RequestOptions::default(), |_| Ok(()))
            .await
    }

    async fn call<T, F>(
        &self,
        ctx: &OperationContext,
        request: &ApiRequest,
        options: RequestOptions,
        decode: F,
    ) -> ApiResult<T>
    where
        F: FnOnce(&HttpResponse) -> Result<T, ApiErrorKind>,
    {
        let started = Instant::now();
        let (result, attempts) = self.run(ctx, request, options).await;

        let result = result.and_then(|response| {
            decode(&response).map_err(|kind| self.error(ctx, kind))
        });

        self.observer.on_call(&CallEvent {
            backend: self.backend,
            correlation_id: ctx.correlation_id.to_string(),
            method: request.method,
            path: request.path.clone(),
            attempts,
            duration: started.elapsed(),
            error: result.as_ref().err().map(|e| e.kind.label()),
        });

        result
    }

    /// The retry loop. Returns the terminal result and how many attempts ran.
    async fn run(
        &self,
        ctx: &OperationContext,
        request: &ApiRequest,
        options: RequestOptions,
    ) -> (ApiResult<HttpResponse>, u32) {
        // Dropping the permit unsettled (cancellation, bad URL) frees a
        // half-open probe slot.
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(open) => {
                tracing::debug!(
                    backend = %self.backend,
                    correlation_id = %ctx.correlation_id,
                    retry_in_ms = open.retry_in.as_millis() as u64,
                    "Circuit open, failing fast"
                );
                let kind = ApiErrorKind::ServiceUnavailable { status: 503 };
                return (Err(self.error(ctx, kind)), 0);
            }
        };

        let url = match self.build_url(request) {
            Ok(url) => url,
            Err(kind) => {
                drop(permit);
                return (Err(self.error(ctx, kind)), 0);
            }
        };

        let policy = match options.max_attempts {
            Some(n) => self.policy.clone().with_max_attempts(n.max(1).min(self.policy.max_attempts)),
            None => self.policy.clone(),
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let Some(timeout) = self.attempt_timeout(ctx) else {
                let kind = ApiErrorKind::Network {
                    code: NetworkCode::Timeout,
                };
                permit.failure(&kind);
                return (Err(self.error(ctx, kind)), attempt - 1);
            };

            let http_request = HttpRequest {
                method: request.method,
                url: url.clone(),
                headers: self.headers(ctx),
                body: request.body.clone(),
                timeout,
            };

            let sent_at = Instant::now();
            let outcome = self.transport.send(http_request).await;
            let duration = sent_at.elapsed();

            let (kind, status, detail) = match outcome {
                Ok(response) if response.is_success() && !response.is_html() => {
                    self.observer.on_attempt(&self.attempt_event(
                        ctx,
                        request,
                        attempt,
                        policy.max_attempts,
                        duration,
                        AttemptOutcome::Success {
                            status: response.status,
                        },
                    ));
                    permit.success();
                    return (Ok(response), attempt);
                }
                Ok(response) if response.is_success() => (
                    classify(&RawFailure::UnexpectedHtml {
                        status: response.status,
                    }),
                    Some(response.status),
                    "HTML body".to_string(),
                ),
                Ok(response) => (
                    classify(&RawFailure::Status {
                        status: response.status,
                        retry_after: response.retry_after,
                        path: &request.path,
                    }),
                    Some(response.status),
                    truncate(&sanitize_error_details(&response.body), 200),
                ),
                Err(err) => (
                    classify(&RawFailure::Transport(&err)),
                    None,
                    sanitize_error_details(&err.message),
                ),
            };

            let decision = policy.decide(attempt, &kind);
            let retry_in = decision.should_retry.then_some(decision.delay);
            let fits_deadline = match (retry_in, ctx.remaining()) {
                (Some(delay), Some(remaining)) => delay < remaining,
                _ => true,
            };
            let retry_in = retry_in.filter(|_| fits_deadline);

            self.observer.on_attempt(&self.attempt_event(
                ctx,
                request,
                attempt,
                policy.max_attempts,
                duration,
                AttemptOutcome::Failure {
                    kind: kind.label(),
                    status,
                    detail,
                    retry_in,
                },
            ));

            match retry_in {
                Some(delay) => self.sleeper.sleep(delay).await,
                None => {
                    permit.failure(&kind);
                    return (Err(self.error(ctx, kind)), attempt);
                }
            }
        }
    }

    fn build_url(&self, request: &ApiRequest) -> Result<String, ApiErrorKind> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path)).map_err(|e| {
            ApiErrorKind::Validation {
                details: format!("invalid request path {}: {}", request.path, e),
            }
        })?;

        let auth_params = self.auth.query_params();
        if !request.query.is_empty() || !auth_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in request.query.iter().chain(auth_params.iter()) {
                pairs.append_pair(key, value);
            }
        }

        Ok(url.into())
    }

    fn headers(&self, ctx: &OperationContext) -> Vec<(String, String)> {
        let mut headers = self.auth.headers();
        headers.push((CORRELATION_HEADER.to_string(), ctx.correlation_id.to_string()));
        headers
    }

    /// Configured timeout clamped to the deadline; `None` once it has passed.
    fn attempt_timeout(&self, ctx: &OperationContext) -> Option<Duration> {
        match ctx.remaining() {
            None => Some(self.timeout),
            Some(remaining) if remaining.is_zero() => None,
            Some(remaining) => Some(self.timeout.min(remaining)),
        }
    }

    fn attempt_event(
        &self,
        ctx: &OperationContext,
        request: &ApiRequest,
        attempt: u32,
        max_attempts: u32,
        duration: Duration,
        outcome: AttemptOutcome,
    ) -> AttemptEvent {
        AttemptEvent {
            backend: self.backend,
            correlation_id: ctx.correlation_id.to_string(),
            method: request.method,
            path: request.path.clone(),
            attempt,
            max_attempts,
            duration,
            outcome,
        }
    }

    fn error(&self, ctx: &OperationContext, kind: ApiErrorKind) -> ApiError {
        ApiError::new(kind)
            .with_backend(self.backend)
            .with_correlation_id(&ctx.correlation_id)
    }
}

fn decode_json<T: DeserializeOwned>(body: &str) -> Result<T, ApiErrorKind> {
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body).map_err(|e| ApiErrorKind::MalformedResponse {
        details: e.to_string(),
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::InstantSleeper;
    use crate::errors::TransportError;
    use crate::locks::resilient_lock;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        sent: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<HttpRequest> {
            resilient_lock(&self.sent).clone()
        }
    }

    #[async_trait]
    impl HttpTransport for Scripted {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            resilient_lock(&self.sent).push(request);
            resilient_lock(&self.responses)
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::json(500, "script exhausted")))
        }
    }

    #[derive(Default)]
    struct Recorder {
        attempts: Mutex<Vec<AttemptEvent>>,
        calls: Mutex<Vec<CallEvent>>,
    }

    impl RequestObserver for Recorder {
        fn on_attempt(&self, event: &AttemptEvent) {
            resilient_lock(&self.attempts).push(event.clone());
        }
        fn on_call(&self, event: &CallEvent) {
            resilient_lock(&self.calls).push(event.clone());
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::new(BackendKind::SeriesManager, "http://sonarr.local:8989").unwrap()
    }

    fn executor(
        transport: Arc<Scripted>,
        auth: AuthStrategy,
    ) -> (RequestExecutor, Arc<InstantSleeper>, Arc<Recorder>) {
        let sleeper = Arc::new(InstantSleeper::new());
        let recorder = Arc::new(Recorder::default());
        let exec = RequestExecutor::new(&config(), auth, transport)
            .with_sleeper(sleeper.clone())
            .with_observer(recorder.clone());
        (exec, sleeper, recorder)
    }

    #[tokio::test]
    async fn test_auth_and_correlation_headers() {
        let transport = Scripted::new(vec![Ok(HttpResponse::json(200, r#"{"ok":true}"#))]);
        let (exec, _, _) = executor(transport.clone(), AuthStrategy::api_key_header("key123"));
        let ctx = OperationContext::new();

        let value: serde_json::Value = exec
            .execute(&ctx, ApiRequest::get("/api/v3/series").with_query("term", "the wire"))
            .await
            .unwrap();
        assert_eq!(value["ok"], true);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header("x-api-key"), Some("key123"));
        assert_eq!(sent[0].header(CORRELATION_HEADER), Some(ctx.correlation_id.as_str()));
        assert_eq!(sent[0].url, "http://sonarr.local:8989/api/v3/series?term=the+wire");
    }

    #[tokio::test]
    async fn test_query_auth_appended() {
        let transport = Scripted::new(vec![Ok(HttpResponse::json(200, "[]"))]);
        let auth = AuthStrategy::api_key_query("abc", Some("u1".to_string()));
        let (exec, _, _) = executor(transport.clone(), auth);

        let _: Vec<serde_json::Value> = exec
            .execute(&OperationContext::new(), ApiRequest::get("/Items"))
            .await
            .unwrap();

        assert!(transport.sent()[0].url.ends_with("/Items?api_key=abc&userId=u1"));
        assert!(transport.sent()[0].header("x-api-key").is_none());
    }

    #[tokio::test]
    async fn test_non_retryable_stops_after_one_attempt() {
        let transport = Scripted::new(vec![Ok(HttpResponse::json(401, "nope"))]);
        let (exec, sleeper, recorder) = executor(transport.clone(), AuthStrategy::None);
        let ctx = OperationContext::new();

        let err = exec
            .execute::<serde_json::Value>(&ctx, ApiRequest::get("/api/v3/system/status"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::Authentication);
        assert_eq!(err.backend, Some(BackendKind::SeriesManager));
        assert_eq!(err.correlation_id.as_ref(), Some(&ctx.correlation_id));
        assert_eq!(transport.sent().len(), 1);
        assert!(sleeper.requested().is_empty());
        assert_eq!(resilient_lock(&recorder.calls)[0].error, Some("authentication"));
    }

    #[tokio::test]
    async fn test_exhausts_attempts_then_returns_terminal_error() {
        let transport = Scripted::new(vec![
            Ok(HttpResponse::json(502, "")),
            Ok(HttpResponse::json(502, "")),
            Ok(HttpResponse::json(502, "")),
            Ok(HttpResponse::json(200, "{}")),
        ]);
        let (exec, sleeper, recorder) = executor(transport.clone(), AuthStrategy::None);

        let err = exec
            .execute::<serde_json::Value>(&OperationContext::new(), ApiRequest::get("/api/v3/queue"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::ServiceUnavailable { status: 502 });
        assert_eq!(transport.sent().len(), 3);
        assert_eq!(sleeper.requested().len(), 2);
        assert_eq!(resilient_lock(&recorder.attempts).len(), 3);
        assert_eq!(resilient_lock(&recorder.calls)[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_rate_limit_waits_retry_after() {
        let mut limited = HttpResponse::json(429, "");
        limited.retry_after = Some(Duration::from_secs(7));
        let transport = Scripted::new(vec![Ok(limited), Ok(HttpResponse::json(200, "1"))]);
        let (exec, sleeper, _) = executor(transport, AuthStrategy::None);

        let n: u32 = exec
            .execute(&OperationContext::new(), ApiRequest::get("/api/v3/series"))
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(sleeper.requested(), vec![Duration::from_secs(7)]);
    }

    #[tokio::test]
    async fn test_html_on_success_is_validation_and_not_retried() {
        let html = HttpResponse {
            status: 200,
            content_type: Some("text/html".to_string()),
            retry_after: None,
            body: "<html>login</html>".to_string(),
        };
        let transport = Scripted::new(vec![Ok(html)]);
        let (exec, _, _) = executor(transport.clone(), AuthStrategy::None);

        let err = exec
            .execute::<serde_json::Value>(&OperationContext::new(), ApiRequest::get("/api/v3/series"))
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ApiErrorKind::Validation { .. }));
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_json_surfaces_without_retry() {
        let transport = Scripted::new(vec![Ok(HttpResponse::json(200, "{not json"))]);
        let (exec, _, recorder) = executor(transport.clone(), AuthStrategy::None);

        let err = exec
            .execute::<serde_json::Value>(&OperationContext::new(), ApiRequest::get("/api/v3/series"))
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ApiErrorKind::MalformedResponse { .. }));
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(resilient_lock(&recorder.calls)[0].error, Some("malformed_response"));
    }

    #[tokio::test]
    async fn test_single_attempt_option() {
        let transport = Scripted::new(vec![Ok(HttpResponse::json(503, ""))]);
        let (exec, sleeper, _) = executor(transport.clone(), AuthStrategy::None);

        let result = exec
            .execute_with::<serde_json::Value>(
                &OperationContext::new(),
                ApiRequest::get("/api/v3/system/status"),
                RequestOptions::single_attempt(),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(transport.sent().len(), 1);
        assert!(sleeper.requested().is_empty());
    }

    #[tokio::test]
    async fn test_does_not_sleep_past_deadline() {
        let transport = Scripted::new(vec![Ok(HttpResponse::json(503, ""))]);
        let (exec, sleeper, _) = executor(transport.clone(), AuthStrategy::None);
        // 503 wants 15s; only 1s left
        let ctx = OperationContext::with_timeout(Duration::from_secs(1));

        let err = exec
            .execute::<serde_json::Value>(&ctx, ApiRequest::get("/api/v3/series"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::ServiceUnavailable { status: 503 });
        assert_eq!(transport.sent().len(), 1);
        assert!(sleeper.requested().is_empty());
        assert!(transport.sent()[0].timeout <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let transport = Scripted::new(vec![
            Err(TransportError::new(NetworkCode::ConnectionRefused, "refused")),
        ]);
        let config = config()
            .with_max_retries(1)
            .with_breaker(crate::config::BreakerConfig {
                failure_threshold: 1,
                open_duration: Duration::from_secs(60),
            });
        let exec = RequestExecutor::new(&config, AuthStrategy::None, transport.clone())
            .with_sleeper(Arc::new(InstantSleeper::new()));
        let ctx = OperationContext::new();

        let first = exec
            .execute::<serde_json::Value>(&ctx, ApiRequest::get("/api/v3/series"))
            .await
            .unwrap_err();
        assert!(matches!(first.kind, ApiErrorKind::Network { .. }));
        assert_eq!(exec.circuit_state(), CircuitState::Open);

        let second = exec
            .execute::<serde_json::Value>(&ctx, ApiRequest::get("/api/v3/series"))
            .await
            .unwrap_err();
        assert_eq!(second.kind, ApiErrorKind::ServiceUnavailable { status: 503 });
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_body_decodes_as_none() {
        let transport = Scripted::new(vec![Ok(HttpResponse::json(200, ""))]);
        let (exec, _, _) = executor(transport, AuthStrategy::None);

        let value: Option<serde_json::Value> = exec
            .execute(&OperationContext::new(), ApiRequest::delete("/api/v3/series/1"))
            .await
            .unwrap();
        assert!(value.is_none());
    }

    /// Refuses once, hangs on the next call, then answers.
    #[derive(Default)]
    struct Flaky {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl HttpTransport for Flaky {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let call = {
                let mut calls = resilient_lock(&self.calls);
                *calls += 1;
                *calls
            };
            match call {
                1 => Err(TransportError::new(NetworkCode::ConnectionRefused, "refused")),
                2 => std::future::pending().await,
                _ => Ok(HttpResponse::json(200, "{}")),
            }
        }
    }

    #[tokio::test]
    async fn test_cancelled_half_open_call_does_not_wedge_circuit() {
        let config = config()
            .with_max_retries(1)
            .with_breaker(crate::config::BreakerConfig {
                failure_threshold: 1,
                open_duration: Duration::from_millis(1),
            });
        let exec = RequestExecutor::new(&config, AuthStrategy::None, Arc::new(Flaky::default()))
            .with_sleeper(Arc::new(InstantSleeper::new()));
        let ctx = OperationContext::new();

        assert!(exec
            .execute::<serde_json::Value>(&ctx, ApiRequest::get("/api/v3/series"))
            .await
            .is_err());
        assert_eq!(exec.circuit_state(), CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(5)).await;

        // The half-open call hangs and is abandoned by its caller
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            exec.execute::<serde_json::Value>(&ctx, ApiRequest::get("/api/v3/series")),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(exec.circuit_state(), CircuitState::HalfOpen);

        let recovered = exec
            .execute::<serde_json::Value>(&ctx, ApiRequest::get("/api/v3/series"))
            .await;
        assert!(recovered.is_ok(), "{:?}", recovered);
        assert_eq!(exec.circuit_state(), CircuitState::Closed);
    }
}
