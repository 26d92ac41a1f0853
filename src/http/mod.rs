// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP transport abstraction.
//!
//! The executor talks to an [`HttpTransport`] rather than to reqwest directly,
//! so the retry, classification and circuit logic can be exercised in tests
//! with a scripted transport. [`ReqwestTransport`] is the production
//! implementation.

pub mod executor;

pub use executor::{
    ApiRequest, AttemptEvent, AttemptOutcome, CallEvent, RequestExecutor, RequestObserver,
    RequestOptions, TracingObserver, CORRELATION_HEADER,
};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::config::PoolConfig;
use crate::errors::{NetworkCode, TransportError};
use crate::types::HttpMethod;

/// A fully built request, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Absolute URL including any query string.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
}

impl HttpRequest {
    /// Value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What came back from the backend, whatever the status.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl HttpResponse {
    /// A JSON response, mostly for tests.
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false)
    }
}

/// Sends one HTTP request. No retries, no classification.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport with a bounded number of in-flight requests.
pub struct ReqwestTransport {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
}

impl ReqwestTransport {
    pub fn new(pool: &PoolConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(pool.max_free_sockets)
            .pool_idle_timeout(pool.idle_timeout)
            .user_agent(concat!("arrgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::new(NetworkCode::Other, e.to_string()))?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(pool.max_sockets.max(1))),
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        // The slot wait counts against the request's own timeout.
        let started = Instant::now();
        let _permit = match tokio::time::timeout(request.timeout, self.permits.acquire()).await {
            Ok(permit) => permit.map_err(|e| TransportError::new(NetworkCode::Other, e.to_string()))?,
            Err(_) => {
                return Err(TransportError::new(
                    NetworkCode::Timeout,
                    format!("no connection slot free within {}ms", request.timeout.as_millis()),
                ))
            }
        };
        let remaining = request.timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(TransportError::new(NetworkCode::Timeout, "timed out before sending"));
        }

        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(remaining)
            .header(reqwest::header::ACCEPT, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let retry_after = headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status,
            content_type,
            retry_after,
            body,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    let code = if err.is_timeout() {
        NetworkCode::Timeout
    } else if err.is_connect() {
        network_code_from_message(&format!("{:?}", err))
    } else if err.is_request() || err.is_body() || err.is_decode() {
        NetworkCode::ConnectionReset
    } else {
        NetworkCode::Other
    };
    TransportError::new(code, err.to_string())
}

/// Refine a connect failure from the error chain text.
fn network_code_from_message(message: &str) -> NetworkCode {
    let lower = message.to_ascii_lowercase();
    if lower.contains("dns") || lower.contains("failed to lookup") || lower.contains("name or service not known") {
        NetworkCode::Dns
    } else if lower.contains("reset") || lower.contains("broken pipe") {
        NetworkCode::ConnectionReset
    } else {
        NetworkCode::ConnectionRefused
    }
}

/// Parse a `Retry-After` header: delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
