// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Authentication strategies.
//!
//! Each backend authenticates differently: the series and movie managers take
//! an `X-Api-Key` header, the library server takes `api_key` and `userId`
//! query parameters. The strategy is a value owned by the client and handed
//! to the executor, which merges its output into every request.

use crate::utils::mask_sensitive;

/// Header used by the series and movie managers.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// How credentials are attached to outgoing requests.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// No credentials (public endpoints, tests).
    None,
    /// A single header carrying the API key.
    Header { name: String, value: String },
    /// Credentials carried as query parameters.
    QueryParams(Vec<(String, String)>),
}

impl AuthStrategy {
    /// `X-Api-Key: <key>` header auth.
    pub fn api_key_header(key: impl Into<String>) -> Self {
        Self::Header {
            name: API_KEY_HEADER.to_string(),
            value: key.into(),
        }
    }

    /// `?api_key=<key>&userId=<user>` query auth. The user id is optional.
    pub fn api_key_query(key: impl Into<String>, user_id: Option<String>) -> Self {
        let mut params = vec![("api_key".to_string(), key.into())];
        if let Some(user_id) = user_id {
            params.push(("userId".to_string(), user_id));
        }
        Self::QueryParams(params)
    }

    /// Headers to add to a request.
    pub fn headers(&self) -> Vec<(String, String)> {
        match self {
            Self::Header { name, value } => vec![(name.clone(), value.clone())],
            _ => Vec::new(),
        }
    }

    /// Query parameters to add to a request.
    pub fn query_params(&self) -> Vec<(String, String)> {
        match self {
            Self::QueryParams(params) => params.clone(),
            _ => Vec::new(),
        }
    }

    /// Value of a named query parameter, if this strategy carries it.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        match self {
            Self::QueryParams(params) => params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    /// Whether any credential is configured.
    pub fn is_configured(&self) -> bool {
        match self {
            Self::None => false,
            Self::Header { value, .. } => !value.is_empty(),
            Self::QueryParams(params) => params.iter().any(|(_, v)| !v.is_empty()),
        }
    }
}

// Never print credentials, even in debug output.
impl std::fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("AuthStrategy::None"),
            Self::Header { name, value } => f
                .debug_struct("AuthStrategy::Header")
                .field("name", name)
                .field("value", &mask_sensitive(value, 4))
                .finish(),
            Self::QueryParams(params) => {
                let masked: Vec<(String, String)> = params
                    .iter()
                    .map(|(k, v)| (k.clone(), mask_sensitive(v, 4)))
                    .collect();
                f.debug_tuple("AuthStrategy::QueryParams")
                    .field(&masked)
                    .finish()
            }
        }
    }
}
