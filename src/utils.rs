// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Utility functions for arrgate.
//!
//! This module provides common utility functions used across the codebase.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Mask a sensitive string (like API keys) for logging.
///
/// Shows only the first `visible_prefix` characters and replaces the rest with "...".
/// This ensures API keys are never logged in full.
///
/// # Examples
///
/// ```
/// use arrgate::utils::mask_sensitive;
///
/// let api_key = "0123456789abcdef0123456789abcdef";
/// let masked = mask_sensitive(&api_key, 4);
/// assert_eq!(masked, "0123...");
/// ```
pub fn mask_sensitive(input: &str, visible_prefix: usize) -> String {
    if input.chars().count() <= visible_prefix {
        // Shorter than the prefix: hide it entirely rather than leak it
        return "...".to_string();
    }

    let prefix: String = input.chars().take(visible_prefix).collect();
    format!("{}...", prefix)
}

/// Opaque identifier threaded through one logical user operation.
///
/// Format: `op-YYYYMMDD-XXXXXXXX` (e.g. `op-20250115-A3F8K2QZ`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh correlation id.
    pub fn generate() -> Self {
        let date = Utc::now().format("%Y%m%d");
        let mut rng = rand::thread_rng();
        let chars: Vec<char> = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789".chars().collect();
        let random: String = (0..8)
            .map(|_| chars[rng.gen_range(0..chars.len())])
            .collect();
        Self(format!("op-{}-{}", date, random))
    }

    /// Wrap an id received from a caller (e.g. an upstream interaction id).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-operation context: the correlation id and an optional overall deadline.
///
/// Created once at the top of a logical operation and passed by reference to
/// every backend call made while servicing it.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub correlation_id: CorrelationId,
    pub deadline: Option<Instant>,
}

impl OperationContext {
    /// New context with a generated correlation id and no deadline.
    pub fn new() -> Self {
        Self {
            correlation_id: CorrelationId::generate(),
            deadline: None,
        }
    }

    /// New context that must finish within `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            correlation_id: CorrelationId::generate(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Replace the correlation id.
    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = id;
        self
    }

    /// Time left before the deadline. `None` means unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// True once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_sensitive() {
        assert_eq!(mask_sensitive("abcdef0123456789", 4), "abcd...");
        assert_eq!(mask_sensitive("abc", 4), "...");
        assert_eq!(mask_sensitive("", 4), "...");
    }

    #[test]
    fn test_correlation_id_format() {
        let id = CorrelationId::generate();
        assert!(id.as_str().starts_with("op-"));
        assert_eq!(id.as_str().len(), "op-20250101-ABCDEFGH".len());
        assert_ne!(id, CorrelationId::generate());
    }

    #[test]
    fn test_context_deadline() {
        let ctx = OperationContext::new();
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_expired());

        let ctx = OperationContext::with_timeout(Duration::from_secs(60));
        assert!(ctx.remaining().unwrap() > Duration::from_secs(50));

        let ctx = OperationContext::with_timeout(Duration::ZERO);
        assert!(ctx.is_expired());
    }
}
