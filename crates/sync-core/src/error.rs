use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PollerState;

/// Broad error category used for user-facing handling and poll behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncErrorCategory {
    /// Invalid input, unsupported state, or other configuration issue.
    Config,
    /// Authentication/authorization failure (session presumed invalid).
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by the API.
    RateLimited,
    /// Key-value store/local persistence failure.
    Storage,
    /// Serialization/deserialization failure.
    Serialization,
    /// Internal engine bug or invariant break.
    Internal,
}

/// Stable engine error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct SyncError {
    /// High-level error category.
    pub category: SyncErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl SyncError {
    /// Construct a new engine error.
    pub fn new(
        category: SyncErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Build a standard invalid-poller-transition error.
    pub fn invalid_transition(current: PollerState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            SyncErrorCategory::Internal,
            "invalid_poller_transition",
            format!("cannot run '{action}' while poller is in state {current:?}"),
        )
    }

    /// Whether this error should count as an auth failure for poll stops.
    pub fn is_auth(&self) -> bool {
        self.category == SyncErrorCategory::Auth
    }
}

/// Map HTTP status codes to engine error categories.
pub fn classify_http_status(status: u16) -> SyncErrorCategory {
    match status {
        401 | 403 => SyncErrorCategory::Auth,
        408 | 429 => SyncErrorCategory::RateLimited,
        400..=499 => SyncErrorCategory::Config,
        500..=599 => SyncErrorCategory::Network,
        _ => SyncErrorCategory::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(401), SyncErrorCategory::Auth);
        assert_eq!(classify_http_status(403), SyncErrorCategory::Auth);
        assert_eq!(classify_http_status(429), SyncErrorCategory::RateLimited);
        assert_eq!(classify_http_status(404), SyncErrorCategory::Config);
        assert_eq!(classify_http_status(503), SyncErrorCategory::Network);
        assert_eq!(classify_http_status(700), SyncErrorCategory::Internal);
    }

    #[test]
    fn keeps_invalid_transition_error_code_stable() {
        let err = SyncError::invalid_transition(PollerState::Stopped, "start");
        assert_eq!(err.code, "invalid_poller_transition");
        assert_eq!(err.category, SyncErrorCategory::Internal);
    }

    #[test]
    fn persists_retry_after_in_millis() {
        let err = SyncError::new(SyncErrorCategory::RateLimited, "rate_limited", "wait")
            .with_retry_after(Duration::from_secs(3));
        assert_eq!(err.retry_after_ms, Some(3000));
    }

    #[test]
    fn auth_category_is_the_only_auth_classified_one() {
        let auth = SyncError::new(SyncErrorCategory::Auth, "unauthorized", "401");
        let net = SyncError::new(SyncErrorCategory::Network, "timeout", "timed out");
        assert!(auth.is_auth());
        assert!(!net.is_auth());
    }
}
