//! Client error taxonomy
//!
//! Three families with distinct recovery policies: auth errors are fatal
//! and force a re-login, network errors are transient (retried with
//! backoff for the connection, surfaced without retry for sends), and
//! validation errors are rejected locally before any network call.

use dm_core::DomainError;
use thiserror::Error;

/// Errors surfaced by the realtime client
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Invalid or expired token; never retried
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Transient transport or API failure
    #[error("Network error: {0}")]
    Network(String),

    /// Payload rejected before any network call
    #[error("Validation failed: {0}")]
    Validation(#[from] DomainError),

    /// The transport was shut down or its retries were exhausted
    #[error("Transport channel closed")]
    ChannelClosed,
}

impl RealtimeError {
    /// Whether the caller may usefully retry the operation
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<reqwest::Error> for RealtimeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(RealtimeError::Network("timeout".into()).is_retryable());
        assert!(!RealtimeError::Auth("expired".into()).is_retryable());
        assert!(!RealtimeError::Validation(DomainError::EmptyContent).is_retryable());
        assert!(!RealtimeError::ChannelClosed.is_retryable());
    }
}
