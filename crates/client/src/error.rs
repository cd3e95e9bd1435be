//! Client error types.
//!
//! [`ClientError`] is what callers of [`AuthClient`](crate::AuthClient) see.
//! A request that ends in an unauthorized response fails with its *own*
//! [`ClientError::Status`], even when a token refresh was attempted on its
//! behalf and failed. Refresh failures are described by [`RefreshFailure`],
//! which is logged and counted but never returned.

use std::sync::Arc;

use tessera_storage::BoxError;
use thiserror::Error;

use crate::http::ApiResponse;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors returned by the client.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The server answered with a non-success status.
    #[error("Request failed with status {}", .0.status)]
    Status(ApiResponse),

    /// The request never produced a response.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// A response body could not be decoded.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// Invalid client settings.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Creates a new `Transport` error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into(), source: None }
    }

    /// Creates a new `Transport` error with a source error.
    #[must_use]
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns the response of a `Status` error.
    #[must_use]
    pub fn response(&self) -> Option<&ApiResponse> {
        match self {
            Self::Status(response) => Some(response),
            _ => None,
        }
    }

    /// Returns the HTTP status of a `Status` error.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.response().map(|r| r.status)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode { message: err.to_string(), source: Some(Arc::new(err)) }
    }
}

/// Why a token refresh did not produce new credentials.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RefreshFailure {
    /// No refresh token was stored.
    #[error("no refresh token available")]
    NoRefreshToken,

    /// The refresh endpoint answered with a non-success status.
    #[error("refresh endpoint answered {status}")]
    RefreshRejected {
        /// Status of the refresh response.
        status: u16,
    },

    /// The refresh call never produced a response.
    #[error("refresh call failed: {0}")]
    Transport(String),

    /// The refresh response could not be decoded.
    #[error("refresh response undecodable: {0}")]
    Decode(String),

    /// A request already retried once was unauthorized again.
    #[error("request unauthorized after retry")]
    LoopGuard,

    /// The task driving the refresh was dropped before it finished.
    #[error("refresh abandoned")]
    Abandoned,
}

impl RefreshFailure {
    /// Returns a stable label for logs and metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoRefreshToken => "no_refresh_token",
            Self::RefreshRejected { .. } => "refresh_rejected",
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
            Self::LoopGuard => "loop_guard",
            Self::Abandoned => "abandoned",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_status_error_exposes_response() {
        let err = ClientError::Status(ApiResponse::with_status(401));
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.to_string(), "Request failed with status 401");
        assert_eq!(ClientError::transport("reset").status(), None);
    }

    #[test]
    fn test_decode_error_keeps_source() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = ClientError::from(json_err);
        assert!(matches!(err, ClientError::Decode { .. }));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_refresh_failure_reasons_are_stable() {
        assert_eq!(RefreshFailure::NoRefreshToken.reason(), "no_refresh_token");
        assert_eq!(RefreshFailure::RefreshRejected { status: 401 }.reason(), "refresh_rejected");
        assert_eq!(RefreshFailure::LoopGuard.to_string(), "request unauthorized after retry");
    }
}
