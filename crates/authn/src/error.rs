//! Authentication error types.
//!
//! This module defines errors that can occur while issuing, renewing,
//! validating and revoking bearer tokens.

use tessera_storage::StorageError;
use thiserror::Error;

/// Authentication and authorization errors.
///
/// The `Display` output names the precise reason and is meant for logs.
/// Responses sent to callers should use [`public_message`](Self::public_message)
/// so that validation failures do not reveal which check rejected a token.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`, so new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Username/password pair was not accepted by the identity provider.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Token not yet valid (nbf or iat claim in the future).
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// No live record backs the token: it was revoked, rotated or purged.
    #[error("Token revoked")]
    TokenRevoked,

    /// The token's security stamp no longer matches its user.
    #[error("Security stamp mismatch")]
    SecurityStampMismatch,

    /// Malformed JWT, cannot be decoded.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Issuer claim doesn't match the configured issuer.
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),

    /// Audience claim doesn't match the configured audience.
    #[error("Invalid audience: {0}")]
    InvalidAudience(String),

    /// Required claim is missing or empty.
    #[error("Missing claim: {0}")]
    MissingClaim(String),

    /// Algorithm not in the accepted list.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The presented refresh token cannot be redeemed.
    #[error("Refresh rejected: {0}")]
    RefreshRejected(String),

    /// Invalid settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Storage backend error during record lookup or mutation.
    ///
    /// Wraps the original [`StorageError`] to preserve the full error source
    /// chain for debugging and structured logging.
    #[error("Token storage error: {0}")]
    Storage(
        /// The underlying storage error.
        #[source]
        StorageError,
    ),
}

impl AuthError {
    /// Creates a [`AuthError::MalformedToken`].
    #[must_use]
    pub fn malformed_token(message: impl Into<String>) -> Self {
        Self::MalformedToken(message.into())
    }

    /// Creates a [`AuthError::InvalidIssuer`].
    #[must_use]
    pub fn invalid_issuer(message: impl Into<String>) -> Self {
        Self::InvalidIssuer(message.into())
    }

    /// Creates a [`AuthError::InvalidAudience`].
    #[must_use]
    pub fn invalid_audience(message: impl Into<String>) -> Self {
        Self::InvalidAudience(message.into())
    }

    /// Creates a [`AuthError::MissingClaim`].
    #[must_use]
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim(claim.into())
    }

    /// Creates a [`AuthError::UnsupportedAlgorithm`].
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(message.into())
    }

    /// Creates a [`AuthError::RefreshRejected`].
    #[must_use]
    pub fn refresh_rejected(reason: impl Into<String>) -> Self {
        Self::RefreshRejected(reason.into())
    }

    /// Creates a [`AuthError::Configuration`].
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns `true` for failures that must be answered with 401
    /// Unauthorized: every credential or token rejection. Storage and
    /// configuration failures are server errors.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        !matches!(self, Self::Configuration(_) | Self::Storage(_))
    }

    /// HTTP status code equivalent of this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        if self.is_unauthorized() { 401 } else { 500 }
    }

    /// Message safe to return to the caller.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "The username or password is incorrect.",
            Self::RefreshRejected(_) => "The refresh token is invalid or has expired.",
            Self::Configuration(_) | Self::Storage(_) => "An internal error occurred.",
            _ => "The access token is invalid or has expired.",
        }
    }

    /// Short stable label for metrics and structured logs.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::TokenExpired => "expired",
            Self::TokenNotYetValid => "not_yet_valid",
            Self::TokenRevoked => "revoked",
            Self::SecurityStampMismatch => "stamp_mismatch",
            Self::MalformedToken(_) | Self::MissingClaim(_) => "malformed",
            Self::InvalidSignature => "signature",
            Self::InvalidIssuer(_) | Self::InvalidAudience(_) => "issuer_or_audience",
            Self::UnsupportedAlgorithm(_) => "algorithm",
            Self::RefreshRejected(_) => "refresh_rejected",
            Self::Configuration(_) => "configuration",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => AuthError::malformed_token("Invalid JWT structure"),
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            ErrorKind::InvalidAudience => AuthError::invalid_audience("Audience validation failed"),
            ErrorKind::InvalidIssuer => AuthError::invalid_issuer("Issuer validation failed"),
            ErrorKind::InvalidAlgorithm => {
                AuthError::unsupported_algorithm("Algorithm not supported")
            },
            ErrorKind::MissingRequiredClaim(claim) => AuthError::missing_claim(claim.clone()),
            _ => AuthError::malformed_token(format!("JWT error: {err}")),
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::Storage(err)
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::malformed_token("test");
        assert_eq!(err.to_string(), "Malformed token: test");

        let err = AuthError::TokenExpired;
        assert_eq!(err.to_string(), "Token expired");

        let err = AuthError::missing_claim("sub");
        assert_eq!(err.to_string(), "Missing claim: sub");
    }

    #[test]
    fn test_error_from_jsonwebtoken() {
        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::ExpiredSignature);
        let auth_err: AuthError = jwt_err.into();
        assert!(matches!(auth_err, AuthError::TokenExpired));

        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidSignature);
        assert!(matches!(AuthError::from(jwt_err), AuthError::InvalidSignature));
    }

    #[test]
    fn test_validation_failures_are_unauthorized() {
        for err in [
            AuthError::TokenExpired,
            AuthError::TokenRevoked,
            AuthError::SecurityStampMismatch,
            AuthError::InvalidSignature,
            AuthError::refresh_rejected("unknown"),
        ] {
            assert!(err.is_unauthorized(), "{err} should be unauthorized");
            assert_eq!(err.status_code(), 401);
        }

        let err = AuthError::from(StorageError::internal("boom"));
        assert!(!err.is_unauthorized());
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_public_message_hides_reason() {
        let stamp = AuthError::SecurityStampMismatch;
        let revoked = AuthError::TokenRevoked;
        assert_eq!(stamp.public_message(), revoked.public_message());
        assert!(!stamp.public_message().contains("stamp"));
    }

    #[test]
    fn test_storage_error_preserves_source_chain() {
        use std::error::Error;

        let auth_err = AuthError::from(StorageError::internal("disk unavailable"));
        let source = auth_err.source().expect("source chain must be preserved");
        assert_eq!(source.to_string(), StorageError::internal("disk unavailable").to_string());
    }
}
