//! Token issuance settings.
//!
//! [`TokenSettings`] is deserializable from any serde format (durations use
//! `humantime` syntax such as `"30m"` or `"200days"`) and can also be built in
//! code through a validating builder.

use std::{fmt, time::Duration};

use chrono::TimeDelta;
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::error::{AuthError, Result};

/// Default access token lifetime (30 minutes).
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Default refresh token lifetime (200 days).
pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(200 * 24 * 60 * 60);

/// Default number of snapshot/commit rounds per lifecycle operation.
pub const DEFAULT_MAX_COMMIT_ATTEMPTS: usize = 3;

/// Minimum HMAC secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

fn default_access_token_ttl() -> Duration {
    DEFAULT_ACCESS_TOKEN_TTL
}

fn default_refresh_token_ttl() -> Duration {
    DEFAULT_REFRESH_TOKEN_TTL
}

fn default_multiple_sessions() -> bool {
    true
}

fn default_max_commit_attempts() -> usize {
    DEFAULT_MAX_COMMIT_ATTEMPTS
}

/// Settings for [`TokenIssuer`](crate::TokenIssuer) and
/// [`TokenValidator`](crate::TokenValidator).
///
/// Values deserialized with serde are not validated until
/// [`validate`](Self::validate) runs; the issuer and validator constructors
/// call it.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tessera_authn::TokenSettings;
///
/// let settings = TokenSettings::builder()
///     .issuer("https://auth.example.com")
///     .audience("https://api.example.com")
///     .secret("0123456789abcdef0123456789abcdef")
///     .access_token_ttl(Duration::from_secs(600))
///     .build()?;
/// assert!(settings.multiple_sessions());
/// # Ok::<(), tessera_authn::AuthError>(())
/// ```
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenSettings {
    issuer: String,

    audience: String,

    secret: Zeroizing<String>,

    #[serde(with = "humantime_serde", default = "default_access_token_ttl")]
    access_token_ttl: Duration,

    #[serde(with = "humantime_serde", default = "default_refresh_token_ttl")]
    refresh_token_ttl: Duration,

    /// When `false`, issuing a new pair deletes every other pair of the user.
    #[serde(default = "default_multiple_sessions")]
    multiple_sessions: bool,

    #[serde(default = "default_max_commit_attempts")]
    max_commit_attempts: usize,
}

#[bon::bon]
impl TokenSettings {
    /// Creates validated settings.
    ///
    /// # Optional Fields
    ///
    /// * `access_token_ttl` - Access token lifetime (default: 30 minutes).
    /// * `refresh_token_ttl` - Refresh token lifetime (default: 200 days).
    /// * `multiple_sessions` - Allow concurrent sessions per user (default: true).
    /// * `max_commit_attempts` - Retries on concurrent modification (default: 3).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if any value fails
    /// [`validate`](Self::validate).
    #[builder]
    pub fn new(
        #[builder(into)] issuer: String,
        #[builder(into)] audience: String,
        #[builder(with = |secret: impl Into<String>| Zeroizing::new(secret.into()))]
        secret: Zeroizing<String>,
        #[builder(default = DEFAULT_ACCESS_TOKEN_TTL)] access_token_ttl: Duration,
        #[builder(default = DEFAULT_REFRESH_TOKEN_TTL)] refresh_token_ttl: Duration,
        #[builder(default = true)] multiple_sessions: bool,
        #[builder(default = DEFAULT_MAX_COMMIT_ATTEMPTS)] max_commit_attempts: usize,
    ) -> Result<Self> {
        let settings = Self {
            issuer,
            audience,
            secret,
            access_token_ttl,
            refresh_token_ttl,
            multiple_sessions,
            max_commit_attempts,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Checks every value.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if:
    /// - issuer or audience is empty
    /// - the secret is shorter than [`MIN_SECRET_LEN`] bytes
    /// - a lifetime is zero or does not fit a timestamp
    /// - the refresh lifetime is shorter than the access lifetime
    /// - `max_commit_attempts` is zero
    pub fn validate(&self) -> Result<()> {
        if self.issuer.trim().is_empty() {
            return Err(AuthError::configuration("issuer cannot be empty"));
        }
        if self.audience.trim().is_empty() {
            return Err(AuthError::configuration("audience cannot be empty"));
        }
        if self.secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::configuration(format!(
                "secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        for (name, ttl) in
            [("access_token_ttl", self.access_token_ttl), ("refresh_token_ttl", self.refresh_token_ttl)]
        {
            if ttl.is_zero() || TimeDelta::from_std(ttl).is_err() {
                return Err(AuthError::configuration(format!("{name} is out of range")));
            }
        }
        if self.refresh_token_ttl < self.access_token_ttl {
            return Err(AuthError::configuration(
                "refresh_token_ttl must not be shorter than access_token_ttl",
            ));
        }
        if self.max_commit_attempts == 0 {
            return Err(AuthError::configuration("max_commit_attempts must be at least 1"));
        }
        Ok(())
    }

    /// Returns the `iss` claim value.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the `aud` claim value.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub(crate) fn secret(&self) -> &[u8] {
        self.secret.as_bytes()
    }

    /// Returns the access token lifetime.
    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    /// Returns the refresh token lifetime.
    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    /// Returns whether a user may hold several live token pairs at once.
    #[must_use]
    pub fn multiple_sessions(&self) -> bool {
        self.multiple_sessions
    }

    /// Returns how many snapshot/commit rounds an operation makes before
    /// giving up on concurrent modification.
    #[must_use]
    pub fn max_commit_attempts(&self) -> usize {
        self.max_commit_attempts
    }

    pub(crate) fn access_lifetime(&self) -> TimeDelta {
        TimeDelta::from_std(self.access_token_ttl).unwrap_or(TimeDelta::MAX)
    }

    pub(crate) fn refresh_lifetime(&self) -> TimeDelta {
        TimeDelta::from_std(self.refresh_token_ttl).unwrap_or(TimeDelta::MAX)
    }
}

impl fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSettings")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("secret", &"[REDACTED]")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("multiple_sessions", &self.multiple_sessions)
            .field("max_commit_attempts", &self.max_commit_attempts)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_builder_defaults() {
        let settings = TokenSettings::builder()
            .issuer("iss")
            .audience("aud")
            .secret(SECRET)
            .build()
            .unwrap();

        assert_eq!(settings.access_token_ttl(), DEFAULT_ACCESS_TOKEN_TTL);
        assert_eq!(settings.refresh_token_ttl(), DEFAULT_REFRESH_TOKEN_TTL);
        assert!(settings.multiple_sessions());
        assert_eq!(settings.max_commit_attempts(), 3);
        assert_eq!(settings.access_lifetime(), TimeDelta::minutes(30));
    }

    #[test]
    fn test_short_secret_rejected() {
        let result =
            TokenSettings::builder().issuer("iss").audience("aud").secret("too-short").build();
        assert!(matches!(result, Err(AuthError::Configuration(ref msg)) if msg.contains("secret")));
    }

    #[test]
    fn test_empty_issuer_rejected() {
        let result = TokenSettings::builder().issuer(" ").audience("aud").secret(SECRET).build();
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }

    #[test]
    fn test_refresh_shorter_than_access_rejected() {
        let result = TokenSettings::builder()
            .issuer("iss")
            .audience("aud")
            .secret(SECRET)
            .access_token_ttl(Duration::from_secs(3600))
            .refresh_token_ttl(Duration::from_secs(60))
            .build();
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }

    #[test]
    fn test_zero_commit_attempts_rejected() {
        let result = TokenSettings::builder()
            .issuer("iss")
            .audience("aud")
            .secret(SECRET)
            .max_commit_attempts(0)
            .build();
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }

    #[test]
    fn test_deserialization_with_humantime_and_defaults() {
        let json = format!(
            r#"{{
                "issuer": "https://auth.example.com",
                "audience": "https://api.example.com",
                "secret": "{SECRET}",
                "access_token_ttl": "10m",
                "multiple_sessions": false
            }}"#
        );

        let settings: TokenSettings = serde_json::from_str(&json).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.access_token_ttl(), Duration::from_secs(600));
        assert_eq!(settings.refresh_token_ttl(), DEFAULT_REFRESH_TOKEN_TTL);
        assert!(!settings.multiple_sessions());
    }

    #[test]
    fn test_deserialization_rejects_unknown_fields() {
        let json = format!(
            r#"{{"issuer": "i", "audience": "a", "secret": "{SECRET}", "algorithm": "RS256"}}"#
        );
        assert!(serde_json::from_str::<TokenSettings>(&json).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let settings = TokenSettings::builder()
            .issuer("iss")
            .audience("aud")
            .secret(SECRET)
            .build()
            .unwrap();
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains(SECRET));
        assert!(rendered.contains("[REDACTED]"));
    }
}
