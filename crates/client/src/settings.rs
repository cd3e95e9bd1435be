//! Client settings.

use serde::Deserialize;

use crate::error::{ClientError, Result};

/// Default path of the sign-in endpoint.
pub const DEFAULT_GENERATE_PATH: &str = "account/token/generate";

/// Default path of the renewal endpoint.
pub const DEFAULT_REFRESH_PATH: &str = "account/token/refresh";

/// Default path of the revocation endpoint.
pub const DEFAULT_REVOKE_PATH: &str = "account/token/revoke";

/// Default environment name.
pub const DEFAULT_ENVIRONMENT: &str = "production";

fn default_environment() -> String {
    DEFAULT_ENVIRONMENT.to_owned()
}

fn default_generate_path() -> String {
    DEFAULT_GENERATE_PATH.to_owned()
}

fn default_refresh_path() -> String {
    DEFAULT_REFRESH_PATH.to_owned()
}

fn default_revoke_path() -> String {
    DEFAULT_REVOKE_PATH.to_owned()
}

/// Settings for [`AuthClient`](crate::AuthClient).
///
/// `origin` is the URL the client is served from. It scopes stored
/// credentials: the host becomes the storage domain, and only `https`
/// origins mark them secure. `environment` namespaces the storage keys so
/// that, say, a development and a production session never share slots.
///
/// # Example
///
/// ```
/// use tessera_client::ClientSettings;
///
/// let settings = ClientSettings::builder()
///     .origin("https://app.example.com")
///     .environment("staging")
///     .build()?;
/// assert_eq!(settings.domain(), "app.example.com");
/// assert!(settings.secure());
/// assert_eq!(settings.refresh_path(), "account/token/refresh");
/// # Ok::<(), tessera_client::ClientError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSettings {
    origin: String,

    #[serde(default = "default_environment")]
    environment: String,

    #[serde(default = "default_generate_path")]
    generate_path: String,

    #[serde(default = "default_refresh_path")]
    refresh_path: String,

    #[serde(default = "default_revoke_path")]
    revoke_path: String,
}

#[bon::bon]
impl ClientSettings {
    /// Creates validated settings.
    ///
    /// # Optional Fields
    ///
    /// * `environment` - Storage key namespace (default: `"production"`).
    /// * `generate_path`, `refresh_path`, `revoke_path` - Token endpoint paths (default:
    ///   `account/token/{generate,refresh,revoke}`).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if any value fails
    /// [`validate`](Self::validate).
    #[builder]
    pub fn new(
        #[builder(into)] origin: String,
        #[builder(into, default = DEFAULT_ENVIRONMENT.to_owned())] environment: String,
        #[builder(into, default = DEFAULT_GENERATE_PATH.to_owned())] generate_path: String,
        #[builder(into, default = DEFAULT_REFRESH_PATH.to_owned())] refresh_path: String,
        #[builder(into, default = DEFAULT_REVOKE_PATH.to_owned())] revoke_path: String,
    ) -> Result<Self> {
        let settings = Self { origin, environment, generate_path, refresh_path, revoke_path };
        settings.validate()?;
        Ok(settings)
    }

    /// Checks every value.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if the origin is not an
    /// `http` or `https` URL with a host, the environment is empty, or an
    /// endpoint path is empty.
    pub fn validate(&self) -> Result<()> {
        if parse_origin(&self.origin).is_none() {
            return Err(ClientError::configuration(format!(
                "origin must be an http or https URL, got '{}'",
                self.origin
            )));
        }
        if self.environment.trim().is_empty() {
            return Err(ClientError::configuration("environment cannot be empty"));
        }
        for (name, path) in [
            ("generate_path", &self.generate_path),
            ("refresh_path", &self.refresh_path),
            ("revoke_path", &self.revoke_path),
        ] {
            if path.trim().is_empty() {
                return Err(ClientError::configuration(format!("{name} cannot be empty")));
            }
        }
        Ok(())
    }

    /// Returns the origin URL.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns the environment name.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Returns the origin's host, used as the storage domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        parse_origin(&self.origin).map_or("", |(_, host)| host)
    }

    /// Returns `true` if the origin is served over `https`.
    #[must_use]
    pub fn secure(&self) -> bool {
        parse_origin(&self.origin).is_some_and(|(scheme, _)| scheme.eq_ignore_ascii_case("https"))
    }

    /// Returns the sign-in endpoint path.
    #[must_use]
    pub fn generate_path(&self) -> &str {
        &self.generate_path
    }

    /// Returns the renewal endpoint path.
    #[must_use]
    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    /// Returns the revocation endpoint path.
    #[must_use]
    pub fn revoke_path(&self) -> &str {
        &self.revoke_path
    }
}

/// Splits `scheme://host[:port][/path]` into scheme and host.
fn parse_origin(origin: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = origin.split_once("://")?;
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return None;
    }
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = if host_port.starts_with('[') {
        host_port.split_inclusive(']').next().unwrap_or_default()
    } else {
        host_port.split(':').next().unwrap_or_default()
    };
    (!host.is_empty()).then_some((scheme, host))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ClientSettings::builder().origin("https://app.example.com").build().unwrap();
        assert_eq!(settings.environment(), "production");
        assert_eq!(settings.generate_path(), "account/token/generate");
        assert_eq!(settings.revoke_path(), "account/token/revoke");
    }

    #[test]
    fn test_origin_parsing() {
        let cases = [
            ("https://app.example.com", "app.example.com", true),
            ("http://localhost:5000", "localhost", false),
            ("HTTPS://App.Example.com:8443/base/path", "App.Example.com", true),
            ("http://[::1]:3000", "[::1]", false),
        ];
        for (origin, domain, secure) in cases {
            let settings = ClientSettings::builder().origin(origin).build().unwrap();
            assert_eq!(settings.domain(), domain, "{origin}");
            assert_eq!(settings.secure(), secure, "{origin}");
        }
    }

    #[test]
    fn test_invalid_origins_rejected() {
        for origin in ["", "app.example.com", "ftp://files.example.com", "https://", "https:///path"] {
            let result = ClientSettings::builder().origin(origin).build();
            assert!(matches!(result, Err(ClientError::Configuration(_))), "{origin}");
        }
    }

    #[test]
    fn test_empty_path_rejected() {
        let result =
            ClientSettings::builder().origin("https://app.example.com").refresh_path(" ").build();
        assert!(matches!(result, Err(ClientError::Configuration(_))));
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let json = r#"{"origin": "https://app.example.com", "enviroment": "dev"}"#;
        assert!(serde_json::from_str::<ClientSettings>(json).is_err());

        let json = r#"{"origin": "http://localhost:5000", "environment": "development"}"#;
        let settings: ClientSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.environment(), "development");
        assert!(settings.validate().is_ok());
    }

    proptest! {
        #[test]
        fn prop_domain_is_origin_host(
            https in any::<bool>(),
            host in "[a-z][a-z0-9-]{0,15}(\\.[a-z]{2,8}){0,3}",
            port in proptest::option::of(1u16..),
            path in "(/[a-z0-9]{1,8}){0,3}",
        ) {
            let scheme = if https { "https" } else { "http" };
            let port = port.map(|p| format!(":{p}")).unwrap_or_default();
            let origin = format!("{scheme}://{host}{port}{path}");

            let settings = ClientSettings::builder().origin(origin).build().unwrap();
            prop_assert_eq!(settings.domain(), host.as_str());
            prop_assert_eq!(settings.secure(), https);
        }
    }
}
