//! Shared test utilities for token issuance and validation.
//!
//! Provides a ready-wired [`TestHarness`] (memory store, memory identity
//! directory, manual clock), settings fixtures, and [`craft_raw_jwt`] for
//! building hostile tokens. Feature-gated behind `testutil` so none of it
//! reaches production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! tessera-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use tessera_authn::testutil::{TestHarness, craft_raw_jwt};
//! ```

use std::{sync::Arc, time::Duration};

use argon2::Params;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use tessera_storage::{ManualClock, MemoryBackend, auth::KvTokenRecordStore};

use crate::{
    identity::{MemoryIdentityVerifier, User},
    issuer::TokenIssuer,
    service::TokenService,
    settings::TokenSettings,
    validator::TokenValidator,
};

/// Issuer used by [`test_settings`].
pub const TEST_ISSUER: &str = "https://auth.tessera.test";

/// Audience used by [`test_settings`].
pub const TEST_AUDIENCE: &str = "https://api.tessera.test";

/// Signing secret used by [`test_settings`].
pub const TEST_SECRET: &str = "tessera-test-secret-0123456789abcdef";

/// Password given to every user added through [`TestHarness::add_user`].
pub const TEST_PASSWORD: &str = "correct horse battery staple";

/// Settings with the test issuer, audience and secret and default lifetimes.
///
/// # Panics
///
/// Panics if the fixture settings fail validation.
#[must_use]
pub fn test_settings() -> TokenSettings {
    settings_with_ttls(Duration::from_secs(30 * 60), Duration::from_secs(200 * 24 * 60 * 60))
}

/// Settings with the test issuer, audience and secret and the given
/// lifetimes.
///
/// # Panics
///
/// Panics if the lifetimes are rejected (zero, or refresh shorter than
/// access).
#[must_use]
pub fn settings_with_ttls(access: Duration, refresh: Duration) -> TokenSettings {
    TokenSettings::builder()
        .issuer(TEST_ISSUER)
        .audience(TEST_AUDIENCE)
        .secret(TEST_SECRET)
        .access_token_ttl(access)
        .refresh_token_ttl(refresh)
        .build()
        .expect("test settings are valid")
}

/// Argon2id parameters at the minimum cost, so tests that add many users
/// stay fast.
///
/// # Panics
///
/// Panics if argon2 rejects the parameters.
#[must_use]
pub fn cheap_password_params() -> Params {
    Params::new(Params::MIN_M_COST, Params::MIN_T_COST, Params::MIN_P_COST, None)
        .expect("minimum argon2 params are valid")
}

/// An issuer wired to in-memory collaborators that tests can reach into.
#[derive(Debug, Clone)]
pub struct TestHarness {
    /// The issuer under test.
    pub issuer: Arc<TokenIssuer>,
    /// The record store behind the issuer.
    pub store: Arc<KvTokenRecordStore<MemoryBackend>>,
    /// The identity directory behind the issuer.
    pub identity: Arc<MemoryIdentityVerifier>,
    /// The issuer's clock.
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    /// Builds a harness with [`test_settings`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    /// Builds a harness with the given settings.
    ///
    /// # Panics
    ///
    /// Panics if the issuer rejects the settings.
    #[must_use]
    pub fn with_settings(settings: TokenSettings) -> Self {
        let store = Arc::new(KvTokenRecordStore::new(MemoryBackend::new()));
        let identity = Arc::new(MemoryIdentityVerifier::with_params(cheap_password_params()));
        let clock = Arc::new(ManualClock::default());
        let issuer = TokenIssuer::builder()
            .settings(settings)
            .store(store.clone())
            .identity(identity.clone())
            .clock(clock.clone())
            .build()
            .expect("test issuer builds");
        Self { issuer: Arc::new(issuer), store, identity, clock }
    }

    /// Adds a user with [`TEST_PASSWORD`].
    ///
    /// # Panics
    ///
    /// Panics if another user already has the username.
    pub fn add_user(&self, id: i64, username: &str, roles: &[&str]) -> User {
        self.identity
            .add_user(id, username, TEST_PASSWORD, roles.iter().copied())
            .expect("test username is unique")
    }

    /// Returns a validator sharing the issuer's collaborators.
    #[must_use]
    pub fn validator(&self) -> TokenValidator {
        self.issuer.validator()
    }

    /// Returns a token service over the harness issuer.
    #[must_use]
    pub fn service(&self) -> TokenService {
        TokenService::new(Arc::clone(&self.issuer), self.identity.clone())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The result is `{header_b64}.{payload_b64}.` with an empty signature.
///
/// # Panics
///
/// Panics if JSON serialization fails.
#[must_use]
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Signs `payload_json` with HMAC using `algorithm` and `secret`.
///
/// Lets tests produce tokens the codec would never emit itself, such as
/// HS512 tokens or tokens carrying hand-edited claims.
///
/// # Panics
///
/// Panics if encoding fails.
#[must_use]
pub fn sign_raw_jwt(algorithm: Algorithm, secret: &str, payload_json: &serde_json::Value) -> String {
    jsonwebtoken::encode(
        &Header::new(algorithm),
        payload_json,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("test token encodes")
}

/// Asserts that a [`Result<T, AuthError>`](crate::AuthError) is an `Err`
/// matching the given variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use tessera_authn::assert_auth_error;
/// use tessera_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::TokenExpired);
/// assert_auth_error!(result, TokenExpired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}
