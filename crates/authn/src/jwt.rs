//! JWT claims and the HMAC codec.
//!
//! Two token kinds share one signing secret:
//!
//! - [`AccessClaims`] authorize resource requests and carry the user's identity, security stamp
//!   and roles.
//! - [`RefreshClaims`] are deliberately minimal. A refresh token only proves possession of a
//!   record; everything else is re-read from the identity provider at renewal.
//!
//! Each kind deserializes only from its own claim set, so a refresh token
//! presented as an access token (or the reverse) fails with a missing claim.
//!
//! # Example
//!
//! ```
//! use tessera_authn::{TokenSettings, jwt::{JwtCodec, RefreshClaims}};
//!
//! # fn example() -> Result<(), tessera_authn::AuthError> {
//! let settings = TokenSettings::builder()
//!     .issuer("https://auth.example.com")
//!     .audience("https://api.example.com")
//!     .secret("0123456789abcdef0123456789abcdef")
//!     .build()?;
//! let codec = JwtCodec::new(&settings);
//!
//! let claims = RefreshClaims {
//!     jti: "jti-1".into(),
//!     iss: settings.issuer().into(),
//!     aud: settings.audience().into(),
//!     iat: 1_700_000_000,
//!     nbf: 1_700_000_000,
//!     exp: 1_800_000_000,
//!     serial: "serial-1".into(),
//! };
//! let token = codec.encode(&claims)?;
//! let decoded: RefreshClaims = codec.decode(&token)?;
//! assert_eq!(decoded, claims);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tessera_storage::UserId;

use crate::{
    error::{AuthError, Result},
    settings::TokenSettings,
    validation::{SIGNING_ALGORITHM, validate_algorithm},
};

/// Claims common to both token kinds.
pub trait RegisteredClaims {
    /// Issued at (seconds since epoch).
    fn iat(&self) -> i64;
    /// Not before (seconds since epoch).
    fn nbf(&self) -> i64;
    /// Expiration time (seconds since epoch).
    fn exp(&self) -> i64;

    /// Checks `nbf <= now`, `iat <= now` and `now < exp`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenExpired`] or [`AuthError::TokenNotYetValid`].
    fn check_lifetime(&self, now: DateTime<Utc>) -> Result<()> {
        let now = now.timestamp();
        if self.exp() <= now {
            return Err(AuthError::TokenExpired);
        }
        if self.nbf() > now || self.iat() > now {
            return Err(AuthError::TokenNotYetValid);
        }
        Ok(())
    }
}

/// Access token claims.
///
/// ```json
/// {
///   "jti": "9b2c...",
///   "iss": "https://auth.example.com",
///   "aud": "https://api.example.com",
///   "sub": "42",
///   "iat": 1700000000,
///   "nbf": 1700000000,
///   "exp": 1700001800,
///   "name": "alice",
///   "securityStamp": "5f1e...",
///   "roles": ["admin"]
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// JWT ID, unique per token.
    pub jti: String,
    /// Issuer.
    pub iss: String,
    /// Audience.
    pub aud: String,
    /// Subject, the user id in decimal.
    pub sub: String,
    /// Issued at (seconds since epoch).
    pub iat: i64,
    /// Not before (seconds since epoch).
    pub nbf: i64,
    /// Expiration time (seconds since epoch).
    pub exp: i64,
    /// Username.
    pub name: String,
    /// Security stamp of the user at issuance.
    #[serde(rename = "securityStamp")]
    pub security_stamp: String,
    /// Role names.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl AccessClaims {
    /// Parses the subject into a [`UserId`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if `sub` is not an integer.
    pub fn user_id(&self) -> Result<UserId> {
        self.sub
            .parse::<i64>()
            .map(UserId::from)
            .map_err(|_| AuthError::malformed_token("sub claim is not a user id"))
    }
}

impl RegisteredClaims for AccessClaims {
    fn iat(&self) -> i64 {
        self.iat
    }

    fn nbf(&self) -> i64 {
        self.nbf
    }

    fn exp(&self) -> i64 {
        self.exp
    }
}

/// Refresh token claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// JWT ID, unique per token.
    pub jti: String,
    /// Issuer.
    pub iss: String,
    /// Audience.
    pub aud: String,
    /// Issued at (seconds since epoch).
    pub iat: i64,
    /// Not before (seconds since epoch).
    pub nbf: i64,
    /// Expiration time (seconds since epoch).
    pub exp: i64,
    /// Random serial making every refresh token unique.
    pub serial: String,
}

impl RegisteredClaims for RefreshClaims {
    fn iat(&self) -> i64 {
        self.iat
    }

    fn nbf(&self) -> i64 {
        self.nbf
    }

    fn exp(&self) -> i64 {
        self.exp
    }
}

/// Reads the `alg` header field without verifying anything.
///
/// Done by hand rather than through [`jsonwebtoken::decode_header`] so that
/// names the library cannot represent (such as `none`) are still reported as
/// an unsupported algorithm instead of a parse failure.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the token has no decodable header
/// and [`AuthError::MissingClaim`] if the header lacks `alg`.
pub fn decode_unverified_algorithm(token: &str) -> Result<String> {
    let mut parts = token.split('.');
    let (Some(header), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::malformed_token("JWT must have 3 parts separated by dots"));
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|e| AuthError::malformed_token(format!("Failed to decode JWT header: {e}")))?;
    let header: serde_json::Value = serde_json::from_slice(&header_bytes)
        .map_err(|e| AuthError::malformed_token(format!("Failed to parse JWT header: {e}")))?;

    header
        .get("alg")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| AuthError::missing_claim("alg"))
}

/// Signs and verifies tokens with the configured HMAC secret.
///
/// Verification covers algorithm, signature, structure, issuer and
/// audience. Lifetime is left to [`RegisteredClaims::check_lifetime`] so that
/// it is evaluated against an injectable clock.
#[derive(Clone)]
pub struct JwtCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtCodec {
    /// Creates a codec from settings.
    #[must_use]
    pub fn new(settings: &TokenSettings) -> Self {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();
        validation.set_issuer(&[settings.issuer()]);
        validation.set_audience(&[settings.audience()]);

        Self {
            encoding: EncodingKey::from_secret(settings.secret()),
            decoding: DecodingKey::from_secret(settings.secret()),
            validation,
        }
    }

    /// Signs `claims`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if the claims cannot be
    /// serialized.
    pub fn encode<C: Serialize>(&self, claims: &C) -> Result<String> {
        Ok(encode(&Header::new(SIGNING_ALGORITHM), claims, &self.encoding)?)
    }

    /// Verifies `token` and deserializes its claims.
    ///
    /// # Errors
    ///
    /// Returns the first failing check: unsupported algorithm, malformed
    /// structure or missing claim, invalid signature, issuer, audience.
    pub fn decode<C: DeserializeOwned>(&self, token: &str) -> Result<C> {
        validate_algorithm(&decode_unverified_algorithm(token)?)?;
        Ok(decode::<C>(token, &self.decoding, &self.validation)?.claims)
    }
}

impl fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtCodec")
            .field("algorithm", &SIGNING_ALGORITHM)
            .field("iss", &self.validation.iss)
            .field("aud", &self.validation.aud)
            .finish_non_exhaustive()
    }
}
