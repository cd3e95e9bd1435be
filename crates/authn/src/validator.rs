//! Access and refresh token validation.
//!
//! An access token is accepted only if every check passes, in this order:
//!
//! 1. algorithm policy, signature, structure, issuer and audience
//! 2. lifetime (`nbf`, `iat` and `exp`) against the injected [`Clock`]
//! 3. the security stamp claim equals the user's current stamp
//! 4. a live record exists for the token's hash, owned by the token's subject, whose access expiry
//!    has not passed
//!
//! The first failing check decides the error. Its reason is logged and
//! counted; callers only ever see [`AuthError::public_message`].

use std::{fmt, sync::Arc};

use tessera_storage::{
    Clock, RecordId, SystemClock, UserId,
    auth::{TokenHash, TokenRecord, TokenRecordStore},
};

use crate::{
    error::{AuthError, Result},
    identity::IdentityVerifier,
    jwt::{AccessClaims, JwtCodec, RefreshClaims, RegisteredClaims},
    metrics::TokenMetrics,
    settings::TokenSettings,
};

/// Authorization scheme expected in the `Authorization` header.
pub const BEARER_SCHEME: &str = "Bearer";

/// The authenticated caller behind a valid access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Account id.
    pub user_id: UserId,
    /// Login name at issuance.
    pub username: String,
    /// Roles at issuance.
    pub roles: Vec<String>,
    /// Record backing the token.
    pub record_id: RecordId,
    /// Verified access token claims.
    pub claims: AccessClaims,
}

impl Principal {
    /// Returns `true` if the principal holds `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Validates inbound tokens.
///
/// Usually obtained from [`TokenIssuer::validator`](crate::TokenIssuer::validator)
/// so that both share one store, directory and clock.
#[derive(Clone)]
pub struct TokenValidator {
    codec: JwtCodec,
    store: Arc<dyn TokenRecordStore>,
    identity: Arc<dyn IdentityVerifier>,
    clock: Arc<dyn Clock>,
    metrics: TokenMetrics,
}

#[bon::bon]
impl TokenValidator {
    /// Creates a standalone validator.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the settings are invalid.
    #[builder]
    pub fn new(
        settings: TokenSettings,
        store: Arc<dyn TokenRecordStore>,
        identity: Arc<dyn IdentityVerifier>,
        #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)] clock: Arc<dyn Clock>,
        #[builder(default)] metrics: TokenMetrics,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self::from_parts(JwtCodec::new(&settings), store, identity, clock, metrics))
    }

    pub(crate) fn from_parts(
        codec: JwtCodec,
        store: Arc<dyn TokenRecordStore>,
        identity: Arc<dyn IdentityVerifier>,
        clock: Arc<dyn Clock>,
        metrics: TokenMetrics,
    ) -> Self {
        Self { codec, store, identity, clock, metrics }
    }

    /// Validates an access token.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing check; every variant except
    /// [`AuthError::Storage`] is [unauthorized](AuthError::is_unauthorized).
    #[tracing::instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> Result<Principal> {
        let result = self.check_access_token(token).await;
        match &result {
            Ok(principal) => {
                self.metrics.record_validated();
                tracing::debug!(user_id = %principal.user_id, record_id = %principal.record_id, "access token accepted");
            },
            Err(err) => {
                self.metrics.record_rejection(err);
                tracing::debug!(reason = err.reason(), error = %err, "access token rejected");
            },
        }
        result
    }

    /// Validates the token carried by an `Authorization: Bearer <token>`
    /// header value.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if the header does not use the
    /// bearer scheme, otherwise whatever [`validate`](Self::validate) returns.
    pub async fn authenticate_header(&self, header: &str) -> Result<Principal> {
        let token = parse_bearer(header).ok_or_else(|| {
            let err = AuthError::malformed_token("expected a Bearer authorization header");
            self.metrics.record_rejection(&err);
            err
        })?;
        self.validate(token).await
    }

    /// Verifies a refresh token and returns the live record it redeems.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RefreshRejected`] for any token that cannot be
    /// redeemed (bad signature, expired, unknown or already rotated) and
    /// [`AuthError::Storage`] on store failures.
    #[tracing::instrument(skip_all)]
    pub async fn verify_refresh_token(&self, token: &str) -> Result<TokenRecord> {
        let result = self.check_refresh_token(token).await.map_err(|err| match err {
            AuthError::Storage(_) | AuthError::RefreshRejected(_) => err,
            other => AuthError::refresh_rejected(other.to_string()),
        });
        if let Err(err) = &result {
            self.metrics.record_rejection(err);
            tracing::debug!(reason = err.reason(), error = %err, "refresh token rejected");
        }
        result
    }

    async fn check_access_token(&self, token: &str) -> Result<Principal> {
        let claims: AccessClaims = self.codec.decode(token)?;
        claims.check_lifetime(self.clock.now())?;
        let user_id = claims.user_id()?;

        let stamp_matches = self
            .identity
            .find_user(user_id)
            .await?
            .is_some_and(|user| user.security_stamp == claims.security_stamp);
        if !stamp_matches {
            return Err(AuthError::SecurityStampMismatch);
        }

        let record = self
            .store
            .find_by_access_hash(&TokenHash::of(token))
            .await?
            .filter(|record| record.user_id == user_id)
            .ok_or(AuthError::TokenRevoked)?;
        if !record.is_access_valid(self.clock.now()) {
            return Err(AuthError::TokenExpired);
        }

        Ok(Principal {
            user_id,
            username: claims.name.clone(),
            roles: claims.roles.clone(),
            record_id: record.id,
            claims,
        })
    }

    async fn check_refresh_token(&self, token: &str) -> Result<TokenRecord> {
        let claims: RefreshClaims = self.codec.decode(token)?;
        let now = self.clock.now();
        claims.check_lifetime(now)?;

        let record = self
            .store
            .find_by_refresh_hash(&TokenHash::of(token))
            .await?
            .ok_or_else(|| AuthError::refresh_rejected("refresh token already used or revoked"))?;
        if record.is_expired(now) {
            return Err(AuthError::refresh_rejected("refresh token expired"));
        }
        Ok(record)
    }
}

impl fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenValidator")
            .field("codec", &self.codec)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Extracts the token from a bearer authorization header value. The scheme
/// is matched case-insensitively.
///
/// ```
/// use tessera_authn::validator::parse_bearer;
///
/// assert_eq!(parse_bearer("Bearer abc.def.ghi"), Some("abc.def.ghi"));
/// assert_eq!(parse_bearer("bearer  abc"), Some("abc"));
/// assert_eq!(parse_bearer("Basic dXNlcjpwdw=="), None);
/// assert_eq!(parse_bearer("Bearer "), None);
/// ```
#[must_use]
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case(BEARER_SCHEME) && !token.is_empty()).then_some(token)
}
