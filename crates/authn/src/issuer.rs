//! Token pair issuance, rotation and revocation.
//!
//! Every operation follows the same shape: read the user's records with
//! [`TokenRecordStore::snapshot`], plan the change (expired-record cleanup,
//! session policy, the record being redeemed, the record being created), then
//! [`commit`](TokenRecordStore::commit) it as one transaction. A commit that
//! loses a race with another change of the same user is re-planned from a
//! fresh snapshot, up to [`TokenSettings::max_commit_attempts`] times.
//!
//! ```text
//!  snapshot ──► plan ──► commit ──► Ok
//!     ▲                    │
//!     └──── Conflict ──────┘
//! ```
//!
//! When two renewals present the same refresh token, the one that commits
//! second re-reads, finds the presented hash gone, and fails with
//! [`AuthError::RefreshRejected`].

use std::{collections::BTreeMap, fmt, sync::Arc};

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use fail::fail_point;
use tessera_storage::{
    Clock, StorageError, SystemClock, UserId,
    auth::{
        SessionChange, TokenHash, TokenRecord, TokenRecordStore, UserSessions,
        audit::{
            AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger,
            record_resource, user_resource,
        },
    },
};
use uuid::Uuid;

use crate::{
    antiforgery::{AntiForgeryHook, NoopAntiForgery},
    error::{AuthError, Result},
    identity::{IdentityVerifier, User},
    jwt::{AccessClaims, JwtCodec, RefreshClaims},
    metrics::TokenMetrics,
    settings::TokenSettings,
    validator::TokenValidator,
};

/// A freshly issued access/refresh token pair.
#[derive(Clone)]
pub struct TokenPair {
    /// Signed access token.
    pub access_token: String,
    /// Signed refresh token.
    pub refresh_token: String,
    /// When the pair was issued (whole seconds).
    pub issued_at: DateTime<Utc>,
    /// When the access token stops being accepted.
    pub access_token_expires_at: DateTime<Utc>,
    /// When the refresh token stops being redeemable.
    pub refresh_token_expires_at: DateTime<Utc>,
    /// Claims embedded in the access token.
    pub claims: AccessClaims,
    /// The persisted record backing the pair.
    pub record: TokenRecord,
    /// The user the pair was issued to.
    pub user: User,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("access_token_expires_at", &self.access_token_expires_at)
            .field("refresh_token_expires_at", &self.refresh_token_expires_at)
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Which lifecycle operation a commit belongs to.
#[derive(Clone, Copy)]
enum Issue<'a> {
    Generate,
    Renew(&'a TokenRecord),
}

/// Issues, rotates and revokes token pairs.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tessera_authn::{MemoryIdentityVerifier, TokenIssuer, TokenSettings};
/// use tessera_storage::{MemoryBackend, auth::KvTokenRecordStore};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let settings = TokenSettings::builder()
///     .issuer("https://auth.example.com")
///     .audience("https://api.example.com")
///     .secret("0123456789abcdef0123456789abcdef")
///     .build()
///     .unwrap();
/// let identity = Arc::new(MemoryIdentityVerifier::new());
/// let alice = identity.add_user(1, "alice", "pw", ["admin"]).unwrap();
///
/// let issuer = TokenIssuer::builder()
///     .settings(settings)
///     .store(Arc::new(KvTokenRecordStore::new(MemoryBackend::new())))
///     .identity(identity)
///     .build()
///     .unwrap();
///
/// let pair = issuer.generate_token(&alice).await.unwrap();
/// let principal = issuer.validator().validate(&pair.access_token).await.unwrap();
/// assert_eq!(principal.username, "alice");
/// # });
/// ```
pub struct TokenIssuer {
    settings: TokenSettings,
    codec: JwtCodec,
    store: Arc<dyn TokenRecordStore>,
    identity: Arc<dyn IdentityVerifier>,
    clock: Arc<dyn Clock>,
    antiforgery: Arc<dyn AntiForgeryHook>,
    audit: Arc<dyn AuditLogger>,
    metrics: TokenMetrics,
}

#[bon::bon]
impl TokenIssuer {
    /// Creates an issuer.
    ///
    /// # Optional Fields
    ///
    /// * `clock` - Time source (default: [`SystemClock`]).
    /// * `antiforgery` - Anti-forgery hook (default: [`NoopAntiForgery`]).
    /// * `audit` - Audit backend (default: [`TracingAuditLogger`]).
    /// * `metrics` - Counter set, shared with the validator built by
    ///   [`validator`](Self::validator).
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
        #[builder(default = Arc::new(NoopAntiForgery) as Arc<dyn AntiForgeryHook>)]
        antiforgery: Arc<dyn AntiForgeryHook>,
        #[builder(default = Arc::new(TracingAuditLogger) as Arc<dyn AuditLogger>)]
        audit: Arc<dyn AuditLogger>,
        #[builder(default)] metrics: TokenMetrics,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            codec: JwtCodec::new(&settings),
            settings,
            store,
            identity,
            clock,
            antiforgery,
            audit,
            metrics,
        })
    }

    /// Returns a validator sharing this issuer's settings, store, directory,
    /// clock and metrics.
    #[must_use]
    pub fn validator(&self) -> TokenValidator {
        TokenValidator::from_parts(
            self.codec.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.identity),
            Arc::clone(&self.clock),
            self.metrics.clone(),
        )
    }

    /// Returns the issuer's metrics.
    #[must_use]
    pub fn metrics(&self) -> &TokenMetrics {
        &self.metrics
    }

    /// Returns the settings.
    #[must_use]
    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    /// Issues a new pair to `user`.
    ///
    /// The user's expired records are deleted in the same transaction, and
    /// when multiple sessions are disabled so is every other record.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the store fails or keeps conflicting.
    #[tracing::instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn generate_token(&self, user: &User) -> Result<TokenPair> {
        let pair = self.issue(user, Issue::Generate).await?;
        self.metrics.record_generated();
        self.audit_success(AuditAction::GenerateToken, &pair.record, BTreeMap::new()).await;
        Ok(pair)
    }

    /// Rotates the pair backed by `presented`: the record is consumed and a
    /// new pair is issued in one transaction.
    ///
    /// `presented` is normally obtained from
    /// [`TokenValidator::verify_refresh_token`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RefreshRejected`] if the record is no longer
    /// live (already rotated, revoked or expired) or its user no longer
    /// exists, and [`AuthError::Storage`] on store failures.
    #[tracing::instrument(skip(self, presented), fields(user_id = %presented.user_id, record_id = %presented.id))]
    pub async fn renew_token(&self, presented: &TokenRecord) -> Result<TokenPair> {
        let result = match self.identity.find_user(presented.user_id).await? {
            Some(user) => self.issue(&user, Issue::Renew(presented)).await,
            None => Err(AuthError::refresh_rejected("user no longer exists")),
        };

        match result {
            Ok(pair) => {
                self.metrics.record_renewed();
                let metadata = BTreeMap::from([("previous_record".to_owned(), presented.id.to_string())]);
                self.audit_success(AuditAction::RenewToken, &pair.record, metadata).await;
                Ok(pair)
            },
            Err(err) => {
                if let AuthError::RefreshRejected(reason) = &err {
                    tracing::warn!(reason = %reason, "refresh token rejected");
                    self.metrics.record_rejection(&err);
                    self.audit_failure(AuditAction::RejectRefresh, presented, reason).await;
                }
                Err(err)
            },
        }
    }

    /// Revokes the pair backed by `record` together with any record sharing
    /// its refresh-token hash. Revoking an already revoked pair is not an
    /// error. Returns how many records were removed.
    ///
    /// The user's expired records are cleaned up in the same transaction,
    /// and when multiple sessions are disabled every record of the user goes.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the store fails or keeps conflicting.
    #[tracing::instrument(skip(self, record), fields(user_id = %record.user_id, record_id = %record.id))]
    pub async fn revoke_token(&self, record: &TokenRecord) -> Result<usize> {
        let removed = self
            .commit_with_retry(record.user_id, |sessions, now| {
                let remove: Vec<TokenRecord> = sessions
                    .records
                    .iter()
                    .filter(|r| {
                        r.refresh_token_hash == record.refresh_token_hash
                            || r.is_expired(now)
                            || !self.settings.multiple_sessions()
                    })
                    .cloned()
                    .collect();
                Ok(SessionChange::builder()
                    .user_id(record.user_id)
                    .observed_version(sessions.version)
                    .remove(remove)
                    .build())
            })
            .await?
            .remove
            .len();

        self.antiforgery.clear();
        self.metrics.record_revoked(removed);
        let metadata = BTreeMap::from([("removed".to_owned(), removed.to_string())]);
        self.audit_success(AuditAction::RevokeToken, record, metadata).await;
        Ok(removed)
    }

    /// Revokes every pair of a user. Returns how many records were removed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the store fails or keeps conflicting.
    #[tracing::instrument(skip(self))]
    pub async fn revoke_all(&self, user_id: UserId) -> Result<usize> {
        let removed = self.store.delete_by_user(user_id).await?;

        self.antiforgery.clear();
        self.metrics.record_revoked(removed);
        let event = AuditEvent::builder()
            .timestamp(self.clock.now())
            .actor(user_resource(user_id))
            .action(AuditAction::RevokeAllTokens)
            .resource(user_resource(user_id))
            .result(AuditResult::Success)
            .metadata(BTreeMap::from([("removed".to_owned(), removed.to_string())]))
            .build();
        self.audit.log(&event).await;
        Ok(removed)
    }

    /// Deletes every record whose refresh token has expired, across all
    /// users. Returns how many records were removed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the store fails.
    #[tracing::instrument(skip(self))]
    pub async fn purge_expired(&self) -> Result<usize> {
        let removed = self.store.delete_expired(self.clock.now()).await?;
        if removed > 0 {
            self.metrics.record_purged(removed);
            let event = AuditEvent::builder()
                .timestamp(self.clock.now())
                .actor("system:sweeper")
                .action(AuditAction::PurgeExpired)
                .resource("token-records")
                .result(AuditResult::Success)
                .metadata(BTreeMap::from([("removed".to_owned(), removed.to_string())]))
                .build();
            self.audit.log(&event).await;
        }
        Ok(removed)
    }

    async fn issue(&self, user: &User, kind: Issue<'_>) -> Result<TokenPair> {
        let roles = self.identity.roles_of(user).await?;
        let mut minted = None;

        let change = self
            .commit_with_retry(user.id, |sessions, now| {
                let consumed = match kind {
                    Issue::Generate => None,
                    Issue::Renew(presented) => {
                        let live = sessions
                            .find_by_refresh_hash(&presented.refresh_token_hash)
                            .filter(|r| r.id == presented.id)
                            .ok_or_else(|| {
                                AuthError::refresh_rejected("refresh token already used or revoked")
                            })?;
                        if live.is_expired(now) {
                            return Err(AuthError::refresh_rejected("refresh token expired"));
                        }
                        Some(live.clone())
                    },
                };

                let remove: Vec<TokenRecord> = sessions
                    .records
                    .iter()
                    .filter(|r| consumed.as_ref().is_none_or(|c| c.id != r.id))
                    .filter(|r| r.is_expired(now) || !self.settings.multiple_sessions())
                    .cloned()
                    .collect();

                let pair = self.mint(user, roles.clone(), now)?;
                let change = SessionChange::builder()
                    .user_id(user.id)
                    .observed_version(sessions.version)
                    .remove(remove)
                    .maybe_consume(consumed)
                    .insert(pair.record.clone())
                    .build();
                minted = Some(pair);
                Ok(change)
            })
            .await?;

        let pair = minted.ok_or_else(|| {
            AuthError::from(StorageError::internal("commit finished without a minted pair"))
        })?;

        let purged = change.remove.iter().filter(|r| r.is_expired(pair.issued_at)).count();
        if purged > 0 {
            self.metrics.record_purged(purged);
        }
        self.antiforgery.regenerate(&pair.claims);
        Ok(pair)
    }

    /// Runs `plan` against fresh snapshots until its change commits.
    ///
    /// `plan` receives the snapshot and the current time and may reject the
    /// operation outright. Returns the change that was committed.
    async fn commit_with_retry<F>(&self, user_id: UserId, mut plan: F) -> Result<SessionChange>
    where
        F: FnMut(&UserSessions, DateTime<Utc>) -> Result<SessionChange> + Send,
    {
        for attempt in 1..=self.settings.max_commit_attempts() {
            let sessions = self.store.snapshot(user_id).await?;
            let now = self.clock.now().trunc_subsecs(0);
            let change = plan(&sessions, now)?;

            fail_point!("issuer-before-commit", |_| {
                Err(AuthError::from(StorageError::internal("injected failure before issuer commit")))
            });

            match self.store.commit(change.clone()).await {
                Ok(()) => return Ok(change),
                Err(StorageError::Conflict) => {
                    self.metrics.record_commit_conflict();
                    tracing::debug!(%user_id, attempt, "token commit conflicted, re-planning");
                },
                Err(e) => return Err(e.into()),
            }
        }

        Err(StorageError::conflict().into())
    }

    fn mint(&self, user: &User, roles: Vec<String>, now: DateTime<Utc>) -> Result<TokenPair> {
        let access_expires_at = expiry(now, self.settings.access_lifetime())?;
        let refresh_expires_at = expiry(now, self.settings.refresh_lifetime())?;

        let claims = AccessClaims {
            jti: Uuid::new_v4().simple().to_string(),
            iss: self.settings.issuer().to_owned(),
            aud: self.settings.audience().to_owned(),
            sub: user.id.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: access_expires_at.timestamp(),
            name: user.username.clone(),
            security_stamp: user.security_stamp.clone(),
            roles,
        };
        let refresh_claims = RefreshClaims {
            jti: Uuid::new_v4().simple().to_string(),
            iss: self.settings.issuer().to_owned(),
            aud: self.settings.audience().to_owned(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: refresh_expires_at.timestamp(),
            serial: Uuid::new_v4().simple().to_string(),
        };

        let access_token = self.codec.encode(&claims)?;
        let refresh_token = self.codec.encode(&refresh_claims)?;
        let record = TokenRecord::builder()
            .user_id(user.id)
            .access_token_hash(TokenHash::of(&access_token))
            .refresh_token_hash(TokenHash::of(&refresh_token))
            .access_token_expires_at(access_expires_at)
            .refresh_token_expires_at(refresh_expires_at)
            .build();

        Ok(TokenPair {
            access_token,
            refresh_token,
            issued_at: now,
            access_token_expires_at: access_expires_at,
            refresh_token_expires_at: refresh_expires_at,
            claims,
            record,
            user: user.clone(),
        })
    }

    async fn audit_success(
        &self,
        action: AuditAction,
        record: &TokenRecord,
        metadata: BTreeMap<String, String>,
    ) {
        let event = AuditEvent::builder()
            .timestamp(self.clock.now())
            .actor(user_resource(record.user_id))
            .action(action)
            .resource(record_resource(record.user_id, record.id))
            .result(AuditResult::Success)
            .metadata(metadata)
            .build();
        self.audit.log(&event).await;
    }

    async fn audit_failure(&self, action: AuditAction, record: &TokenRecord, reason: &str) {
        let event = AuditEvent::builder()
            .timestamp(self.clock.now())
            .actor(user_resource(record.user_id))
            .action(action)
            .resource(record_resource(record.user_id, record.id))
            .result(AuditResult::Failure(reason.to_owned()))
            .build();
        self.audit.log(&event).await;
    }
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("settings", &self.settings)
            .field("clock", &self.clock)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

fn expiry(now: DateTime<Utc>, lifetime: TimeDelta) -> Result<DateTime<Utc>> {
    now.checked_add_signed(lifetime)
        .ok_or_else(|| AuthError::configuration("token lifetime exceeds the representable range"))
}
