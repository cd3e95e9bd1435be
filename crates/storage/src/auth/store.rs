//! Storage trait for token-pair records.
//!
//! [`TokenRecordStore`] is the persistence seam used by the token issuer and
//! validator. [`KvTokenRecordStore`] implements it on top of any
//! [`StorageBackend`].
//!
//! # Record Lifecycle
//!
//! ```text
//! ┌─────────────┐  renew (consume)  ┌─────────────┐
//! │  Issued     │──────────────────►│  Deleted    │
//! │ (generate / │  revoke / expiry  │ (hash looks │
//! │   renew)    │──────────────────►│  up nothing)│
//! └─────────────┘                   └─────────────┘
//! ```
//!
//! # Key Layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `token-records/{user_id}/{record_id}` | JSON [`TokenRecord`] |
//! | `token-refresh/{refresh_hash}` | record key |
//! | `token-access/{access_hash}` | record key |
//! | `token-versions/{user_id}` | per-user change counter |
//!
//! # Consistency
//!
//! Every mutation of a user's records goes through [`TokenRecordStore::commit`],
//! which runs as a single transaction guarded by:
//!
//! 1. a compare-and-set of the user's version counter against the version the caller read in
//!    [`snapshot`](TokenRecordStore::snapshot),
//! 2. a compare-and-delete of the consumed record's refresh index entry,
//! 3. insert-if-absent on the new record's refresh and access index entries.
//!
//! Two concurrent renewals presenting the same refresh token therefore cannot
//! both commit: the second one fails with [`StorageError::Conflict`] and, on
//! re-reading, finds the presented hash gone.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fail::fail_point;

use crate::{
    auth::{TokenHash, TokenRecord},
    backend::{StorageBackend, prefix_end},
    error::{StorageError, StorageResult},
    types::UserId,
};

/// Key prefix for serialized token records.
pub const TOKEN_RECORD_PREFIX: &str = "token-records/";

/// Key prefix for the refresh-hash index.
pub const REFRESH_INDEX_PREFIX: &str = "token-refresh/";

/// Key prefix for the access-hash index.
pub const ACCESS_INDEX_PREFIX: &str = "token-access/";

/// Key prefix for per-user version counters.
pub const VERSION_PREFIX: &str = "token-versions/";

/// Default number of attempts the convenience mutations make before giving
/// up with [`StorageError::Conflict`].
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Point-in-time view of one user's records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSessions {
    /// The user the records belong to.
    pub user_id: UserId,
    /// Change counter observed when the records were read. Pass it back in
    /// [`SessionChange::observed_version`].
    pub version: u64,
    /// Live records, in storage order.
    pub records: Vec<TokenRecord>,
}

impl UserSessions {
    /// Returns the record whose refresh token hashes to `hash`.
    #[must_use]
    pub fn find_by_refresh_hash(&self, hash: &TokenHash) -> Option<&TokenRecord> {
        self.records.iter().find(|r| &r.refresh_token_hash == hash)
    }

    /// Returns the records whose refresh token expired before `now`.
    pub fn expired(&self, now: DateTime<Utc>) -> impl Iterator<Item = &TokenRecord> {
        self.records.iter().filter(move |r| r.is_expired(now))
    }
}

/// An atomic change to one user's records.
///
/// # Example
///
/// ```
/// use tessera_storage::auth::SessionChange;
///
/// let change = SessionChange::builder().user_id(7).observed_version(3).build();
/// assert!(change.is_empty());
/// ```
#[derive(Debug, Clone, bon::Builder)]
pub struct SessionChange {
    /// The user whose records change.
    #[builder(into)]
    pub user_id: UserId,
    /// Version from the [`UserSessions`] snapshot this change was planned on.
    pub observed_version: u64,
    /// Records to delete unconditionally (beyond the version check).
    #[builder(default)]
    pub remove: Vec<TokenRecord>,
    /// Record being redeemed. Its refresh index entry must still point at it
    /// at commit time, otherwise the whole change is rejected.
    pub consume: Option<TokenRecord>,
    /// Record to insert. Its hashes must not be indexed yet.
    pub insert: Option<TokenRecord>,
}

impl SessionChange {
    /// Returns `true` if committing this change would not touch any record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.consume.is_none() && self.insert.is_none()
    }
}

/// Persistence layer for token-pair records.
///
/// # Error Handling
///
/// Operations return [`StorageResult`]. [`StorageError::Conflict`] from
/// [`commit`](Self::commit) means the user's records changed since the
/// snapshot; callers re-read and re-plan.
#[async_trait]
pub trait TokenRecordStore: Send + Sync {
    /// Stores a new record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] if either of the record's hashes is
    /// already indexed.
    async fn insert(&self, record: &TokenRecord) -> StorageResult<()>;

    /// Looks up the record whose refresh token hashes to `hash`.
    async fn find_by_refresh_hash(&self, hash: &TokenHash) -> StorageResult<Option<TokenRecord>>;

    /// Looks up the record whose access token hashes to `hash`.
    async fn find_by_access_hash(&self, hash: &TokenHash) -> StorageResult<Option<TokenRecord>>;

    /// Lists every record of a user.
    async fn list_by_user(&self, user_id: UserId) -> StorageResult<Vec<TokenRecord>>;

    /// Deletes every record sharing the refresh-token hash. Returns how many
    /// records were removed; unknown hashes remove nothing.
    async fn delete_by_refresh_hash(&self, hash: &TokenHash) -> StorageResult<usize>;

    /// Deletes every record of a user. Returns how many were removed.
    async fn delete_by_user(&self, user_id: UserId) -> StorageResult<usize>;

    /// Deletes every record whose refresh token expired before `now`, across
    /// all users. Returns how many were removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> StorageResult<usize>;

    /// Reads one user's records together with their version counter.
    async fn snapshot(&self, user_id: UserId) -> StorageResult<UserSessions>;

    /// Applies a planned change atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] if the user's version moved, the
    /// consumed record's refresh index no longer points at it, or an inserted
    /// hash is already indexed. Nothing is applied in that case.
    async fn commit(&self, change: SessionChange) -> StorageResult<()>;
}

/// [`TokenRecordStore`] over a key/value [`StorageBackend`].
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use tessera_storage::{
///     MemoryBackend, UserId,
///     auth::{KvTokenRecordStore, TokenHash, TokenRecord, TokenRecordStore},
/// };
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = KvTokenRecordStore::new(MemoryBackend::new());
/// let now = Utc::now();
/// let record = TokenRecord::builder()
///     .user_id(7)
///     .access_token_hash(TokenHash::of("access"))
///     .refresh_token_hash(TokenHash::of("refresh"))
///     .access_token_expires_at(now + Duration::minutes(30))
///     .refresh_token_expires_at(now + Duration::days(200))
///     .build();
///
/// store.insert(&record).await.unwrap();
/// let found = store.find_by_refresh_hash(&TokenHash::of("refresh")).await.unwrap();
/// assert_eq!(found, Some(record));
/// assert_eq!(store.delete_by_user(UserId::from(7)).await.unwrap(), 1);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct KvTokenRecordStore<B> {
    backend: B,
    max_attempts: usize,
}

impl<B: StorageBackend> KvTokenRecordStore<B> {
    /// Creates a store over `backend`.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self { backend, max_attempts: DEFAULT_MAX_ATTEMPTS }
    }

    /// Sets how many snapshot/commit rounds the convenience mutations make
    /// before returning [`StorageError::Conflict`]. Values below 1 are
    /// treated as 1.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn read_record(&self, record_key: &[u8]) -> StorageResult<Option<TokenRecord>> {
        match self.backend.get(record_key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn follow_index(&self, index_key: Vec<u8>) -> StorageResult<Option<TokenRecord>> {
        match self.backend.get(&index_key).await? {
            Some(record_key) => self.read_record(&record_key).await,
            None => Ok(None),
        }
    }

    /// Removes the records selected by `plan`, re-planning on conflicts.
    async fn remove_where<F>(&self, user_id: UserId, plan: F) -> StorageResult<usize>
    where
        F: Fn(&UserSessions) -> Vec<TokenRecord> + Send + Sync,
    {
        for attempt in 1..=self.max_attempts {
            let sessions = self.snapshot(user_id).await?;
            let remove = plan(&sessions);
            if remove.is_empty() {
                return Ok(0);
            }

            let removed = remove.len();
            let change = SessionChange::builder()
                .user_id(user_id)
                .observed_version(sessions.version)
                .remove(remove)
                .build();

            match self.commit(change).await {
                Ok(()) => return Ok(removed),
                Err(StorageError::Conflict) => {
                    tracing::debug!(%user_id, attempt, "record removal conflicted, re-reading");
                },
                Err(e) => return Err(e),
            }
        }

        Err(StorageError::conflict())
    }
}

fn record_key(record: &TokenRecord) -> Vec<u8> {
    format!("{TOKEN_RECORD_PREFIX}{:020}/{}", record.user_id.0, record.id).into_bytes()
}

fn user_prefix(user_id: UserId) -> Vec<u8> {
    format!("{TOKEN_RECORD_PREFIX}{:020}/", user_id.0).into_bytes()
}

fn refresh_index_key(hash: &TokenHash) -> Vec<u8> {
    format!("{REFRESH_INDEX_PREFIX}{hash}").into_bytes()
}

fn access_index_key(hash: &TokenHash) -> Vec<u8> {
    format!("{ACCESS_INDEX_PREFIX}{hash}").into_bytes()
}

fn version_key(user_id: UserId) -> Vec<u8> {
    format!("{VERSION_PREFIX}{:020}", user_id.0).into_bytes()
}

fn encode_version(version: u64) -> Vec<u8> {
    version.to_string().into_bytes()
}

fn decode_version(bytes: &[u8]) -> StorageResult<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StorageError::serialization("corrupt token version counter"))
}

#[async_trait]
impl<B: StorageBackend> TokenRecordStore for KvTokenRecordStore<B> {
    #[tracing::instrument(skip(self, record), fields(user_id = %record.user_id, record_id = %record.id))]
    async fn insert(&self, record: &TokenRecord) -> StorageResult<()> {
        for attempt in 1..=self.max_attempts {
            let sessions = self.snapshot(record.user_id).await?;
            let change = SessionChange::builder()
                .user_id(record.user_id)
                .observed_version(sessions.version)
                .insert(record.clone())
                .build();

            match self.commit(change).await {
                Ok(()) => return Ok(()),
                Err(StorageError::Conflict) => {
                    tracing::debug!(attempt, "record insert conflicted, re-reading");
                },
                Err(e) => return Err(e),
            }
        }

        Err(StorageError::conflict())
    }

    #[tracing::instrument(skip_all)]
    async fn find_by_refresh_hash(&self, hash: &TokenHash) -> StorageResult<Option<TokenRecord>> {
        self.follow_index(refresh_index_key(hash)).await
    }

    #[tracing::instrument(skip_all)]
    async fn find_by_access_hash(&self, hash: &TokenHash) -> StorageResult<Option<TokenRecord>> {
        self.follow_index(access_index_key(hash)).await
    }

    #[tracing::instrument(skip(self))]
    async fn list_by_user(&self, user_id: UserId) -> StorageResult<Vec<TokenRecord>> {
        let prefix = user_prefix(user_id);
        let entries = match prefix_end(&prefix) {
            Some(end) => self.backend.get_range(prefix..end).await?,
            None => self.backend.get_range(prefix..).await?,
        };

        entries
            .iter()
            .map(|kv| serde_json::from_slice(&kv.value).map_err(StorageError::from))
            .collect()
    }

    #[tracing::instrument(skip_all)]
    async fn delete_by_refresh_hash(&self, hash: &TokenHash) -> StorageResult<usize> {
        let Some(record) = self.find_by_refresh_hash(hash).await? else {
            return Ok(0);
        };

        self.remove_where(record.user_id, |sessions| {
            sessions.records.iter().filter(|r| &r.refresh_token_hash == hash).cloned().collect()
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_by_user(&self, user_id: UserId) -> StorageResult<usize> {
        self.remove_where(user_id, |sessions| sessions.records.clone()).await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let prefix = TOKEN_RECORD_PREFIX.as_bytes().to_vec();
        let entries = match prefix_end(&prefix) {
            Some(end) => self.backend.get_range(prefix..end).await?,
            None => self.backend.get_range(prefix..).await?,
        };

        let mut users = BTreeSet::new();
        for kv in &entries {
            let record: TokenRecord = serde_json::from_slice(&kv.value)?;
            if record.is_expired(now) {
                users.insert(record.user_id);
            }
        }

        let mut removed = 0;
        for user_id in users {
            removed += self
                .remove_where(user_id, |sessions| sessions.expired(now).cloned().collect())
                .await?;
        }

        if removed > 0 {
            tracing::info!(removed, "purged expired token records");
        }
        Ok(removed)
    }

    #[tracing::instrument(skip(self))]
    async fn snapshot(&self, user_id: UserId) -> StorageResult<UserSessions> {
        // The version is read first: a write landing between the two reads
        // makes the snapshot look newer than its version, so the eventual
        // commit conflicts instead of silently succeeding.
        let version = match self.backend.get(&version_key(user_id)).await? {
            Some(bytes) => decode_version(&bytes)?,
            None => 0,
        };
        let records = self.list_by_user(user_id).await?;

        Ok(UserSessions { user_id, version, records })
    }

    #[tracing::instrument(
        skip(self, change),
        fields(
            user_id = %change.user_id,
            version = change.observed_version,
            remove = change.remove.len(),
            consume = change.consume.is_some(),
            insert = change.insert.is_some(),
        )
    )]
    async fn commit(&self, change: SessionChange) -> StorageResult<()> {
        if change.is_empty() {
            return Ok(());
        }

        let owned_by_user = change
            .remove
            .iter()
            .chain(change.consume.iter())
            .chain(change.insert.iter())
            .all(|r| r.user_id == change.user_id);
        if !owned_by_user {
            return Err(StorageError::internal("session change touches another user's records"));
        }

        let mut txn = self.backend.transaction().await?;

        let expected_version =
            (change.observed_version > 0).then(|| encode_version(change.observed_version));
        txn.compare_and_set(
            version_key(change.user_id),
            expected_version,
            encode_version(change.observed_version + 1),
        )?;

        let consumed_id = change.consume.as_ref().map(|r| r.id);
        if let Some(consumed) = &change.consume {
            txn.compare_and_delete(refresh_index_key(&consumed.refresh_token_hash), record_key(consumed))?;
            txn.delete(access_index_key(&consumed.access_token_hash));
            txn.delete(record_key(consumed));
        }

        for record in change.remove.iter().filter(|r| Some(r.id) != consumed_id) {
            txn.delete(refresh_index_key(&record.refresh_token_hash));
            txn.delete(access_index_key(&record.access_token_hash));
            txn.delete(record_key(record));
        }

        if let Some(record) = &change.insert {
            let key = record_key(record);
            txn.compare_and_set(refresh_index_key(&record.refresh_token_hash), None, key.clone())?;
            txn.compare_and_set(access_index_key(&record.access_token_hash), None, key.clone())?;
            txn.set(key, serde_json::to_vec(record)?);
        }

        fail_point!("token-store-before-commit", |_| {
            Err(StorageError::internal("injected failure before token store commit"))
        });
        txn.commit().await
    }
}
