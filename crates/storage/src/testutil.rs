//! Shared test utilities for token record storage.
//!
//! Feature-gated behind `testutil` so helpers never leak into production
//! builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! tessera-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use tessera_storage::testutil::{memory_token_store, make_record};
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    auth::{KvTokenRecordStore, TokenHash, TokenRecord, TokenRecordStore},
    error::{StorageError, StorageResult},
    memory::MemoryBackend,
    types::UserId,
};

/// Creates an empty record store over a fresh [`MemoryBackend`].
#[must_use]
pub fn memory_token_store() -> Arc<KvTokenRecordStore<MemoryBackend>> {
    Arc::new(KvTokenRecordStore::new(MemoryBackend::new()))
}

/// Builds a record for `user` whose token hashes are derived from `tag`.
///
/// The access token lives 30 minutes and the refresh token `refresh_ttl`
/// from `now`. A negative `refresh_ttl` yields an already-expired record.
#[must_use]
pub fn make_record(
    user: impl Into<UserId>,
    tag: &str,
    now: DateTime<Utc>,
    refresh_ttl: Duration,
) -> TokenRecord {
    TokenRecord::builder()
        .user_id(user.into())
        .access_token_hash(TokenHash::of(&format!("access-{tag}")))
        .refresh_token_hash(TokenHash::of(&format!("refresh-{tag}")))
        .access_token_expires_at(now + Duration::minutes(30))
        .refresh_token_expires_at(now + refresh_ttl)
        .build()
}

/// Creates a store pre-populated with `count` live records for `user`.
///
/// # Panics
///
/// Panics if any insert fails (should not happen with `MemoryBackend`).
pub async fn populated_token_store(
    user: impl Into<UserId>,
    count: usize,
) -> Arc<KvTokenRecordStore<MemoryBackend>> {
    let user = user.into();
    let store = memory_token_store();
    let now = Utc::now();
    for i in 0..count {
        let record = make_record(user, &format!("seed-{user}-{i}"), now, Duration::days(1));
        store.insert(&record).await.expect("populate insert failed");
    }
    store
}

/// Assert that a [`StorageResult`] is a [`StorageError::Conflict`].
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use tessera_storage::assert_conflict;
/// use tessera_storage::error::{StorageError, StorageResult};
///
/// let result: StorageResult<()> = Err(StorageError::Conflict);
/// assert_conflict!(result);
/// ```
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict)),
            "expected StorageError::Conflict, got: {:?}",
            $result,
        );
    };
    ($result:expr, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict)),
            "{}: expected StorageError::Conflict, got: {:?}",
            $msg,
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is `Ok`, returning the inner value.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Returns `true` if the result is a conflict.
pub fn is_conflict<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::Conflict))
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_populated_store_has_records() {
        let store = populated_token_store(11, 3).await;
        let records = store.list_by_user(UserId::from(11)).await.expect("list");
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_make_record_negative_ttl_is_expired() {
        let now = Utc::now();
        let record = make_record(1, "x", now, Duration::seconds(-1));
        assert!(record.is_expired(now));
    }

    #[test]
    fn test_assert_macros() {
        let conflict: StorageResult<()> = Err(StorageError::Conflict);
        assert_conflict!(conflict);
        assert!(is_conflict(&conflict));

        let ok: StorageResult<u8> = Ok(1);
        assert_eq!(assert_storage_ok!(ok), 1);
    }
}
