#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection in the storage crate.
//!
//! These tests require both `failpoints` and `testutil` features:
//! ```bash
//! cargo test -p tessera-storage --features failpoints,testutil --test failpoint_tests
//! ```

use chrono::{Duration, Utc};
use tessera_storage::{
    StorageError, UserId,
    auth::{SessionChange, TokenRecordStore},
    testutil::{make_record, memory_token_store},
};

#[tokio::test]
async fn failure_before_commit_leaves_store_unchanged() {
    let scenario = fail::FailScenario::setup();
    let store = memory_token_store();
    let user = UserId::from(1);
    let old = make_record(user, "old", Utc::now(), Duration::days(1));
    store.insert(&old).await.expect("seed insert");
    let sessions = store.snapshot(user).await.expect("snapshot");

    fail::cfg("token-store-before-commit", "return").expect("failed to configure fail point");

    let change = SessionChange::builder()
        .user_id(user)
        .observed_version(sessions.version)
        .consume(old.clone())
        .insert(make_record(user, "new", Utc::now(), Duration::days(1)))
        .build();
    let result = store.commit(change).await;
    assert!(matches!(result, Err(StorageError::Internal { .. })), "got {result:?}");

    fail::remove("token-store-before-commit");

    let after = store.snapshot(user).await.expect("snapshot");
    assert_eq!(after.version, sessions.version);
    assert_eq!(after.records, vec![old]);

    scenario.teardown();
}

#[tokio::test]
async fn commit_without_failpoint_succeeds() {
    let scenario = fail::FailScenario::setup();
    let store = memory_token_store();
    let user = UserId::from(2);

    let record = make_record(user, "fresh", Utc::now(), Duration::days(1));
    store.insert(&record).await.expect("insert should succeed without fail point");
    assert_eq!(store.list_by_user(user).await.expect("list"), vec![record]);

    scenario.teardown();
}
