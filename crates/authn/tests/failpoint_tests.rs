#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection in the authn crate.
//!
//! These tests require both `failpoints` and `testutil` features:
//! ```bash
//! cargo test -p tessera-authn --features failpoints,testutil --test failpoint_tests
//! ```

use tessera_authn::{AuthError, testutil::TestHarness};
use tessera_storage::{StorageError, auth::TokenRecordStore};

#[tokio::test]
async fn issuer_failure_before_commit_keeps_presented_token_redeemable() {
    let scenario = fail::FailScenario::setup();
    let harness = TestHarness::new();
    let user = harness.add_user(1, "alice", &["reader"]);
    let pair = harness.issuer.generate_token(&user).await.expect("generate");
    let record = harness.validator().verify_refresh_token(&pair.refresh_token).await.expect("live");

    fail::cfg("issuer-before-commit", "return").expect("failed to configure fail point");
    let result = harness.issuer.renew_token(&record).await;
    assert!(
        matches!(result, Err(AuthError::Storage(StorageError::Internal { .. }))),
        "got {result:?}"
    );
    fail::remove("issuer-before-commit");

    let records = harness.store.list_by_user(user.id).await.expect("list");
    assert_eq!(records, vec![pair.record.clone()]);
    assert!(harness.validator().validate(&pair.access_token).await.is_ok());

    let renewed = harness.issuer.renew_token(&record).await.expect("retry after recovery");
    assert_ne!(renewed.record.id, pair.record.id);

    scenario.teardown();
}

#[tokio::test]
async fn store_failure_during_generate_surfaces_as_storage_error() {
    let scenario = fail::FailScenario::setup();
    let harness = TestHarness::new();
    let user = harness.add_user(2, "bob", &[]);

    fail::cfg("token-store-before-commit", "return").expect("failed to configure fail point");
    let result = harness.issuer.generate_token(&user).await;
    fail::remove("token-store-before-commit");

    let err = result.expect_err("generate should fail");
    assert!(!err.is_unauthorized(), "storage failures are not rejections");
    assert_eq!(err.status_code(), 500);
    assert!(harness.store.list_by_user(user.id).await.expect("list").is_empty());
    assert_eq!(harness.issuer.metrics().snapshot().generated, 0);

    scenario.teardown();
}
