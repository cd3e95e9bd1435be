//! Concurrency tests for refresh token rotation.
//!
//! Many tasks redeem the same refresh token at once. Exactly one of them may
//! receive a new pair; every other one must be told the token was already
//! used, and the store must end up holding only the winner's record.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use tessera_authn::{
    AuthError, TokenPair, TokenSettings,
    testutil::{TEST_AUDIENCE, TEST_ISSUER, TEST_SECRET, TestHarness},
};
use tessera_storage::auth::TokenRecordStore;
use tokio::task::JoinSet;

/// Number of concurrent renewals per round.
const CONCURRENCY: usize = 16;

/// Number of contended rounds.
const ROUNDS: usize = 20;

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

/// A harness whose issuer retries long enough for every task of a round to
/// eventually commit.
fn patient_harness() -> TestHarness {
    let settings = TokenSettings::builder()
        .issuer(TEST_ISSUER)
        .audience(TEST_AUDIENCE)
        .secret(TEST_SECRET)
        .max_commit_attempts(CONCURRENCY * 2)
        .build()
        .expect("settings");
    TestHarness::with_settings(settings)
}

/// Redeems `refresh_token` the way the refresh endpoint does.
async fn redeem(harness: Arc<TestHarness>, refresh_token: String) -> Result<TokenPair, AuthError> {
    let record = harness.validator().verify_refresh_token(&refresh_token).await?;
    harness.issuer.renew_token(&record).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_renewal_of_same_token_has_one_winner() {
    for round in 0..ROUNDS {
        let harness = Arc::new(TestHarness::new());
        let user = harness.add_user(1, "alice", &["reader"]);
        let pair = harness.issuer.generate_token(&user).await.expect("generate");

        let mut set = JoinSet::new();
        for _ in 0..CONCURRENCY {
            set.spawn(redeem(Arc::clone(&harness), pair.refresh_token.clone()));
        }

        let mut winners = Vec::new();
        while let Some(result) = set.join_next().await {
            match result.expect("task should not panic") {
                Ok(new_pair) => winners.push(new_pair),
                Err(AuthError::RefreshRejected(_)) => {},
                Err(other) => panic!("round {round}: unexpected error {other:?}"),
            }
        }

        assert_eq!(winners.len(), 1, "round {round}: exactly one renewal may win");
        let records = harness.store.list_by_user(user.id).await.expect("list");
        assert_eq!(records, vec![winners[0].record.clone()], "round {round}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_renewals_of_distinct_sessions_all_succeed() {
    let harness = Arc::new(patient_harness());
    let user = harness.add_user(1, "alice", &["reader"]);

    let mut pairs = Vec::new();
    for _ in 0..CONCURRENCY {
        pairs.push(harness.issuer.generate_token(&user).await.expect("generate"));
    }

    let mut set = JoinSet::new();
    for pair in &pairs {
        set.spawn(redeem(Arc::clone(&harness), pair.refresh_token.clone()));
    }

    let mut renewed = 0usize;
    while let Some(result) = set.join_next().await {
        result.expect("task should not panic").expect("distinct sessions never collide");
        renewed += 1;
    }

    assert_eq!(renewed, CONCURRENCY);
    let records = harness.store.list_by_user(user.id).await.expect("list");
    assert_eq!(records.len(), CONCURRENCY);
    for old in &pairs {
        assert!(records.iter().all(|r| r.id != old.record.id), "old record survived");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn renewal_racing_revocation_leaves_no_live_record() {
    for round in 0..ROUNDS {
        let harness = Arc::new(TestHarness::new());
        let user = harness.add_user(1, "alice", &["reader"]);
        let pair = harness.issuer.generate_token(&user).await.expect("generate");

        let renew = tokio::spawn(redeem(Arc::clone(&harness), pair.refresh_token.clone()));
        let revoke = {
            let harness = Arc::clone(&harness);
            let record = pair.record.clone();
            tokio::spawn(async move { harness.issuer.revoke_token(&record).await })
        };

        let renewed = renew.await.expect("renew task");
        revoke.await.expect("revoke task").expect("revoke never fails on a live store");

        let records = harness.store.list_by_user(user.id).await.expect("list");
        assert!(records.iter().all(|r| r.id != pair.record.id), "round {round}: revoked record survived");
        match renewed {
            // Renewal committed first; revocation of the old hash matched nothing.
            Ok(new_pair) => assert_eq!(records, vec![new_pair.record], "round {round}"),
            Err(AuthError::RefreshRejected(_)) => assert!(records.is_empty(), "round {round}"),
            Err(other) => panic!("round {round}: unexpected error {other:?}"),
        }
    }
}
