//! Counters for token lifecycle operations.
//!
//! # Examples
//!
//! ```
//! use tessera_authn::{AuthError, TokenMetrics};
//!
//! let metrics = TokenMetrics::new();
//! metrics.record_generated();
//! metrics.record_rejection(&AuthError::TokenExpired);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.generated, 1);
//! assert_eq!(snapshot.rejected_expired, 1);
//! assert_eq!(snapshot.total_rejections(), 1);
//! ```

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::error::AuthError;

/// Snapshot of token metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct TokenMetricsSnapshot {
    // Lifecycle operations
    /// Token pairs issued at signin.
    #[builder(default)]
    pub generated: u64,
    /// Token pairs issued by renewal.
    #[builder(default)]
    pub renewed: u64,
    /// Records removed by revoke and revoke-all.
    #[builder(default)]
    pub revoked: u64,
    /// Expired records removed by cleanup and the sweeper.
    #[builder(default)]
    pub purged: u64,
    /// Access tokens accepted by the validator.
    #[builder(default)]
    pub validated: u64,
    /// Commits retried after a concurrent modification.
    #[builder(default)]
    pub commit_conflicts: u64,

    // Rejections by reason
    /// Wrong username or password.
    #[builder(default)]
    pub rejected_credentials: u64,
    /// Expired or not yet valid tokens.
    #[builder(default)]
    pub rejected_expired: u64,
    /// Bad algorithm, signature, structure, issuer or audience.
    #[builder(default)]
    pub rejected_malformed: u64,
    /// Security stamp no longer current.
    #[builder(default)]
    pub rejected_stamp: u64,
    /// No live record for the token.
    #[builder(default)]
    pub rejected_revoked: u64,
    /// Refresh tokens that could not be redeemed.
    #[builder(default)]
    pub rejected_refresh: u64,
}

impl TokenMetricsSnapshot {
    /// Returns the total number of rejected requests.
    #[must_use]
    pub fn total_rejections(&self) -> u64 {
        self.rejected_credentials
            + self.rejected_expired
            + self.rejected_malformed
            + self.rejected_stamp
            + self.rejected_revoked
            + self.rejected_refresh
    }
}

#[derive(Default)]
struct TokenMetricsInner {
    generated: AtomicU64,
    renewed: AtomicU64,
    revoked: AtomicU64,
    purged: AtomicU64,
    validated: AtomicU64,
    commit_conflicts: AtomicU64,
    rejected_credentials: AtomicU64,
    rejected_expired: AtomicU64,
    rejected_malformed: AtomicU64,
    rejected_stamp: AtomicU64,
    rejected_revoked: AtomicU64,
    rejected_refresh: AtomicU64,
}

/// Metrics collector for the issuer and validator.
///
/// Cloning is cheap and every clone feeds the same counters.
#[derive(Clone, Default)]
pub struct TokenMetrics {
    inner: Arc<TokenMetricsInner>,
}

impl TokenMetrics {
    /// Creates a new metrics collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an issued pair at signin.
    pub fn record_generated(&self) {
        self.inner.generated.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a renewal.
    pub fn record_renewed(&self) {
        self.inner.renewed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records `count` revoked records.
    pub fn record_revoked(&self, count: usize) {
        self.inner.revoked.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records `count` purged expired records.
    pub fn record_purged(&self, count: usize) {
        self.inner.purged.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records an accepted access token.
    pub fn record_validated(&self) {
        self.inner.validated.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a commit retried after a conflict.
    pub fn record_commit_conflict(&self) {
        self.inner.commit_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rejection, bucketed by reason. Storage and configuration
    /// failures are not rejections and are ignored.
    pub fn record_rejection(&self, error: &AuthError) {
        let counter = match error {
            AuthError::InvalidCredentials => &self.inner.rejected_credentials,
            AuthError::TokenExpired | AuthError::TokenNotYetValid => &self.inner.rejected_expired,
            AuthError::SecurityStampMismatch => &self.inner.rejected_stamp,
            AuthError::TokenRevoked => &self.inner.rejected_revoked,
            AuthError::RefreshRejected(_) => &self.inner.rejected_refresh,
            AuthError::Configuration(_) | AuthError::Storage(_) => return,
            _ => &self.inner.rejected_malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TokenMetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let inner = &self.inner;
        TokenMetricsSnapshot {
            generated: load(&inner.generated),
            renewed: load(&inner.renewed),
            revoked: load(&inner.revoked),
            purged: load(&inner.purged),
            validated: load(&inner.validated),
            commit_conflicts: load(&inner.commit_conflicts),
            rejected_credentials: load(&inner.rejected_credentials),
            rejected_expired: load(&inner.rejected_expired),
            rejected_malformed: load(&inner.rejected_malformed),
            rejected_stamp: load(&inner.rejected_stamp),
            rejected_revoked: load(&inner.rejected_revoked),
            rejected_refresh: load(&inner.rejected_refresh),
        }
    }
}

impl fmt::Debug for TokenMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TokenMetrics").field(&self.snapshot()).finish()
    }
}

#[cfg(test)]
mod tests {
    use tessera_storage::StorageError;

    use super::*;

    #[test]
    fn test_rejections_bucket_by_reason() {
        let metrics = TokenMetrics::new();
        metrics.record_rejection(&AuthError::TokenNotYetValid);
        metrics.record_rejection(&AuthError::InvalidSignature);
        metrics.record_rejection(&AuthError::malformed_token("x"));
        metrics.record_rejection(&AuthError::SecurityStampMismatch);
        metrics.record_rejection(&AuthError::refresh_rejected("gone"));
        metrics.record_rejection(&AuthError::from(StorageError::internal("down")));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rejected_expired, 1);
        assert_eq!(snapshot.rejected_malformed, 2);
        assert_eq!(snapshot.rejected_stamp, 1);
        assert_eq!(snapshot.rejected_refresh, 1);
        assert_eq!(snapshot.total_rejections(), 5);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = TokenMetrics::new();
        let clone = metrics.clone();
        clone.record_revoked(3);
        clone.record_purged(2);
        metrics.record_renewed();

        let expected = TokenMetricsSnapshot::builder().revoked(3).purged(2).renewed(1).build();
        assert_eq!(metrics.snapshot(), expected);
    }
}
