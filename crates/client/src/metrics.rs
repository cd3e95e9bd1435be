//! Counters for the refresh coordinator.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::error::RefreshFailure;

/// Snapshot of coordinator metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct CoordinatorMetricsSnapshot {
    /// Refresh calls sent to the server.
    #[builder(default)]
    pub refresh_calls: u64,
    /// Refresh calls that produced new credentials.
    #[builder(default)]
    pub refresh_successes: u64,
    /// Refreshes that failed, including those never sent for lack of a
    /// refresh token.
    #[builder(default)]
    pub refresh_failures: u64,
    /// Requests that waited on another request's refresh.
    #[builder(default)]
    pub queued_waiters: u64,
    /// Requests retried without a refresh because their token had already
    /// been replaced.
    #[builder(default)]
    pub stale_token_retries: u64,
    /// Requests unauthorized again after a retry.
    #[builder(default)]
    pub loop_guard_trips: u64,
    /// Times the stored credentials were cleared by the coordinator.
    #[builder(default)]
    pub credential_clears: u64,
}

#[derive(Default)]
struct CoordinatorMetricsInner {
    refresh_calls: AtomicU64,
    refresh_successes: AtomicU64,
    refresh_failures: AtomicU64,
    queued_waiters: AtomicU64,
    stale_token_retries: AtomicU64,
    loop_guard_trips: AtomicU64,
    credential_clears: AtomicU64,
}

/// Metrics collector for [`RefreshCoordinator`](crate::RefreshCoordinator).
#[derive(Clone, Default)]
pub struct CoordinatorMetrics {
    inner: Arc<CoordinatorMetricsInner>,
}

impl CoordinatorMetrics {
    /// Creates a new metrics collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_refresh_call(&self) {
        self.inner.refresh_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh_success(&self) {
        self.inner.refresh_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, failure: &RefreshFailure) {
        let counter = match failure {
            RefreshFailure::LoopGuard => &self.inner.loop_guard_trips,
            _ => &self.inner.refresh_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queued(&self) {
        self.inner.queued_waiters.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale_retry(&self) {
        self.inner.stale_token_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_clear(&self) {
        self.inner.credential_clears.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CoordinatorMetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let inner = &self.inner;
        CoordinatorMetricsSnapshot {
            refresh_calls: load(&inner.refresh_calls),
            refresh_successes: load(&inner.refresh_successes),
            refresh_failures: load(&inner.refresh_failures),
            queued_waiters: load(&inner.queued_waiters),
            stale_token_retries: load(&inner.stale_token_retries),
            loop_guard_trips: load(&inner.loop_guard_trips),
            credential_clears: load(&inner.credential_clears),
        }
    }
}

impl fmt::Debug for CoordinatorMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CoordinatorMetrics").field(&self.snapshot()).finish()
    }
}
