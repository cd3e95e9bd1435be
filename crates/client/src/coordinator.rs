//! Single-flight token refresh.
//!
//! When a request comes back unauthorized, [`RefreshCoordinator`] renews the
//! credentials and replays the request once. However many requests fail at
//! the same moment, only one of them (the leader) calls the refresh
//! endpoint; the rest register as waiters and resume when the leader
//! finishes:
//!
//! ```text
//!            ┌─ 401 ─► leader ── POST refresh ──┬─► store tokens ─► retry
//!  request ──┤                                  │
//!            └─ 401 ─► waiter ◄─── outcome ─────┘─► retry, or own 401
//! ```
//!
//! A request whose access token was already replaced by the time its 401
//! arrives, or that went out with no token at all while another request's
//! refresh was under way, is retried straight away with the current token. A request that
//! is unauthorized again after its retry fails with that response.
//!
//! Lock order is coordinator state, then credentials. No lock is held
//! across an `.await`.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{
    attempt::AttemptContext,
    credentials::CredentialStore,
    error::{ClientError, RefreshFailure, Result},
    http::{ApiRequest, ApiResponse, RefreshTokenRequest, TokenResponse, Transport},
    metrics::CoordinatorMetrics,
    pipeline::{Pipeline, UnauthorizedPredicate, status_401},
};

/// What a refresh produced, as seen by waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshOutcome {
    Refreshed,
    Failed,
}

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

/// How an unauthorized request takes part in recovery.
enum Join {
    /// Call the refresh endpoint with this token.
    Lead(String),
    /// Wait for the refresh in flight.
    Wait(oneshot::Receiver<RefreshOutcome>),
    /// The credentials changed while the request was in flight.
    Retry,
    /// Nothing to refresh with; credentials were cleared.
    GiveUp,
}

/// Sends requests through the pipeline and recovers from expired access
/// tokens with at most one concurrent refresh.
pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    pipeline: Pipeline,
    unauthorized: UnauthorizedPredicate,
    refresh_path: String,
    state: Mutex<RefreshState>,
    metrics: CoordinatorMetrics,
}

#[bon::bon]
impl RefreshCoordinator {
    /// Creates a coordinator.
    ///
    /// # Optional Fields
    ///
    /// * `pipeline` - Stages around every request (default: [`Pipeline::standard`]).
    /// * `unauthorized` - Which responses trigger a refresh (default: status `401`).
    /// * `metrics` - Shared counters (default: a fresh collector).
    #[builder]
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialStore>,
        #[builder(into)] refresh_path: String,
        pipeline: Option<Pipeline>,
        #[builder(default = status_401())] unauthorized: UnauthorizedPredicate,
        #[builder(default)] metrics: CoordinatorMetrics,
    ) -> Self {
        let pipeline = pipeline.unwrap_or_else(|| Pipeline::standard(Arc::clone(&credentials)));
        Self {
            transport,
            credentials,
            pipeline,
            unauthorized,
            refresh_path,
            state: Mutex::new(RefreshState::default()),
            metrics,
        }
    }
}

impl RefreshCoordinator {
    /// Sends `request`, refreshing the credentials and retrying once if the
    /// response is unauthorized.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Status`] with the request's own last response
    /// when it is not successful, including when the refresh failed, and any
    /// transport error unchanged.
    #[tracing::instrument(
        name = "send",
        skip_all,
        fields(method = %request.method, path = %request.path)
    )]
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut attempt = AttemptContext::fresh();
        loop {
            let prepared = self.pipeline.prepare(request.clone());
            let sent_token = prepared.bearer_token().map(str::to_owned);

            let err = match self
                .transport
                .send(prepared)
                .await
                .and_then(|response| self.pipeline.finish(response))
            {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            if !self.is_unauthorized(&err) {
                return Err(err);
            }
            if !attempt.is_fresh() {
                self.record_failure(&RefreshFailure::LoopGuard);
                return Err(err);
            }

            match self.join_refresh(sent_token.as_deref()) {
                Join::Lead(refresh_token) => {
                    if self.lead_refresh(refresh_token).await != RefreshOutcome::Refreshed {
                        return Err(err);
                    }
                    attempt = attempt.into_retried();
                },
                Join::Wait(outcome) => {
                    self.metrics.record_queued();
                    tracing::debug!("waiting on refresh in flight");
                    if outcome.await != Ok(RefreshOutcome::Refreshed) {
                        return Err(err);
                    }
                    attempt = attempt.into_queued();
                },
                Join::Retry => {
                    self.metrics.record_stale_retry();
                    tracing::debug!("credentials replaced while in flight, retrying");
                    attempt = attempt.into_queued();
                },
                Join::GiveUp => return Err(err),
            }
        }
    }

    /// Returns `true` while a refresh is in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.state.lock().refreshing
    }

    /// Returns the credential store.
    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Returns the metrics collector.
    #[must_use]
    pub fn metrics(&self) -> &CoordinatorMetrics {
        &self.metrics
    }

    fn is_unauthorized(&self, err: &ClientError) -> bool {
        err.response().is_some_and(|response| (self.unauthorized)(response))
    }

    fn join_refresh(&self, sent_token: Option<&str>) -> Join {
        let mut state = self.state.lock();
        if state.refreshing {
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            return Join::Wait(rx);
        }

        // Sent with an older token, or with none while the slot was lapsed.
        if let Some(current) = self.credentials.credentials()
            && sent_token != Some(current.access_token.as_str())
        {
            return Join::Retry;
        }

        match self.credentials.refresh_token() {
            Some(refresh_token) => {
                state.refreshing = true;
                Join::Lead(refresh_token)
            },
            None => {
                self.clear_credentials();
                self.record_failure(&RefreshFailure::NoRefreshToken);
                Join::GiveUp
            },
        }
    }

    #[tracing::instrument(name = "refresh_tokens", skip_all)]
    async fn lead_refresh(&self, refresh_token: String) -> RefreshOutcome {
        let mut guard = ReleaseGuard { coordinator: self, outcome: None };
        self.metrics.record_refresh_call();

        let outcome = match self.call_refresh(&refresh_token).await {
            Ok(tokens) => {
                self.credentials.store_tokens(&tokens);
                self.metrics.record_refresh_success();
                tracing::debug!(user_id = tokens.user.id, "credentials refreshed");
                RefreshOutcome::Refreshed
            },
            Err(failure) => {
                self.record_failure(&failure);
                RefreshOutcome::Failed
            },
        };
        guard.outcome = Some(outcome);
        outcome
    }

    async fn call_refresh(
        &self,
        refresh_token: &str,
    ) -> std::result::Result<TokenResponse, RefreshFailure> {
        let request =
            ApiRequest::post(self.refresh_path.as_str(), &RefreshTokenRequest { refresh_token })
                .map_err(|e| RefreshFailure::Decode(e.to_string()))?;
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| RefreshFailure::Transport(e.to_string()))?;

        if !response.is_success() {
            if (self.unauthorized)(&response) {
                self.clear_credentials();
            }
            return Err(RefreshFailure::RefreshRejected { status: response.status });
        }
        response.json::<TokenResponse>().map_err(|e| RefreshFailure::Decode(e.to_string()))
    }

    fn release(&self, outcome: RefreshOutcome) {
        let waiters = {
            let mut state = self.state.lock();
            state.refreshing = false;
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            // A waiter whose request was dropped has nobody to tell.
            let _ = waiter.send(outcome);
        }
    }

    fn clear_credentials(&self) {
        self.credentials.clear();
        self.metrics.record_clear();
        tracing::info!("credentials cleared");
    }

    fn record_failure(&self, failure: &RefreshFailure) {
        tracing::warn!(reason = failure.reason(), error = %failure, "unauthorized request not recovered");
        self.metrics.record_failure(failure);
    }
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresh_path", &self.refresh_path)
            .field("pipeline", &self.pipeline)
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

/// Hands the outcome to waiters when the leader finishes or is dropped.
struct ReleaseGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    outcome: Option<RefreshOutcome>,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        let outcome = self.outcome.unwrap_or_else(|| {
            self.coordinator.record_failure(&RefreshFailure::Abandoned);
            RefreshOutcome::Failed
        });
        self.coordinator.release(outcome);
    }
}
