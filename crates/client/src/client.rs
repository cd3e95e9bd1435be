//! The client facade.

use std::{fmt, sync::Arc};

use tessera_storage::{Clock, SystemClock};
use tokio::sync::watch;

use crate::{
    coordinator::RefreshCoordinator,
    credentials::{CredentialStore, Credentials},
    error::{ClientError, Result},
    http::{ApiRequest, ApiResponse, RefreshTokenRequest, SignedInUser, SigninRequest, TokenResponse, Transport},
    metrics::{CoordinatorMetrics, CoordinatorMetricsSnapshot},
    pipeline::{
        BearerStage, Pipeline, RequestStage, ResponseStage, StatusStage, UnauthorizedPredicate,
        status_401,
    },
    settings::ClientSettings,
    storage::{CredentialStorage, MemoryCredentialStorage},
};

/// Signs in, sends authenticated requests, and signs out.
///
/// Requests sent through [`send`](Self::send) carry the stored access token
/// and are recovered by the [`RefreshCoordinator`] when it has expired.
/// [`signin`](Self::signin) and the refresh call go to the transport
/// directly, so they never wait on a refresh themselves.
pub struct AuthClient {
    settings: ClientSettings,
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    coordinator: RefreshCoordinator,
}

#[bon::bon]
impl AuthClient {
    /// Creates a client.
    ///
    /// # Optional Fields
    ///
    /// * `storage` - Credential persistence (default: [`MemoryCredentialStorage`] on `clock`).
    /// * `clock` - Time source for credential expiry (default: [`SystemClock`]).
    /// * `unauthorized` - Which responses trigger a refresh (default: status `401`).
    /// * `request_stages` - Run after the bearer stage, in order.
    /// * `response_stages` - Run before the status stage, in order.
    /// * `metrics` - Coordinator counters (default: a fresh collector).
    #[builder]
    pub fn new(
        settings: ClientSettings,
        transport: Arc<dyn Transport>,
        storage: Option<Arc<dyn CredentialStorage>>,
        #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)] clock: Arc<dyn Clock>,
        #[builder(default = status_401())] unauthorized: UnauthorizedPredicate,
        #[builder(default)] request_stages: Vec<Arc<dyn RequestStage>>,
        #[builder(default)] response_stages: Vec<Arc<dyn ResponseStage>>,
        #[builder(default)] metrics: CoordinatorMetrics,
    ) -> Self {
        let storage = storage.unwrap_or_else(|| {
            Arc::new(MemoryCredentialStorage::with_clock(Arc::clone(&clock)))
                as Arc<dyn CredentialStorage>
        });
        let credentials = Arc::new(CredentialStore::new(&settings, storage, clock));

        let mut pipeline =
            Pipeline::new().with_request_stage(Arc::new(BearerStage::new(Arc::clone(&credentials))));
        for stage in request_stages {
            pipeline = pipeline.with_request_stage(stage);
        }
        for stage in response_stages {
            pipeline = pipeline.with_response_stage(stage);
        }
        pipeline = pipeline.with_response_stage(Arc::new(StatusStage));

        let coordinator = RefreshCoordinator::builder()
            .transport(Arc::clone(&transport))
            .credentials(Arc::clone(&credentials))
            .refresh_path(settings.refresh_path())
            .pipeline(pipeline)
            .unauthorized(unauthorized)
            .metrics(metrics)
            .build();

        Self { settings, transport, credentials, coordinator }
    }
}

impl AuthClient {
    /// Exchanges a username and password for credentials and stores them.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Status`] if the server refuses the sign-in,
    /// [`ClientError::Decode`] if its answer is not a token response, and
    /// any transport error unchanged. Stored credentials are left untouched
    /// on error.
    #[tracing::instrument(skip(self, password))]
    pub async fn signin(&self, username: &str, password: &str) -> Result<SignedInUser> {
        let request =
            ApiRequest::post(self.settings.generate_path(), &SigninRequest { username, password })?;
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            tracing::info!(status = response.status, "sign-in refused");
            return Err(ClientError::Status(response));
        }

        let tokens: TokenResponse = response.json()?;
        self.credentials.store_tokens(&tokens);
        tracing::info!(user_id = tokens.user.id, "signed in");
        Ok(tokens.user)
    }

    /// Revokes the stored refresh token and clears the credentials.
    ///
    /// The credentials are cleared whether or not the server could be
    /// reached; a failed revocation is logged.
    #[tracing::instrument(skip(self))]
    pub async fn signout(&self) {
        if let Some(refresh_token) = self.credentials.refresh_token() {
            match self.revoke(&refresh_token).await {
                Ok(()) => tracing::debug!("refresh token revoked"),
                Err(e) => tracing::warn!(error = %e, "refresh token revocation failed"),
            }
        }
        self.credentials.clear();
        tracing::info!("signed out");
    }

    async fn revoke(&self, refresh_token: &str) -> Result<()> {
        let request =
            ApiRequest::post(self.settings.revoke_path(), &RefreshTokenRequest { refresh_token })?;
        let response = self.transport.send(request).await?;
        if response.is_success() { Ok(()) } else { Err(ClientError::Status(response)) }
    }

    /// Sends an authenticated request.
    ///
    /// # Errors
    ///
    /// See [`RefreshCoordinator::send`].
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.coordinator.send(request).await
    }

    /// Sends an authenticated `GET`.
    ///
    /// # Errors
    ///
    /// See [`RefreshCoordinator::send`].
    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::get(path)).await
    }

    /// Returns the signed-in user, if any.
    #[must_use]
    pub fn user(&self) -> Option<SignedInUser> {
        self.credentials.user()
    }

    /// Returns `true` while a full credential triple is stored.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.credentials.credentials().is_some()
    }

    /// Subscribes to changes of the signed-in user.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<SignedInUser>> {
        self.credentials.subscribe()
    }

    /// Returns the stored credential triple.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.credentials()
    }

    /// Returns the credential store.
    #[must_use]
    pub fn credential_store(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Returns a snapshot of the refresh counters.
    #[must_use]
    pub fn metrics(&self) -> CoordinatorMetricsSnapshot {
        self.coordinator.metrics().snapshot()
    }

    /// Returns the settings.
    #[must_use]
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }
}

impl fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthClient")
            .field("settings", &self.settings)
            .field("credentials", &self.credentials)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}
