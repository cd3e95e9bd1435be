//! Ordered request and response stages around the transport.
//!
//! ```text
//!  ApiRequest ─► RequestStage₁ ─► … ─► Transport ─► ResponseStage₁ ─► … ─► Result
//! ```
//!
//! Request stages rewrite the outgoing request; response stages may turn a
//! response into an error. Both run synchronously, in insertion order, and
//! need no network to test. The stages [`AuthClient`](crate::AuthClient)
//! installs first are [`BearerStage`] and [`StatusStage`].

use std::{fmt, sync::Arc};

use crate::{
    credentials::CredentialStore,
    error::{ClientError, Result},
    http::{AUTHORIZATION, ApiRequest, ApiResponse, BEARER_PREFIX},
};

/// Decides whether a response means the credentials were rejected.
pub type UnauthorizedPredicate = Arc<dyn Fn(&ApiResponse) -> bool + Send + Sync>;

/// The default predicate: status `401`.
#[must_use]
pub fn status_401() -> UnauthorizedPredicate {
    Arc::new(|response: &ApiResponse| response.status == 401)
}

/// Rewrites an outgoing request.
pub trait RequestStage: Send + Sync {
    /// Returns the request to send.
    fn on_request(&self, request: ApiRequest) -> ApiRequest;
}

/// Inspects an incoming response.
pub trait ResponseStage: Send + Sync {
    /// Passes the response on, or fails the request.
    ///
    /// # Errors
    ///
    /// Returns the error the request should fail with.
    fn on_response(&self, response: ApiResponse) -> Result<ApiResponse>;
}

/// Attaches `Authorization: Bearer <access token>` while the full triple is
/// stored, and strips any authorization header otherwise.
#[derive(Debug)]
pub struct BearerStage {
    credentials: Arc<CredentialStore>,
}

impl BearerStage {
    /// Creates a stage reading from `credentials`.
    #[must_use]
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self { credentials }
    }
}

impl RequestStage for BearerStage {
    fn on_request(&self, mut request: ApiRequest) -> ApiRequest {
        match self.credentials.credentials() {
            Some(credentials) => request
                .set_header(AUTHORIZATION, format!("{BEARER_PREFIX}{}", credentials.access_token)),
            None => {
                request.remove_header(AUTHORIZATION);
            },
        }
        request
    }
}

/// Fails every non-2xx response with [`ClientError::Status`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusStage;

impl ResponseStage for StatusStage {
    fn on_response(&self, response: ApiResponse) -> Result<ApiResponse> {
        if response.is_success() { Ok(response) } else { Err(ClientError::Status(response)) }
    }
}

/// The ordered stage lists.
#[derive(Clone, Default)]
pub struct Pipeline {
    request_stages: Vec<Arc<dyn RequestStage>>,
    response_stages: Vec<Arc<dyn ResponseStage>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the minimal authenticated pipeline: [`BearerStage`] on the
    /// way out, [`StatusStage`] on the way in.
    #[must_use]
    pub fn standard(credentials: Arc<CredentialStore>) -> Self {
        Self::new()
            .with_request_stage(Arc::new(BearerStage::new(credentials)))
            .with_response_stage(Arc::new(StatusStage))
    }

    /// Appends a request stage.
    #[must_use]
    pub fn with_request_stage(mut self, stage: Arc<dyn RequestStage>) -> Self {
        self.request_stages.push(stage);
        self
    }

    /// Appends a response stage.
    #[must_use]
    pub fn with_response_stage(mut self, stage: Arc<dyn ResponseStage>) -> Self {
        self.response_stages.push(stage);
        self
    }

    /// Runs every request stage in order.
    #[must_use]
    pub fn prepare(&self, request: ApiRequest) -> ApiRequest {
        self.request_stages.iter().fold(request, |request, stage| stage.on_request(request))
    }

    /// Runs every response stage in order, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first stage error.
    pub fn finish(&self, response: ApiResponse) -> Result<ApiResponse> {
        self.response_stages.iter().try_fold(response, |response, stage| stage.on_response(response))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("request_stages", &self.request_stages.len())
            .field("response_stages", &self.response_stages.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use tessera_storage::ManualClock;

    use super::*;
    use crate::{
        http::{SignedInUser, TokenResponse},
        settings::ClientSettings,
        storage::MemoryCredentialStorage,
    };

    fn credentials() -> Arc<CredentialStore> {
        let settings = ClientSettings::builder().origin("https://app.example.com").build().unwrap();
        let clock = Arc::new(ManualClock::default());
        let storage = Arc::new(MemoryCredentialStorage::with_clock(clock.clone()));
        Arc::new(CredentialStore::new(&settings, storage, clock))
    }

    fn tokens() -> TokenResponse {
        TokenResponse {
            token_type: "Bearer".into(),
            access_token: "access-1".into(),
            access_token_expires_in: 60_000,
            refresh_token: "refresh-1".into(),
            refresh_token_expires_in: 3_600_000,
            user: SignedInUser { id: 1, username: "alice".into(), roles: vec![] },
        }
    }

    struct Tag(&'static str);

    impl RequestStage for Tag {
        fn on_request(&self, request: ApiRequest) -> ApiRequest {
            let trail = request.header("x-trail").unwrap_or_default().to_owned();
            request.with_header("x-trail", format!("{trail}{}", self.0))
        }
    }

    #[test]
    fn test_bearer_stage_attaches_token_for_full_triple() {
        let store = credentials();
        store.store_tokens(&tokens());
        let stage = BearerStage::new(store);

        let request = stage.on_request(ApiRequest::get("items"));
        assert_eq!(request.header(AUTHORIZATION), Some("Bearer access-1"));
    }

    #[test]
    fn test_bearer_stage_strips_header_for_partial_triple() {
        let store = credentials();
        store.set_access_token("access-1", Duration::from_secs(60));
        let stage = BearerStage::new(store);

        let request =
            stage.on_request(ApiRequest::get("items").with_header("Authorization", "Bearer stale"));
        assert_eq!(request.header(AUTHORIZATION), None);
    }

    #[test]
    fn test_stages_run_in_order() {
        let pipeline = Pipeline::new()
            .with_request_stage(Arc::new(Tag("a")))
            .with_request_stage(Arc::new(Tag("b")));
        let request = pipeline.prepare(ApiRequest::get("items"));
        assert_eq!(request.header("x-trail"), Some("ab"));
    }

    #[test]
    fn test_status_stage_fails_non_success() {
        let pipeline = Pipeline::new().with_response_stage(Arc::new(StatusStage));
        assert!(pipeline.finish(ApiResponse::with_status(204)).is_ok());

        let err = pipeline.finish(ApiResponse::with_status(401)).unwrap_err();
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn test_default_predicate_matches_401_only() {
        let predicate = status_401();
        assert!(predicate(&ApiResponse::with_status(401)));
        assert!(!predicate(&ApiResponse::with_status(403)));
    }
}
