//! Request and response bodies of the token endpoints, and the service that
//! answers them.
//!
//! | Endpoint | Request | Response |
//! |----------|---------|----------|
//! | [`GENERATE_PATH`] | [`GenerateRequest`] | [`TokenResponse`] |
//! | [`REFRESH_PATH`] | [`RenewRequest`] | [`TokenResponse`] |
//! | [`REVOKE_PATH`] | [`RevokeRequest`] | empty |
//!
//! Bodies are JSON with camelCase field names. Routing and HTTP framing
//! belong to the hosting server.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tessera_storage::UserId;

use crate::{
    error::{AuthError, Result},
    identity::{IdentityVerifier, User},
    issuer::{TokenIssuer, TokenPair},
    validator::{Principal, TokenValidator},
};

/// Path of the sign-in endpoint.
pub const GENERATE_PATH: &str = "account/token/generate";

/// Path of the renewal endpoint.
pub const REFRESH_PATH: &str = "account/token/refresh";

/// Path of the revocation endpoint.
pub const REVOKE_PATH: &str = "account/token/revoke";

/// Sign-in request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for GenerateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateRequest").field("username", &self.username).finish_non_exhaustive()
    }
}

/// Renewal request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewRequest {
    /// The refresh token being redeemed.
    pub refresh_token: String,
}

/// Revocation request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    /// The refresh token of the pair to revoke.
    pub refresh_token: String,
}

/// User fields returned to clients. The security stamp stays server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    /// Account id.
    pub id: UserId,
    /// Login name.
    pub username: String,
    /// Role names.
    pub roles: Vec<String>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self { id: user.id, username: user.username.clone(), roles: user.roles.clone() }
    }
}

/// Body returned by the generate and refresh endpoints.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// Always `"Bearer"`.
    pub token_type: String,
    /// Signed access token.
    pub access_token: String,
    /// Access token lifetime in milliseconds.
    pub access_token_expires_in: i64,
    /// Signed refresh token.
    pub refresh_token: String,
    /// Refresh token lifetime in milliseconds.
    pub refresh_token_expires_in: i64,
    /// The signed-in user.
    pub user: UserView,
}

impl From<&TokenPair> for TokenResponse {
    fn from(pair: &TokenPair) -> Self {
        Self {
            token_type: crate::validator::BEARER_SCHEME.to_owned(),
            access_token: pair.access_token.clone(),
            access_token_expires_in: (pair.access_token_expires_at - pair.issued_at)
                .num_milliseconds(),
            refresh_token: pair.refresh_token.clone(),
            refresh_token_expires_in: (pair.refresh_token_expires_at - pair.issued_at)
                .num_milliseconds(),
            user: UserView::from(&pair.user),
        }
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("access_token_expires_in", &self.access_token_expires_in)
            .field("refresh_token_expires_in", &self.refresh_token_expires_in)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Error body returned with a non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// HTTP status code.
    pub status: u16,
    /// Caller-safe description.
    pub title: String,
}

impl From<&AuthError> for ErrorBody {
    fn from(err: &AuthError) -> Self {
        Self { status: err.status_code(), title: err.public_message().to_owned() }
    }
}

/// Answers the token endpoints.
pub struct TokenService {
    issuer: Arc<TokenIssuer>,
    validator: TokenValidator,
    identity: Arc<dyn IdentityVerifier>,
}

impl TokenService {
    /// Creates a service over `issuer`, verifying passwords against
    /// `identity`.
    #[must_use]
    pub fn new(issuer: Arc<TokenIssuer>, identity: Arc<dyn IdentityVerifier>) -> Self {
        let validator = issuer.validator();
        Self { issuer, validator, identity }
    }

    /// Returns the issuer.
    #[must_use]
    pub fn issuer(&self) -> &Arc<TokenIssuer> {
        &self.issuer
    }

    /// Signs a user in.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] for a wrong username or
    /// password.
    #[tracing::instrument(skip_all, fields(username = %request.username))]
    pub async fn generate(&self, request: &GenerateRequest) -> Result<TokenResponse> {
        let Some(user) = self.identity.verify(&request.username, &request.password).await? else {
            let err = AuthError::InvalidCredentials;
            self.issuer.metrics().record_rejection(&err);
            tracing::info!("sign-in rejected");
            return Err(err);
        };

        let pair = self.issuer.generate_token(&user).await?;
        Ok(TokenResponse::from(&pair))
    }

    /// Rotates the pair behind a refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RefreshRejected`] if the token cannot be
    /// redeemed, including when it was already rotated.
    #[tracing::instrument(skip_all)]
    pub async fn renew(&self, request: &RenewRequest) -> Result<TokenResponse> {
        let record = self.validator.verify_refresh_token(&request.refresh_token).await?;
        let pair = self.issuer.renew_token(&record).await?;
        Ok(TokenResponse::from(&pair))
    }

    /// Revokes the pair behind a refresh token. Tokens that cannot be
    /// redeemed are ignored, so signing out twice is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] on store failures.
    #[tracing::instrument(skip_all)]
    pub async fn revoke(&self, request: &RevokeRequest) -> Result<()> {
        match self.validator.verify_refresh_token(&request.refresh_token).await {
            Ok(record) => {
                self.issuer.revoke_token(&record).await?;
                Ok(())
            },
            Err(AuthError::RefreshRejected(reason)) => {
                tracing::debug!(%reason, "revoke ignored for unredeemable refresh token");
                Ok(())
            },
            Err(e) => Err(e),
        }
    }

    /// Authenticates a request from its `Authorization` header value.
    ///
    /// # Errors
    ///
    /// Returns the validator's rejection.
    pub async fn authenticate(&self, authorization: &str) -> Result<Principal> {
        self.validator.authenticate_header(authorization).await
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService").field("issuer", &self.issuer).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use tessera_storage::{MemoryBackend, auth::KvTokenRecordStore};

    use super::*;
    use crate::{identity::MemoryIdentityVerifier, settings::TokenSettings};

    fn service() -> TokenService {
        let identity = Arc::new(MemoryIdentityVerifier::new());
        identity.add_user(7, "alice", "hunter2", ["admin"]).unwrap();
        let settings = TokenSettings::builder()
            .issuer("iss")
            .audience("aud")
            .secret("0123456789abcdef0123456789abcdef")
            .build()
            .unwrap();
        let issuer = TokenIssuer::builder()
            .settings(settings)
            .store(Arc::new(KvTokenRecordStore::new(MemoryBackend::new())))
            .identity(identity.clone())
            .build()
            .unwrap();
        TokenService::new(Arc::new(issuer), identity)
    }

    fn credentials(password: &str) -> GenerateRequest {
        GenerateRequest { username: "alice".into(), password: password.into() }
    }

    #[tokio::test]
    async fn test_generate_response_shape() {
        let service = service();
        let response = service.generate(&credentials("hunter2")).await.unwrap();

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["tokenType"], "Bearer");
        assert_eq!(json["accessTokenExpiresIn"], 30 * 60 * 1000);
        assert_eq!(json["refreshTokenExpiresIn"], 200_i64 * 24 * 60 * 60 * 1000);
        assert_eq!(json["user"]["username"], "alice");
        assert!(json["user"].get("securityStamp").is_none());
    }

    #[tokio::test]
    async fn test_generate_wrong_password() {
        let service = service();
        let result = service.generate(&credentials("nope")).await;

        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        assert_eq!(service.issuer().metrics().snapshot().rejected_credentials, 1);
    }

    #[tokio::test]
    async fn test_renew_rotates_and_rejects_replay() {
        let service = service();
        let first = service.generate(&credentials("hunter2")).await.unwrap();
        let request = RenewRequest { refresh_token: first.refresh_token.clone() };

        let second = service.renew(&request).await.unwrap();
        assert_ne!(second.access_token, first.access_token);

        let replay = service.renew(&request).await;
        assert!(matches!(replay, Err(AuthError::RefreshRejected(_))));
        assert!(service.authenticate(&format!("Bearer {}", first.access_token)).await.is_err());
        assert!(service.authenticate(&format!("Bearer {}", second.access_token)).await.is_ok());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent_and_ignores_garbage() {
        let service = service();
        let pair = service.generate(&credentials("hunter2")).await.unwrap();
        let request = RevokeRequest { refresh_token: pair.refresh_token.clone() };

        service.revoke(&request).await.unwrap();
        service.revoke(&request).await.unwrap();
        service.revoke(&RevokeRequest { refresh_token: "garbage".into() }).await.unwrap();

        let result = service.authenticate(&format!("Bearer {}", pair.access_token)).await;
        assert!(matches!(result, Err(AuthError::TokenRevoked)));
    }

    #[test]
    fn test_request_bodies_are_camel_case() {
        let body = serde_json::to_value(RenewRequest { refresh_token: "r".into() }).unwrap();
        assert_eq!(body, serde_json::json!({"refreshToken": "r"}));
    }

    #[test]
    fn test_error_body_uses_public_message() {
        let body = ErrorBody::from(&AuthError::SecurityStampMismatch);
        assert_eq!(body.status, 401);
        assert!(!body.title.to_lowercase().contains("stamp"));
    }
}
