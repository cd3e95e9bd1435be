//! # Tessera Client
//!
//! Client side of the Tessera bearer-token lifecycle.
//!
//! This crate provides:
//! - **Credentials**: [`CredentialStore`] persists the access token, refresh token and signed-in
//!   user in a pluggable [`CredentialStorage`], each slot with its own expiry
//! - **Refresh**: [`RefreshCoordinator`] recovers requests rejected for an expired access token,
//!   with at most one refresh call in flight however many requests failed
//! - **Facade**: [`AuthClient`] signs in, sends authenticated requests and signs out
//!
//! The network is behind the [`Transport`] trait; the crate ships no HTTP
//! stack of its own.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tessera_client::{ApiRequest, ApiResponse, AuthClient, ClientSettings, Result, Transport};
//!
//! struct Offline;
//!
//! #[async_trait]
//! impl Transport for Offline {
//!     async fn send(&self, _request: ApiRequest) -> Result<ApiResponse> {
//!         Ok(ApiResponse::with_status(401))
//!     }
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let settings = ClientSettings::builder().origin("https://app.example.com").build().unwrap();
//! let client = AuthClient::builder().settings(settings).transport(Arc::new(Offline)).build();
//!
//! let err = client.get("account/profile").await.unwrap_err();
//! assert_eq!(err.status(), Some(401));
//! assert!(client.user().is_none());
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Per-request retry bookkeeping.
pub mod attempt;
/// The client facade.
pub mod client;
/// Single-flight token refresh.
pub mod coordinator;
/// The credential triple.
pub mod credentials;
/// Client error types.
pub mod error;
/// Requests, responses and the transport seam.
pub mod http;
/// Refresh counters.
pub mod metrics;
/// Request and response stages.
pub mod pipeline;
/// Client settings.
pub mod settings;
/// Credential persistence backends.
pub mod storage;

pub use attempt::AttemptContext;
pub use client::AuthClient;
pub use coordinator::RefreshCoordinator;
pub use credentials::{CredentialStore, Credentials, StorageKeys};
pub use error::{ClientError, RefreshFailure, Result};
pub use http::{
    AUTHORIZATION, ApiRequest, ApiResponse, Method, SignedInUser, TokenResponse,
    Transport,
};
pub use metrics::{CoordinatorMetrics, CoordinatorMetricsSnapshot};
pub use pipeline::{
    BearerStage, Pipeline, RequestStage, ResponseStage, StatusStage, UnauthorizedPredicate,
    status_401,
};
pub use settings::ClientSettings;
pub use storage::{CookieOptions, CredentialStorage, MemoryCredentialStorage};
