//! # Tessera Authentication
//!
//! Server side of the Tessera bearer-token lifecycle.
//!
//! This crate provides:
//! - **Issuance**: [`TokenIssuer`] signs access/refresh pairs, rotates them on renewal, and revokes
//!   them, persisting one [`TokenRecord`](tessera_storage::auth::TokenRecord) per pair
//! - **Validation**: [`TokenValidator`] authenticates bearer tokens against their signature,
//!   lifetime, the user's security stamp, and the live record set
//! - **Endpoints**: [`TokenService`] answers the generate, refresh and revoke requests
//! - **Housekeeping**: [`spawn_expired_record_sweeper`] purges expired records in the background
//!
//! ## Tokens
//!
//! Both tokens are HS256 JWTs signed with one shared secret. Every other
//! algorithm is rejected before signature verification, see
//! [`validation`]. A refresh token can be redeemed exactly once: renewal
//! consumes its record in the same transaction that stores the new one.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tessera_authn::{MemoryIdentityVerifier, TokenIssuer, TokenService, TokenSettings};
//! use tessera_authn::service::{GenerateRequest, RenewRequest};
//! use tessera_storage::{MemoryBackend, auth::KvTokenRecordStore};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let settings = TokenSettings::builder()
//!     .issuer("https://auth.example.com")
//!     .audience("https://api.example.com")
//!     .secret("0123456789abcdef0123456789abcdef")
//!     .build()
//!     .unwrap();
//! let identity = Arc::new(MemoryIdentityVerifier::new());
//! identity.add_user(1, "alice", "pw", ["admin"]).unwrap();
//!
//! let issuer = TokenIssuer::builder()
//!     .settings(settings)
//!     .store(Arc::new(KvTokenRecordStore::new(MemoryBackend::new())))
//!     .identity(identity.clone())
//!     .build()
//!     .unwrap();
//! let service = TokenService::new(Arc::new(issuer), identity);
//!
//! let signin = GenerateRequest { username: "alice".into(), password: "pw".into() };
//! let tokens = service.generate(&signin).await.unwrap();
//! let principal = service.authenticate(&format!("Bearer {}", tokens.access_token)).await.unwrap();
//! assert!(principal.has_role("admin"));
//!
//! let renewed = service.renew(&RenewRequest { refresh_token: tokens.refresh_token }).await.unwrap();
//! assert_ne!(renewed.access_token, tokens.access_token);
//! # });
//! ```
//!
//! ## Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with a wired-up issuer harness and hostile-token
//!   helpers.
//! - **`failpoints`**: Activates `fail` injection points (`issuer-before-commit`).

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Anti-forgery token hooks.
pub mod antiforgery;
/// Authentication error types.
pub mod error;
/// User lookup and password verification.
pub mod identity;
/// Token pair issuance, rotation and revocation.
pub mod issuer;
/// JWT claims and codec.
pub mod jwt;
/// Lifecycle counters.
pub mod metrics;
/// Token endpoint bodies and service.
pub mod service;
/// Token settings.
pub mod settings;
/// Background purge of expired records.
pub mod sweeper;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
/// Algorithm validation.
pub mod validation;
/// Bearer token validation.
pub mod validator;

// Re-export key types for convenience
pub use antiforgery::{AntiForgeryHook, NoopAntiForgery};
pub use error::{AuthError, Result};
pub use identity::{IdentityVerifier, MemoryIdentityVerifier, User};
pub use issuer::{TokenIssuer, TokenPair};
pub use metrics::{TokenMetrics, TokenMetricsSnapshot};
pub use service::{TokenResponse, TokenService};
pub use settings::TokenSettings;
pub use sweeper::spawn_expired_record_sweeper;
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
pub use validator::{BEARER_SCHEME, Principal, TokenValidator};
