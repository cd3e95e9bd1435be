//! Storage layer for the Tessera token services.
//!
//! This crate provides the [`StorageBackend`] key/value abstraction, an
//! in-memory implementation, and the token-pair record store built on it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 tessera-authn (issuer, validator)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │               auth::TokenRecordStore                        │
//! │     (records, hash indexes, per-user version counters)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  StorageBackend trait                       │
//! │      (get, set, compare_and_set, delete, get_range,         │
//! │                       transaction)                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     MemoryBackend                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use tessera_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"user:123".to_vec(), b"Alice".to_vec()).await?;
//!     let value = backend.get(b"user:123").await?;
//!     assert_eq!(value.map(|b| b.to_vec()), Some(b"Alice".to_vec()));
//!
//!     let mut txn = backend.transaction().await?;
//!     txn.compare_and_set(b"counter".to_vec(), None, b"1".to_vec())?;
//!     txn.set(b"updated".to_vec(), b"true".to_vec());
//!     txn.commit().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Time
//!
//! Expiry decisions take the current time from a [`Clock`]. Production code
//! uses [`SystemClock`]; tests drive a [`ManualClock`].
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with record builders and store factories for
//!   integration tests.
//! - **`failpoints`**: Activates `fail` injection points (`token-store-before-commit`).

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod backend;
pub mod clock;
pub mod error;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod transaction;
pub mod types;

pub use backend::StorageBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use transaction::Transaction;
pub use types::{KeyValue, RecordId, UserId};
