//! Token-pair records and their persistence.
//!
//! The issuer writes one [`TokenRecord`] per issued access/refresh pair; the
//! validator reads them back by access-token hash. A record that is gone
//! (revoked, rotated, or purged) revokes its tokens even if their signature
//! and lifetime are still valid.
//!
//! ```text
//! ┌─────────────┐  snapshot / commit  ┌──────────────────┐  get / set / CAS  ┌──────────────┐
//! │ TokenIssuer │────────────────────►│ TokenRecordStore │──────────────────►│ StorageBackend│
//! └─────────────┘                     └──────────────────┘                   └──────────────┘
//!                                              ▲
//! ┌───────────────┐  find_by_access_hash       │
//! │ TokenValidator│────────────────────────────┘
//! └───────────────┘
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use tessera_storage::{
//!     MemoryBackend,
//!     auth::{KvTokenRecordStore, TokenHash, TokenRecordStore},
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = KvTokenRecordStore::new(MemoryBackend::new());
//! let record = store.find_by_refresh_hash(&TokenHash::of("presented-refresh-token")).await.unwrap();
//! assert!(record.is_none());
//! # });
//! ```

pub mod audit;
mod store;
mod token_record;

pub use store::{
    ACCESS_INDEX_PREFIX, DEFAULT_MAX_ATTEMPTS, KvTokenRecordStore, REFRESH_INDEX_PREFIX,
    SessionChange, TOKEN_RECORD_PREFIX, TokenRecordStore, UserSessions, VERSION_PREFIX,
};
pub use token_record::{TokenHash, TokenRecord};
