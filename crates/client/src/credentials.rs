//! The client's credential triple.
//!
//! [`CredentialStore`] keeps the access token, refresh token, and signed-in
//! user in a [`CredentialStorage`] backend. Each slot expires on its own, and
//! the triple only counts as present while all three are readable. Values
//! are wrapped as `{"value": ...}` JSON before they reach the backend and are
//! stored under environment-scoped keys:
//!
//! | Slot | Key |
//! |------|-----|
//! | access token | `_jwt_access_token_storage_{environment}` |
//! | refresh token | `_jwt_refresh_token_storage_{environment}` |
//! | user | `_jwt_user_storage_{environment}` |
//!
//! Changes to the user slot are published on a [`watch`] channel so that
//! presentation code can react to sign-in and sign-out without polling.

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tessera_storage::Clock;
use tokio::sync::watch;

use crate::{
    http::{SignedInUser, TokenResponse},
    settings::ClientSettings,
    storage::{CookieOptions, CredentialStorage},
};

/// Storage keys of the three slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    /// Access token key.
    pub access_token: String,
    /// Refresh token key.
    pub refresh_token: String,
    /// User key.
    pub user: String,
}

impl StorageKeys {
    /// Returns the keys for `environment`.
    #[must_use]
    pub fn for_environment(environment: &str) -> Self {
        Self {
            access_token: format!("_jwt_access_token_storage_{environment}"),
            refresh_token: format!("_jwt_refresh_token_storage_{environment}"),
            user: format!("_jwt_user_storage_{environment}"),
        }
    }
}

/// A complete credential triple.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Access token.
    pub access_token: String,
    /// Refresh token.
    pub refresh_token: String,
    /// Signed-in user.
    pub user: SignedInUser,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("user", &self.user).finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize)]
struct Wrapped<T> {
    value: T,
}

/// Access token, refresh token and user, persisted together.
pub struct CredentialStore {
    storage: Arc<dyn CredentialStorage>,
    keys: StorageKeys,
    domain: String,
    secure: bool,
    clock: Arc<dyn Clock>,
    // Serializes multi-slot reads and writes so no caller observes half a
    // triple while another writes or clears it.
    lock: Mutex<()>,
    user_tx: watch::Sender<Option<SignedInUser>>,
}

impl CredentialStore {
    /// Creates a store over `storage`, scoped by `settings`.
    ///
    /// The user channel starts with whatever user `storage` already holds.
    #[must_use]
    pub fn new(
        settings: &ClientSettings,
        storage: Arc<dyn CredentialStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let keys = StorageKeys::for_environment(settings.environment());
        let initial = read_slot::<SignedInUser>(storage.as_ref(), &keys.user);
        let (user_tx, _) = watch::channel(initial);
        Self {
            storage,
            keys,
            domain: settings.domain().to_owned(),
            secure: settings.secure(),
            clock,
            lock: Mutex::new(()),
            user_tx,
        }
    }

    /// Returns the storage keys.
    #[must_use]
    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Returns the access token.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        let _guard = self.lock.lock();
        read_slot(self.storage.as_ref(), &self.keys.access_token)
    }

    /// Stores the access token for `ttl`.
    pub fn set_access_token(&self, token: &str, ttl: Duration) {
        let _guard = self.lock.lock();
        self.write_slot(&self.keys.access_token, &token, ttl);
    }

    /// Removes the access token.
    pub fn remove_access_token(&self) {
        let _guard = self.lock.lock();
        self.storage.remove(&self.keys.access_token);
    }

    /// Returns the refresh token.
    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        let _guard = self.lock.lock();
        read_slot(self.storage.as_ref(), &self.keys.refresh_token)
    }

    /// Stores the refresh token for `ttl`.
    pub fn set_refresh_token(&self, token: &str, ttl: Duration) {
        let _guard = self.lock.lock();
        self.write_slot(&self.keys.refresh_token, &token, ttl);
    }

    /// Removes the refresh token.
    pub fn remove_refresh_token(&self) {
        let _guard = self.lock.lock();
        self.storage.remove(&self.keys.refresh_token);
    }

    /// Returns the signed-in user.
    #[must_use]
    pub fn user(&self) -> Option<SignedInUser> {
        let _guard = self.lock.lock();
        read_slot(self.storage.as_ref(), &self.keys.user)
    }

    /// Stores the user for `ttl` and publishes it.
    pub fn set_user(&self, user: &SignedInUser, ttl: Duration) {
        let _guard = self.lock.lock();
        self.write_slot(&self.keys.user, user, ttl);
        self.user_tx.send_replace(Some(user.clone()));
    }

    /// Removes the user and publishes its absence.
    pub fn remove_user(&self) {
        let _guard = self.lock.lock();
        self.storage.remove(&self.keys.user);
        self.user_tx.send_replace(None);
    }

    /// Returns the triple, or `None` if any slot is absent or expired.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        let _guard = self.lock.lock();
        let storage = self.storage.as_ref();
        Some(Credentials {
            access_token: read_slot(storage, &self.keys.access_token)?,
            refresh_token: read_slot(storage, &self.keys.refresh_token)?,
            user: read_slot(storage, &self.keys.user)?,
        })
    }

    /// Writes the triple from a token endpoint response. The user slot lives
    /// as long as the refresh token.
    pub fn store_tokens(&self, tokens: &TokenResponse) {
        let access_ttl = millis(tokens.access_token_expires_in);
        let refresh_ttl = millis(tokens.refresh_token_expires_in);

        let _guard = self.lock.lock();
        self.write_slot(&self.keys.access_token, &tokens.access_token, access_ttl);
        self.write_slot(&self.keys.refresh_token, &tokens.refresh_token, refresh_ttl);
        self.write_slot(&self.keys.user, &tokens.user, refresh_ttl);
        self.user_tx.send_replace(Some(tokens.user.clone()));
    }

    /// Removes all three slots as one step and publishes the user's
    /// absence.
    pub fn clear(&self) {
        let _guard = self.lock.lock();
        self.storage.remove(&self.keys.access_token);
        self.storage.remove(&self.keys.refresh_token);
        self.storage.remove(&self.keys.user);
        self.user_tx.send_replace(None);
    }

    /// Subscribes to changes of the user slot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<SignedInUser>> {
        self.user_tx.subscribe()
    }

    fn write_slot<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let encoded = match serde_json::to_string(&Wrapped { value }) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to encode credential, slot cleared");
                self.storage.remove(key);
                return;
            },
        };
        let options = CookieOptions {
            domain: self.domain.clone(),
            secure: self.secure,
            http_only: true,
            expires_at: expiry(self.clock.now(), ttl),
        };
        self.storage.set(key, encoded, options);
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("keys", &self.keys)
            .field("domain", &self.domain)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

fn read_slot<T: DeserializeOwned>(storage: &dyn CredentialStorage, key: &str) -> Option<T> {
    let raw = storage.get(key)?;
    match serde_json::from_str::<Wrapped<T>>(&raw) {
        Ok(wrapped) => Some(wrapped.value),
        Err(e) => {
            tracing::warn!(key, error = %e, "discarding undecodable credential");
            None
        },
    }
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use tessera_storage::ManualClock;

    use super::*;
    use crate::storage::MemoryCredentialStorage;

    fn fixture(origin: &str) -> (CredentialStore, Arc<MemoryCredentialStorage>, Arc<ManualClock>) {
        let settings =
            ClientSettings::builder().origin(origin).environment("test").build().unwrap();
        let clock = Arc::new(ManualClock::default());
        let storage = Arc::new(MemoryCredentialStorage::with_clock(clock.clone()));
        let store = CredentialStore::new(&settings, storage.clone(), clock.clone());
        (store, storage, clock)
    }

    fn alice() -> SignedInUser {
        SignedInUser { id: 1, username: "alice".into(), roles: vec!["admin".into()] }
    }

    fn tokens() -> TokenResponse {
        TokenResponse {
            token_type: "Bearer".into(),
            access_token: "access-1".into(),
            access_token_expires_in: 60_000,
            refresh_token: "refresh-1".into(),
            refresh_token_expires_in: 3_600_000,
            user: alice(),
        }
    }

    #[test]
    fn test_values_are_wrapped_under_environment_keys() {
        let (store, storage, _) = fixture("https://app.example.com");
        store.set_access_token("abc", Duration::from_secs(60));

        let raw = storage.get("_jwt_access_token_storage_test").unwrap();
        assert_eq!(raw, r#"{"value":"abc"}"#);
        assert_eq!(store.access_token().as_deref(), Some("abc"));
    }

    #[test]
    fn test_cookie_options_follow_origin() {
        let (store, storage, clock) = fixture("https://app.example.com");
        store.set_refresh_token("r", Duration::from_secs(90));
        let options = storage.options(&store.keys().refresh_token).unwrap();
        assert_eq!(options.domain, "app.example.com");
        assert!(options.secure);
        assert!(options.http_only);
        assert_eq!(options.expires_at, clock.now() + chrono::Duration::seconds(90));

        let (store, storage, _) = fixture("http://localhost:5000");
        store.set_refresh_token("r", Duration::from_secs(90));
        let options = storage.options(&store.keys().refresh_token).unwrap();
        assert_eq!(options.domain, "localhost");
        assert!(!options.secure);
    }

    #[test]
    fn test_triple_requires_every_slot() {
        let (store, _, clock) = fixture("https://app.example.com");
        store.store_tokens(&tokens());
        let credentials = store.credentials().unwrap();
        assert_eq!(credentials.access_token, "access-1");
        assert_eq!(credentials.user, alice());

        clock.advance(Duration::from_secs(60));
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_some());
        assert!(store.credentials().is_none());
    }

    #[test]
    fn test_clear_removes_every_slot() {
        let (store, storage, _) = fixture("https://app.example.com");
        store.store_tokens(&tokens());
        store.clear();

        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
        assert!(store.user().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_user_changes_are_published() {
        let (store, _, _) = fixture("https://app.example.com");
        let rx = store.subscribe();
        assert_eq!(*rx.borrow(), None);

        store.store_tokens(&tokens());
        assert_eq!(*rx.borrow(), Some(alice()));

        store.remove_user();
        assert_eq!(*rx.borrow(), None);

        store.set_user(&alice(), Duration::from_secs(10));
        assert_eq!(*rx.borrow(), Some(alice()));
        store.clear();
        assert_eq!(*rx.borrow(), None);
    }

    #[test]
    fn test_channel_starts_with_persisted_user() {
        let settings = ClientSettings::builder()
            .origin("https://app.example.com")
            .environment("test")
            .build()
            .unwrap();
        let clock = Arc::new(ManualClock::default());
        let storage = Arc::new(MemoryCredentialStorage::with_clock(clock.clone()));
        CredentialStore::new(&settings, storage.clone(), clock.clone()).store_tokens(&tokens());

        let reopened = CredentialStore::new(&settings, storage, clock);
        assert_eq!(*reopened.subscribe().borrow(), Some(alice()));
    }

    #[test]
    fn test_undecodable_slot_reads_as_absent() {
        let (store, storage, clock) = fixture("https://app.example.com");
        let options = CookieOptions {
            domain: "app.example.com".into(),
            secure: true,
            http_only: true,
            expires_at: clock.now() + chrono::Duration::seconds(60),
        };
        storage.set(&store.keys().access_token, "not json".into(), options);
        assert!(store.access_token().is_none());
    }

    #[test]
    fn test_negative_lifetime_expires_immediately() {
        let (store, _, _) = fixture("https://app.example.com");
        let mut expired = tokens();
        expired.access_token_expires_in = -5;
        store.store_tokens(&expired);
        assert!(store.access_token().is_none());
    }
}
