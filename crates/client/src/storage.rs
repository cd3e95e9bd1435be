//! Pluggable persistence for client credentials.
//!
//! [`CredentialStorage`] is a cookie-jar shaped key/value interface: every
//! value is stored with [`CookieOptions`] naming its domain, flags, and
//! expiry, and an expired value reads as absent. [`MemoryCredentialStorage`]
//! keeps values in process; embedders backed by a browser cookie jar or a
//! keychain implement the trait themselves.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tessera_storage::{Clock, SystemClock};

/// Scope, flags and expiry of a stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    /// Domain the value is scoped to.
    pub domain: String,
    /// Only send over `https`.
    pub secure: bool,
    /// Hide from scripts.
    pub http_only: bool,
    /// When the value stops being readable.
    pub expires_at: DateTime<Utc>,
}

/// Key/value persistence for credentials.
pub trait CredentialStorage: Send + Sync + fmt::Debug {
    /// Returns the value stored under `key`, or `None` if it is absent or
    /// expired.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: String, options: CookieOptions);

    /// Removes `key`.
    fn remove(&self, key: &str);
}

impl<S: CredentialStorage + ?Sized> CredentialStorage for Arc<S> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: String, options: CookieOptions) {
        (**self).set(key, value, options);
    }

    fn remove(&self, key: &str) {
        (**self).remove(key);
    }
}

/// In-process [`CredentialStorage`] with expiry against a [`Clock`].
pub struct MemoryCredentialStorage {
    entries: RwLock<HashMap<String, (String, CookieOptions)>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCredentialStorage {
    /// Creates an empty storage using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty storage using `clock` for expiry.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { entries: RwLock::new(HashMap::new()), clock }
    }

    /// Returns the options `key` was stored with, if it is still live.
    #[must_use]
    pub fn options(&self, key: &str) -> Option<CookieOptions> {
        let now = self.clock.now();
        self.entries
            .read()
            .get(key)
            .filter(|(_, options)| options.expires_at > now)
            .map(|(_, options)| options.clone())
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.read().values().filter(|(_, options)| options.expires_at > now).count()
    }

    /// Returns `true` if no entry is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCredentialStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStorage for MemoryCredentialStorage {
    fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some((value, options)) if options.expires_at > now => return Some(value.clone()),
                Some(_) => {},
            }
        }
        // Expired: drop it so the map does not grow with dead entries.
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|(_, options)| options.expires_at <= now) {
            entries.remove(key);
        }
        None
    }

    fn set(&self, key: &str, value: String, options: CookieOptions) {
        self.entries.write().insert(key.to_owned(), (value, options));
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }
}

impl fmt::Debug for MemoryCredentialStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.entries.read().keys().cloned().collect();
        f.debug_struct("MemoryCredentialStorage")
            .field("keys", &keys)
            .field("clock", &self.clock)
            .finish()
    }
}
