//! The user directory the token services consult.
//!
//! Account storage and password policy live outside this crate; the issuer
//! and validator only need the three lookups of [`IdentityVerifier`].
//! [`MemoryIdentityVerifier`] is an in-process directory for tests and
//! single-node deployments.

use std::{collections::HashMap, fmt};

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use parking_lot::RwLock;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tessera_storage::UserId;

use crate::error::{AuthError, Result};

/// A user as seen by the token services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Account id.
    pub id: UserId,
    /// Login name.
    pub username: String,
    /// Role names.
    pub roles: Vec<String>,
    /// Opaque value that changes whenever credentials or roles change.
    pub security_stamp: String,
}

/// Lookups against the user directory.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Checks a username/password pair. Returns `None` when either is wrong.
    async fn verify(&self, username: &str, password: &str) -> Result<Option<User>>;

    /// Fetches a user by id.
    async fn find_user(&self, id: UserId) -> Result<Option<User>>;

    /// Current roles of `user`.
    async fn roles_of(&self, user: &User) -> Result<Vec<String>> {
        Ok(user.roles.clone())
    }
}

#[async_trait]
impl<V: IdentityVerifier + ?Sized> IdentityVerifier for std::sync::Arc<V> {
    async fn verify(&self, username: &str, password: &str) -> Result<Option<User>> {
        (**self).verify(username, password).await
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        (**self).find_user(id).await
    }

    async fn roles_of(&self, user: &User) -> Result<Vec<String>> {
        (**self).roles_of(user).await
    }
}

#[derive(Clone)]
struct Account {
    user: User,
    /// Argon2id PHC string.
    password_hash: String,
}

/// In-memory [`IdentityVerifier`].
///
/// Passwords are kept as Argon2id PHC strings. Usernames are unique without
/// regard to ASCII case, matching how [`verify`](IdentityVerifier::verify)
/// looks them up. Every credential or role change assigns a fresh security
/// stamp.
pub struct MemoryIdentityVerifier {
    accounts: RwLock<HashMap<UserId, Account>>,
    params: Params,
}

impl MemoryIdentityVerifier {
    /// Creates an empty directory hashing with the default Argon2id cost.
    #[must_use]
    pub fn new() -> Self {
        Self::with_params(Params::default())
    }

    /// Creates an empty directory hashing new passwords with `params`.
    /// Existing hashes verify with the parameters they were created with.
    #[must_use]
    pub fn with_params(params: Params) -> Self {
        Self { accounts: RwLock::new(HashMap::new()), params }
    }

    /// Adds an account, or replaces the account with the same id, and
    /// returns it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if another account already uses
    /// the username (ignoring ASCII case), or if hashing fails.
    pub fn add_user(
        &self,
        id: impl Into<UserId>,
        username: impl Into<String>,
        password: &str,
        roles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<User> {
        let user = User {
            id: id.into(),
            username: username.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            security_stamp: new_security_stamp(),
        };
        let password_hash = self.hash_password(password)?;

        let mut accounts = self.accounts.write();
        let taken = accounts
            .values()
            .any(|a| a.user.id != user.id && a.user.username.eq_ignore_ascii_case(&user.username));
        if taken {
            return Err(AuthError::configuration(format!(
                "username '{}' is already taken",
                user.username
            )));
        }
        accounts.insert(user.id, Account { user: user.clone(), password_hash });
        Ok(user)
    }

    /// Assigns a fresh security stamp, invalidating every access token issued
    /// before. Returns the new stamp, or `None` for an unknown user.
    pub fn rotate_security_stamp(&self, id: UserId) -> Option<String> {
        let mut accounts = self.accounts.write();
        let account = accounts.get_mut(&id)?;
        account.user.security_stamp = new_security_stamp();
        Some(account.user.security_stamp.clone())
    }

    /// Replaces a user's password. Returns `false` for an unknown user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if hashing fails.
    pub fn set_password(&self, id: UserId, password: &str) -> Result<bool> {
        let password_hash = self.hash_password(password)?;
        let mut accounts = self.accounts.write();
        let Some(account) = accounts.get_mut(&id) else {
            return Ok(false);
        };
        account.password_hash = password_hash;
        account.user.security_stamp = new_security_stamp();
        Ok(true)
    }

    /// Replaces a user's roles. Returns `false` for an unknown user.
    pub fn set_roles(&self, id: UserId, roles: impl IntoIterator<Item = impl Into<String>>) -> bool {
        let mut accounts = self.accounts.write();
        let Some(account) = accounts.get_mut(&id) else {
            return false;
        };
        account.user.roles = roles.into_iter().map(Into::into).collect();
        account.user.security_stamp = new_security_stamp();
        true
    }

    /// Removes an account. Returns `false` if it did not exist.
    pub fn remove_user(&self, id: UserId) -> bool {
        self.accounts.write().remove(&id).is_some()
    }

    fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::configuration(format!("password hashing failed: {e}")))
    }
}

impl Default for MemoryIdentityVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryIdentityVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryIdentityVerifier")
            .field("accounts", &self.accounts.read().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityVerifier for MemoryIdentityVerifier {
    async fn verify(&self, username: &str, password: &str) -> Result<Option<User>> {
        let account = self
            .accounts
            .read()
            .values()
            .find(|a| a.user.username.eq_ignore_ascii_case(username))
            .cloned();
        let Some(account) = account else {
            return Ok(None);
        };
        let Ok(parsed) = PasswordHash::new(&account.password_hash) else {
            tracing::warn!(user_id = %account.user.id, "stored password hash is unreadable");
            return Ok(None);
        };
        let matches = Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok();
        Ok(matches.then_some(account.user))
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.accounts.read().get(&id).map(|a| a.user.clone()))
    }
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn new_security_stamp() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes::<16>())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_verify_accepts_only_matching_password() {
        let directory = MemoryIdentityVerifier::new();
        let alice = directory.add_user(1, "alice", "correct horse", ["admin"]).unwrap();

        assert_eq!(directory.verify("alice", "correct horse").await.unwrap(), Some(alice.clone()));
        assert_eq!(directory.verify("ALICE", "correct horse").await.unwrap(), Some(alice));
        assert!(directory.verify("alice", "wrong").await.unwrap().is_none());
        assert!(directory.verify("bob", "correct horse").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_role_change_rotates_stamp() {
        let directory = MemoryIdentityVerifier::new();
        let before = directory.add_user(1, "alice", "pw", Vec::<String>::new()).unwrap();

        assert!(directory.set_roles(before.id, ["auditor"]));
        let after = directory.find_user(before.id).await.unwrap().unwrap();

        assert_eq!(after.roles, vec!["auditor".to_owned()]);
        assert_ne!(after.security_stamp, before.security_stamp);
        assert_eq!(directory.roles_of(&after).await.unwrap(), vec!["auditor".to_owned()]);
    }

    #[tokio::test]
    async fn test_password_change_rotates_stamp_and_credentials() {
        let directory = MemoryIdentityVerifier::new();
        let before = directory.add_user(1, "alice", "old", ["user"]).unwrap();

        assert!(directory.set_password(before.id, "new").unwrap());
        assert!(directory.verify("alice", "old").await.unwrap().is_none());
        let after = directory.verify("alice", "new").await.unwrap().unwrap();
        assert_ne!(after.security_stamp, before.security_stamp);
    }

    #[tokio::test]
    async fn test_unknown_user_mutations_report_false() {
        let directory = MemoryIdentityVerifier::new();
        let ghost = UserId::from(99);

        assert!(directory.rotate_security_stamp(ghost).is_none());
        assert!(!directory.set_password(ghost, "pw").unwrap());
        assert!(!directory.set_roles(ghost, ["x"]));
        assert!(!directory.remove_user(ghost));
    }

    #[tokio::test]
    async fn test_usernames_are_unique_ignoring_case() {
        let directory = MemoryIdentityVerifier::new();
        let alice = directory.add_user(1, "alice", "first", ["user"]).unwrap();

        let err = directory.add_user(2, "ALICE", "second", ["admin"]).unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)), "got {err:?}");
        assert!(directory.find_user(UserId::from(2)).await.unwrap().is_none());
        assert_eq!(directory.verify("Alice", "first").await.unwrap(), Some(alice));
        assert!(directory.verify("alice", "second").await.unwrap().is_none());

        // Re-adding under the same id replaces the account.
        let renamed = directory.add_user(1, "Alice", "third", ["user"]).unwrap();
        assert_eq!(directory.verify("alice", "third").await.unwrap(), Some(renamed));
    }

    #[test]
    fn test_passwords_are_stored_as_argon2id_phc() {
        let directory = MemoryIdentityVerifier::with_params(Params::new(1024, 1, 1, None).unwrap());
        let alice = directory.add_user(1, "alice", "correct horse", ["user"]).unwrap();

        let stored = directory.accounts.read().get(&alice.id).unwrap().password_hash.clone();
        assert!(stored.starts_with("$argon2id$"), "got {stored}");
        assert!(stored.contains("m=1024,t=1,p=1"), "got {stored}");
        assert!(!stored.contains("correct horse"));
        assert!(!format!("{directory:?}").contains("argon2"));
    }

    #[test]
    fn test_user_serializes_camel_case() {
        let user = User {
            id: UserId::from(3),
            username: "carol".into(),
            roles: vec![],
            security_stamp: "s".into(),
        };
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["securityStamp"], "s");
        assert_eq!(value["id"], 3);
    }
}
