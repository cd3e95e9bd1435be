//! Persisted token-pair record.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{RecordId, UserId};

/// SHA-256 digest of a raw bearer token, base64url-encoded without padding.
///
/// Raw tokens never reach storage; records and indexes are keyed by this
/// digest instead.
///
/// # Examples
///
/// ```
/// use tessera_storage::auth::TokenHash;
///
/// let a = TokenHash::of("eyJhbGciOiJIUzI1NiJ9.e30.sig");
/// let b = TokenHash::of("eyJhbGciOiJIUzI1NiJ9.e30.sig");
/// assert_eq!(a, b);
/// assert_eq!(a.as_str().len(), 43);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenHash(String);

impl TokenHash {
    /// Hashes a raw token.
    #[must_use]
    pub fn of(token: &str) -> Self {
        let digest = Sha256::digest(token.as_bytes());
        Self(URL_SAFE_NO_PAD.encode(digest))
    }

    /// Returns the encoded digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Only a short prefix is printed so full digests stay out of debug logs.
impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "TokenHash({prefix}…)")
    }
}

/// One issued access/refresh token pair, as persisted by the record store.
///
/// Records are immutable: rotation deletes the old record and inserts a new
/// one. A refresh-token hash identifies at most one live record.
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use tessera_storage::auth::{TokenHash, TokenRecord};
///
/// let now = Utc::now();
/// let record = TokenRecord::builder()
///     .user_id(7)
///     .access_token_hash(TokenHash::of("access"))
///     .refresh_token_hash(TokenHash::of("refresh"))
///     .access_token_expires_at(now + Duration::minutes(30))
///     .refresh_token_expires_at(now + Duration::days(200))
///     .build();
///
/// assert!(!record.is_expired(now));
/// assert!(record.is_access_valid(now));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct TokenRecord {
    /// Unique record identifier.
    #[builder(default)]
    pub id: RecordId,

    /// Owner of the token pair.
    #[builder(into)]
    pub user_id: UserId,

    /// Hash of the access token.
    pub access_token_hash: TokenHash,

    /// Hash of the refresh token.
    pub refresh_token_hash: TokenHash,

    /// When the access token stops being accepted.
    pub access_token_expires_at: DateTime<Utc>,

    /// When the refresh token stops being redeemable. The record is garbage
    /// once this has passed.
    pub refresh_token_expires_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Returns `true` once the refresh token has expired.
    ///
    /// Expired records are removed by the next lifecycle operation on the
    /// same user, or by the background sweeper.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token_expires_at < now
    }

    /// Returns `true` while the access token may still authorize requests.
    #[must_use]
    pub fn is_access_valid(&self, now: DateTime<Utc>) -> bool {
        self.access_token_expires_at >= now
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn record(now: DateTime<Utc>) -> TokenRecord {
        TokenRecord::builder()
            .user_id(1)
            .access_token_hash(TokenHash::of("a"))
            .refresh_token_hash(TokenHash::of("r"))
            .access_token_expires_at(now + Duration::minutes(30))
            .refresh_token_expires_at(now + Duration::days(1))
            .build()
    }

    #[test]
    fn test_hash_is_sha256_base64url() {
        // SHA-256("abc"), base64url without padding.
        assert_eq!(TokenHash::of("abc").as_str(), "ungWv48Bz-pBQUDeXa4iI7ADYaOWF3qctBD_YfIAFa0");
    }

    #[test]
    fn test_debug_does_not_print_full_hash() {
        let hash = TokenHash::of("secret-token");
        let shown = format!("{hash:?}");
        assert!(!shown.contains(hash.as_str()));
    }

    #[test]
    fn test_expiry_boundaries() {
        let now = Utc::now();
        let rec = record(now);

        assert!(rec.is_access_valid(rec.access_token_expires_at));
        assert!(!rec.is_access_valid(rec.access_token_expires_at + Duration::seconds(1)));
        assert!(!rec.is_expired(rec.refresh_token_expires_at));
        assert!(rec.is_expired(rec.refresh_token_expires_at + Duration::seconds(1)));
    }

    #[test]
    fn test_serde_rejects_unknown_fields() {
        let rec = record(Utc::now());
        let mut value = serde_json::to_value(&rec).unwrap();
        value["extra"] = serde_json::json!(true);

        assert!(serde_json::from_value::<TokenRecord>(value).is_err());
    }

    #[test]
    fn test_serde_round_trip_keeps_hashes() {
        let rec = record(Utc::now());
        let back: TokenRecord = serde_json::from_slice(&serde_json::to_vec(&rec).unwrap()).unwrap();
        assert_eq!(back, rec);
    }
}
