//! JWT algorithm validation.
//!
//! Tokens are signed with a shared HMAC secret that never leaves the issuing
//! service, so the only algorithm the validator accepts is `HS256`.
//!
//! # Security
//!
//! - The algorithm is checked before the signature so a token cannot pick its own verification
//!   scheme.
//! - `none` and the asymmetric families are always rejected. Accepting `RS256` with an HMAC
//!   secret as the "public key" is the classic algorithm-confusion attack.

use jsonwebtoken::Algorithm;

use crate::error::AuthError;

/// Forbidden JWT algorithms that are never accepted.
///
/// - `none`: No signature verification (trivially bypassable)
/// - RSA, ECDSA and EdDSA families: this service holds no public keys, and
///   verifying them against the HMAC secret enables algorithm confusion
pub const FORBIDDEN_ALGORITHMS: &[&str] = &[
    "none", "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384", "EdDSA",
];

/// Accepted JWT algorithms.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["HS256"];

/// The algorithm used to sign every issued token.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Validate JWT algorithm against security policies.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if the algorithm is forbidden
/// or not in [`ACCEPTED_ALGORITHMS`].
///
/// # Examples
///
/// ```
/// use tessera_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("HS256").is_ok());
/// assert!(validate_algorithm("none").is_err());
/// assert!(validate_algorithm("HS512").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.iter().any(|f| f.eq_ignore_ascii_case(alg)) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not in accepted list (only HS256 is supported)"
        )));
    }

    Ok(())
}
