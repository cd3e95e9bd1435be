//! Anti-forgery token hook.
//!
//! Browser deployments pair every bearer token with an anti-forgery token
//! tied to the same identity. The issuer regenerates it whenever a pair is
//! issued or renewed and clears it on revoke.

use std::sync::Arc;

use crate::jwt::AccessClaims;

/// Called by [`TokenIssuer`](crate::TokenIssuer) after successful lifecycle
/// operations.
pub trait AntiForgeryHook: Send + Sync {
    /// A pair was issued or renewed for the identity in `claims`.
    fn regenerate(&self, claims: &AccessClaims);

    /// A pair was revoked.
    fn clear(&self);
}

impl<H: AntiForgeryHook + ?Sized> AntiForgeryHook for Arc<H> {
    fn regenerate(&self, claims: &AccessClaims) {
        (**self).regenerate(claims);
    }

    fn clear(&self) {
        (**self).clear();
    }
}

/// Hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAntiForgery;

impl AntiForgeryHook for NoopAntiForgery {
    fn regenerate(&self, _claims: &AccessClaims) {}

    fn clear(&self) {}
}
