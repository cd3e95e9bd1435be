//! Per-request retry bookkeeping.

/// How a logical request got to its current attempt.
///
/// A fresh context is created once per call to
/// [`AuthClient::send`](crate::AuthClient::send); every retry derives a new
/// value instead of mutating the old one. A context that is no longer
/// [fresh](Self::is_fresh) is never retried again, which bounds every
/// request to at most two attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptContext {
    /// This attempt follows a refresh the request itself triggered.
    pub retried: bool,
    /// This attempt follows a refresh the request waited on.
    pub queued: bool,
}

impl AttemptContext {
    /// The first attempt.
    #[must_use]
    pub const fn fresh() -> Self {
        Self { retried: false, queued: false }
    }

    /// Returns `true` until the request has been retried or queued.
    #[must_use]
    pub const fn is_fresh(self) -> bool {
        !self.retried && !self.queued
    }

    /// The attempt after a refresh this request triggered.
    #[must_use]
    pub const fn into_retried(self) -> Self {
        Self { retried: true, ..self }
    }

    /// The attempt after a refresh this request waited on.
    #[must_use]
    pub const fn into_queued(self) -> Self {
        Self { queued: true, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_contexts_are_not_fresh() {
        let first = AttemptContext::fresh();
        assert!(first.is_fresh());
        assert!(!first.into_retried().is_fresh());
        assert!(!first.into_queued().is_fresh());
        assert_eq!(first, AttemptContext::default());
    }
}
