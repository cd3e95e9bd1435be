//! Audit logging for token lifecycle operations.
//!
//! Every issue, rotation, and revocation of a token pair, and every rejected
//! refresh attempt, produces an [`AuditEvent`]: who acted, on which record,
//! when, and with what outcome.
//!
//! # Architecture
//!
//! The [`AuditLogger`] trait enables different audit backends:
//!
//! - [`TracingAuditLogger`]: Emits structured `tracing` events at INFO, suitable for log
//!   aggregation.
//! - [`NoopAuditLogger`]: Discards events.
//!
//! # Usage
//!
//! ```no_run
//! use tessera_storage::auth::audit::{
//!     AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger, record_resource,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let logger = TracingAuditLogger;
//! let event = AuditEvent::builder()
//!     .actor("user:42")
//!     .action(AuditAction::GenerateToken)
//!     .resource(record_resource(42, "9f3c..."))
//!     .result(AuditResult::Success)
//!     .build();
//! logger.log(&event).await;
//! # });
//! ```

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Action performed on a token-pair record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// A new token pair was issued at sign-in.
    GenerateToken,
    /// A token pair was rotated through its refresh token.
    RenewToken,
    /// A token pair was revoked.
    RevokeToken,
    /// Every token pair of a user was revoked.
    RevokeAllTokens,
    /// A refresh token was presented but could not be redeemed.
    RejectRefresh,
    /// Expired records were purged by the background sweeper.
    PurgeExpired,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenerateToken => write!(f, "generate_token"),
            Self::RenewToken => write!(f, "renew_token"),
            Self::RevokeToken => write!(f, "revoke_token"),
            Self::RevokeAllTokens => write!(f, "revoke_all_tokens"),
            Self::RejectRefresh => write!(f, "reject_refresh"),
            Self::PurgeExpired => write!(f, "purge_expired"),
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// Operation completed successfully.
    Success,
    /// Operation failed with the given reason.
    Failure(String),
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// Structured audit event for token lifecycle operations.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Identity of the actor performing the operation.
    #[builder(into)]
    pub actor: String,
    /// The action that was performed.
    pub action: AuditAction,
    /// Resource identifier (e.g., "user:42/record:9f3c...").
    #[builder(into)]
    pub resource: String,
    /// Outcome of the operation.
    pub result: AuditResult,
    /// Additional context (e.g., how many sibling records were removed).
    #[builder(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Trait for audit log backends.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an audit event.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger + ?Sized> AuditLogger for std::sync::Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Audit logger that emits structured `tracing` events.
///
/// Field mapping:
/// - `audit.timestamp`: RFC 3339 timestamp
/// - `audit.actor`: who performed the action
/// - `audit.action`: the operation (e.g., "renew_token")
/// - `audit.resource`: what was affected
/// - `audit.result`: "success" or "failure: ..."
/// - `audit.metadata`: additional `key=value` context
#[derive(Debug, Clone, Copy)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let metadata_str =
            event.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(", ");

        tracing::info!(
            audit.timestamp = %event.timestamp.to_rfc3339(),
            audit.actor = %event.actor,
            audit.action = %event.action,
            audit.resource = %event.resource,
            audit.result = %event.result,
            audit.metadata = %metadata_str,
            "audit_event"
        );
    }
}

/// No-op audit logger for tests and environments where audit is not needed.
#[derive(Debug, Clone, Copy)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}

/// Constructs a resource identifier string from a user and record id.
pub fn record_resource(user_id: impl fmt::Display, record_id: impl fmt::Display) -> String {
    format!("user:{user_id}/record:{record_id}")
}

/// Constructs a resource identifier string covering all of a user's records.
pub fn user_resource(user_id: impl fmt::Display) -> String {
    format!("user:{user_id}")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    #[test]
    fn test_audit_action_display() {
        assert_eq!(AuditAction::GenerateToken.to_string(), "generate_token");
        assert_eq!(AuditAction::RenewToken.to_string(), "renew_token");
        assert_eq!(AuditAction::RevokeToken.to_string(), "revoke_token");
        assert_eq!(AuditAction::RevokeAllTokens.to_string(), "revoke_all_tokens");
        assert_eq!(AuditAction::RejectRefresh.to_string(), "reject_refresh");
        assert_eq!(AuditAction::PurgeExpired.to_string(), "purge_expired");
    }

    #[test]
    fn test_audit_result_display() {
        assert_eq!(AuditResult::Success.to_string(), "success");
        assert_eq!(
            AuditResult::Failure("refresh token already rotated".to_owned()).to_string(),
            "failure: refresh token already rotated"
        );
    }

    #[test]
    fn test_audit_event_builder_defaults() {
        let event = AuditEvent::builder()
            .actor("user:1")
            .action(AuditAction::RenewToken)
            .resource(record_resource(1, "abc"))
            .result(AuditResult::Success)
            .build();

        assert_eq!(event.resource, "user:1/record:abc");
        assert!(event.metadata.is_empty());
        let diff = Utc::now() - event.timestamp;
        assert!(diff.num_seconds() < 2);
    }

    #[test]
    fn test_resource_helpers() {
        assert_eq!(record_resource(42, "r1"), "user:42/record:r1");
        assert_eq!(user_resource(42), "user:42");
    }

    #[derive(Default)]
    struct RecordingLogger {
        events: Mutex<Vec<AuditAction>>,
    }

    #[async_trait]
    impl AuditLogger for RecordingLogger {
        async fn log(&self, event: &AuditEvent) {
            self.events.lock().push(event.action);
        }
    }

    #[tokio::test]
    async fn test_arc_logger_delegates() {
        let inner = Arc::new(RecordingLogger::default());
        let logger: Arc<dyn AuditLogger> = inner.clone();

        let event = AuditEvent::builder()
            .actor("system")
            .action(AuditAction::PurgeExpired)
            .resource("token-records")
            .result(AuditResult::Success)
            .build();
        logger.log(&event).await;

        assert_eq!(*inner.events.lock(), vec![AuditAction::PurgeExpired]);
    }

    #[tokio::test]
    async fn test_tracing_audit_logger_emits_event() {
        let subscriber = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_test_writer());
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut metadata = BTreeMap::new();
        metadata.insert("siblings_removed".to_owned(), "1".to_owned());
        let event = AuditEvent::builder()
            .actor("user:3")
            .action(AuditAction::RevokeToken)
            .resource(record_resource(3, "r"))
            .result(AuditResult::Success)
            .metadata(metadata)
            .build();

        TracingAuditLogger.log(&event).await;
        NoopAuditLogger.log(&event).await;
    }
}
