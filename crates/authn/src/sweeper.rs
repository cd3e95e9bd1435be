//! Background purge of expired token records.
//!
//! Expired records are also removed whenever their user signs in, renews or
//! revokes, but users who never come back would otherwise leave records
//! behind until the store is compacted by hand.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{AuthError, Result},
    issuer::TokenIssuer,
};

/// Spawns a task that calls [`TokenIssuer::purge_expired`] every `interval`
/// until `cancel` fires.
///
/// Failures are logged and the task keeps running.
///
/// # Errors
///
/// Returns [`AuthError::Configuration`] if `interval` is zero. Nothing is
/// spawned in that case.
///
/// # Panics
///
/// Must be called within a Tokio runtime context.
pub fn spawn_expired_record_sweeper(
    issuer: Arc<TokenIssuer>,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    if interval.is_zero() {
        return Err(AuthError::configuration("sweep interval must be greater than zero"));
    }

    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; consume it so we start
        // with a full interval wait.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("expired record sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match issuer.purge_expired().await {
                        Ok(0) => {},
                        Ok(removed) => tracing::debug!(removed, "sweeper purged expired records"),
                        Err(e) => tracing::warn!(error = %e, "expired record sweep failed"),
                    }
                }
            }
        }
    }))
}
