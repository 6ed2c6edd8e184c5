//! Retention enforcement for remote snapshots.

use chrono::{DateTime, TimeDelta, Utc};
use futures::TryStreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::snapshot::parse_snapshot_key;
use crate::storage::ObjectStoreGateway;
use crate::Result;

/// Deletes remote snapshots older than the retention window
pub struct RetentionPruner {
    gateway: Arc<dyn ObjectStoreGateway>,
}

impl RetentionPruner {
    pub fn new(gateway: Arc<dyn ObjectStoreGateway>) -> Self {
        Self { gateway }
    }

    /// Prune snapshots under `prefix` older than `retention_days`.
    pub async fn prune(&self, prefix: &str, retention_days: u32) -> Result<Vec<String>> {
        self.prune_at(prefix, retention_days, Utc::now()).await
    }

    /// Prune relative to a fixed instant.
    ///
    /// Returns the keys that were deleted. A snapshot is expired when its age
    /// is strictly greater than the window, so one exactly at the boundary
    /// survives. Keys that do not follow the snapshot naming scheme are never
    /// touched. A failed delete is logged and skipped; only a failed listing
    /// is returned as an error.
    pub async fn prune_at(
        &self,
        prefix: &str,
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        if retention_days == 0 {
            debug!("Retention disabled, skipping prune");
            return Ok(Vec::new());
        }

        let max_age = TimeDelta::days(i64::from(retention_days));

        // Collect first: deleting while paging through a listing can make the
        // store skip entries
        let expired: Vec<String> = self
            .gateway
            .list(prefix)
            .try_filter_map(|meta| async move {
                let expired = parse_snapshot_key(&meta.key, prefix)
                    .is_some_and(|created_at| now.signed_duration_since(created_at) > max_age);
                Ok(expired.then_some(meta.key))
            })
            .try_collect()
            .await?;

        let mut deleted = Vec::with_capacity(expired.len());
        for key in expired {
            match self.gateway.delete(&key).await {
                Ok(()) => {
                    info!("Deleted expired snapshot: {}", key);
                    deleted.push(key);
                }
                Err(e) => warn!("Failed to delete expired snapshot {}: {}", key, e),
            }
        }

        info!(
            "Retention pass complete: {} snapshot(s) older than {} day(s) deleted",
            deleted.len(),
            retention_days
        );
        Ok(deleted)
    }
}
