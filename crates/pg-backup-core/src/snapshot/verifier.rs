//! Snapshot integrity verification.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::DumpFormat;
use crate::error::StorageError;
use crate::storage::ObjectStoreGateway;
use crate::tools::{ToolInvocation, ToolRunner};
use crate::{Error, Result};

/// Confirms a local snapshot is intact and that the remote copy matches it
pub struct SnapshotVerifier {
    gateway: Arc<dyn ObjectStoreGateway>,
    runner: Arc<dyn ToolRunner>,
}

impl SnapshotVerifier {
    pub fn new(gateway: Arc<dyn ObjectStoreGateway>, runner: Arc<dyn ToolRunner>) -> Self {
        Self { gateway, runner }
    }

    /// Verify `local_path`, produced in `format`, against the object stored
    /// at `remote_key`.
    ///
    /// Returns `Ok(false)` for any mismatch; `Err` is reserved for failures
    /// of the verification machinery itself (storage backend errors, the
    /// listing tool not being runnable).
    pub async fn verify(
        &self,
        local_path: &Path,
        remote_key: &str,
        format: DumpFormat,
    ) -> Result<bool> {
        let local_size = match tokio::fs::metadata(local_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("Verification failed: cannot stat {}: {}", local_path.display(), e);
                return Ok(false);
            }
        };

        if local_size == 0 {
            warn!("Verification failed: {} is empty", local_path.display());
            return Ok(false);
        }

        if format == DumpFormat::Custom && !self.archive_is_readable(local_path).await? {
            return Ok(false);
        }

        let remote = match self.gateway.head(remote_key).await {
            Ok(meta) => meta,
            Err(Error::Storage(StorageError::NotFound(_))) => {
                warn!("Verification failed: remote object {} not found", remote_key);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if remote.size != local_size {
            warn!(
                "Verification failed: {} is {} bytes remotely but {} bytes locally",
                remote_key, remote.size, local_size
            );
            return Ok(false);
        }

        info!("Verified {} ({} bytes)", remote_key, local_size);
        Ok(true)
    }

    /// Header check plus a full `pg_restore --list` walk of the table of
    /// contents, which catches truncated archives of plausible size.
    async fn archive_is_readable(&self, local_path: &Path) -> Result<bool> {
        if DumpFormat::detect(local_path).await? != DumpFormat::Custom {
            warn!(
                "Verification failed: {} lacks the custom archive header",
                local_path.display()
            );
            return Ok(false);
        }

        let output = self
            .runner
            .run(&ToolInvocation::pg_restore_list(local_path))
            .await?;
        if !output.success {
            warn!(
                "Verification failed: archive {} is unreadable: {}",
                local_path.display(),
                output.diagnostic()
            );
            return Ok(false);
        }

        debug!("Archive structure valid: {}", local_path.display());
        Ok(true)
    }
}
