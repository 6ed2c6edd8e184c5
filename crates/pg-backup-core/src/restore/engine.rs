//! Restore orchestration.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::{RestoreRequest, RestoreStage};
use crate::config::DatabaseConfig;
use crate::database::DatabaseAdmin;
use crate::snapshot::DumpFormat;
use crate::storage::ObjectStoreGateway;
use crate::tools::{ToolInvocation, ToolRunner};
use crate::{Error, Result};

/// Outcome of a completed restore
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub remote_key: String,
    pub database: String,
    pub format: DumpFormat,
    pub size_bytes: u64,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(duration.as_millis())
    }
}

/// Restores one remote snapshot into the configured database.
///
/// Stages run strictly in order and each one is fatal: a failed download
/// never touches the database, and nothing is rolled back after the drop.
pub struct RestoreOrchestrator {
    gateway: Arc<dyn ObjectStoreGateway>,
    admin: Arc<dyn DatabaseAdmin>,
    runner: Arc<dyn ToolRunner>,
    database: DatabaseConfig,
    work_dir: PathBuf,
}

impl RestoreOrchestrator {
    pub fn new(
        gateway: Arc<dyn ObjectStoreGateway>,
        admin: Arc<dyn DatabaseAdmin>,
        runner: Arc<dyn ToolRunner>,
        database: DatabaseConfig,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            gateway,
            admin,
            runner,
            database,
            work_dir: work_dir.into(),
        }
    }

    /// Run the restore.
    pub async fn run(&self, request: &RestoreRequest) -> Result<RestoreReport> {
        let start = Instant::now();
        let file_name = request.file_name();
        if file_name.is_empty() {
            return Err(Error::Config(format!(
                "Restore key does not name a file: {:?}",
                request.remote_key
            )));
        }
        let local_path = self.work_dir.join(file_name);

        info!(
            "Starting restore of {} into database {}",
            request.remote_key, self.database.database
        );

        let size_bytes = self
            .download(&request.remote_key, &local_path)
            .await
            .map_err(|e| self.fail(e, RestoreStage::Download))?;

        warn!(
            "Dropping and recreating database {}; existing data will be lost",
            self.database.database
        );
        self.admin
            .recreate_database()
            .await
            .map_err(|e| self.fail(e, RestoreStage::DropAndRecreate))?;

        let format = self
            .replay(&local_path)
            .await
            .map_err(|e| self.fail(e, RestoreStage::Restore))?;

        if let Err(e) = tokio::fs::remove_file(&local_path).await {
            warn!("Failed to remove {}: {}", local_path.display(), e);
        }

        let report = RestoreReport {
            remote_key: request.remote_key.clone(),
            database: self.database.database.clone(),
            format,
            size_bytes,
            duration: start.elapsed(),
        };

        info!(
            "Restore complete: {} ({} bytes, {} format) in {:?}",
            report.remote_key, report.size_bytes, report.format, report.duration
        );
        Ok(report)
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<u64> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        self.gateway.download(key, local_path).await?;

        let size = tokio::fs::metadata(local_path).await?.len();
        info!("Downloaded {} to {} ({} bytes)", key, local_path.display(), size);
        Ok(size)
    }

    async fn replay(&self, local_path: &Path) -> Result<DumpFormat> {
        let format = DumpFormat::detect(local_path).await?;
        let invocation = match format {
            DumpFormat::Custom => ToolInvocation::pg_restore(&self.database, local_path),
            DumpFormat::Plain => ToolInvocation::psql_file(&self.database, local_path),
        };

        info!("Replaying {} snapshot with {}", format, invocation.program);
        let output = self.runner.run(&invocation).await?;
        if !output.success {
            return Err(Error::Tool {
                program: invocation.program,
                message: self.database.redact(&output.diagnostic()),
            });
        }

        Ok(format)
    }

    fn fail(&self, err: Error, stage: RestoreStage) -> Error {
        error!("Restore failed during {}: {}", stage, err);
        err.at_stage(stage)
    }
}
