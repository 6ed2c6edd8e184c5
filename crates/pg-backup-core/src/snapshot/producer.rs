//! Snapshot production with pg_dump.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{DumpFormat, SnapshotArtifact};
use crate::config::DatabaseConfig;
use crate::connectivity::parse_major_version;
use crate::tools::{ToolInvocation, ToolRunner};
use crate::{Error, Result};

/// Materializes local snapshot files with pg_dump
pub struct SnapshotProducer {
    database: DatabaseConfig,
    format: DumpFormat,
    prefix: String,
    runner: Arc<dyn ToolRunner>,
}

impl SnapshotProducer {
    pub fn new(
        database: DatabaseConfig,
        format: DumpFormat,
        prefix: impl Into<String>,
        runner: Arc<dyn ToolRunner>,
    ) -> Self {
        Self {
            database,
            format,
            prefix: prefix.into(),
            runner,
        }
    }

    /// Describe the snapshot that a dump started now would produce.
    pub fn prepare(&self, output_dir: &Path, created_at: DateTime<Utc>) -> SnapshotArtifact {
        SnapshotArtifact::new(created_at, output_dir, &self.prefix, self.format)
    }

    /// Dump the database into a new file under `output_dir`.
    pub async fn produce(&self, output_dir: &Path) -> Result<SnapshotArtifact> {
        let mut artifact = self.prepare(output_dir, Utc::now());
        self.write(&mut artifact).await?;
        Ok(artifact)
    }

    /// Run pg_dump for a prepared artifact and record the resulting size.
    ///
    /// The file is left in place on failure; its lifecycle belongs to the
    /// caller.
    pub async fn write(&self, artifact: &mut SnapshotArtifact) -> Result<()> {
        info!(
            "Dumping database {} to {}",
            self.database.database,
            artifact.local_path.display()
        );

        let invocation = ToolInvocation::pg_dump(&self.database, self.format, &artifact.local_path);
        let output = self
            .runner
            .run(&invocation)
            .await
            .map_err(|e| Error::Dump(self.database.redact(&format!("failed to start pg_dump: {}", e))))?;

        if !output.success {
            return Err(Error::Dump(self.database.redact(&output.diagnostic())));
        }

        let size = match tokio::fs::metadata(&artifact.local_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                return Err(Error::Dump(format!(
                    "pg_dump reported success but {} is unreadable: {}",
                    artifact.local_path.display(),
                    e
                )))
            }
        };

        if size == 0 {
            return Err(Error::Dump(format!(
                "pg_dump produced an empty file: {}",
                artifact.local_path.display()
            )));
        }

        artifact.size_bytes = size;
        debug!("Dump complete: {} ({} bytes)", artifact.file_name, size);
        Ok(())
    }

    /// Major version of the installed pg_dump
    pub async fn tool_major_version(&self) -> Result<u32> {
        let output = self.runner.run(&ToolInvocation::pg_dump_version()).await?;
        if !output.success {
            return Err(Error::Tool {
                program: "pg_dump".to_string(),
                message: output.diagnostic(),
            });
        }

        parse_major_version(&output.stdout).ok_or_else(|| Error::Tool {
            program: "pg_dump".to_string(),
            message: format!("unrecognised version output: {}", output.stdout.trim()),
        })
    }
}
