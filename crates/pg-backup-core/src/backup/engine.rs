//! Backup workflow.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{BackupJob, Trigger};
use crate::config::{Config, RetentionPolicy};
use crate::connectivity::ConnectivityChecker;
use crate::database::DatabaseAdmin;
use crate::retention::RetentionPruner;
use crate::snapshot::{SnapshotArtifact, SnapshotProducer, SnapshotVerifier};
use crate::storage::ObjectStoreGateway;
use crate::tools::ToolRunner;
use crate::{Error, Result};

/// Step of a backup cycle that can fail it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStage {
    Connectivity,
    Dump,
    Upload,
    Verify,
}

impl fmt::Display for BackupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupStage::Connectivity => write!(f, "connectivity"),
            BackupStage::Dump => write!(f, "dump"),
            BackupStage::Upload => write!(f, "upload"),
            BackupStage::Verify => write!(f, "verify"),
        }
    }
}

/// Why a cycle failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: BackupStage,
    pub message: String,
}

/// Record of one backup cycle. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct BackupRun {
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub snapshot: Option<SnapshotArtifact>,
    pub connectivity_ok: bool,
    pub uploaded: bool,
    pub verified: bool,
    /// Remote keys deleted by the retention pass
    pub pruned: Vec<String>,
    pub failure: Option<StageFailure>,
}

impl BackupRun {
    pub fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            started_at: Utc::now(),
            finished_at: None,
            snapshot: None,
            connectivity_ok: false,
            uploaded: false,
            verified: false,
            pruned: Vec::new(),
            failure: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    fn fail(&mut self, stage: BackupStage, err: &Error) {
        self.failure = Some(StageFailure {
            stage,
            message: err.to_string(),
        });
    }
}

/// One backup cycle: connectivity, dump, upload, verify, prune, cleanup.
///
/// Every failure is caught here and recorded in the returned [`BackupRun`];
/// nothing propagates to the scheduler.
pub struct BackupWorkflow {
    gateway: Arc<dyn ObjectStoreGateway>,
    checker: ConnectivityChecker,
    producer: SnapshotProducer,
    verifier: SnapshotVerifier,
    pruner: RetentionPruner,
    prefix: String,
    retention: RetentionPolicy,
    work_dir: PathBuf,
    keep_failed_artifacts: bool,
    expected_major_version: Option<u32>,
}

impl BackupWorkflow {
    pub fn new(
        config: &Config,
        gateway: Arc<dyn ObjectStoreGateway>,
        database: Arc<dyn DatabaseAdmin>,
        runner: Arc<dyn ToolRunner>,
    ) -> Self {
        let backup = &config.backup;
        Self {
            checker: ConnectivityChecker::new(gateway.clone(), database),
            producer: SnapshotProducer::new(
                config.database.clone(),
                backup.dump_format,
                config.storage.prefix.clone(),
                runner.clone(),
            ),
            verifier: SnapshotVerifier::new(gateway.clone(), runner),
            pruner: RetentionPruner::new(gateway.clone()),
            gateway,
            prefix: config.storage.prefix.clone(),
            retention: backup.retention,
            work_dir: backup.work_dir.clone(),
            keep_failed_artifacts: backup.keep_failed_artifacts,
            expected_major_version: backup.expected_major_version,
        }
    }

    /// Startup checks: create the bucket if needed, reach the database and
    /// confirm its major version matches the dump tooling.
    ///
    /// Returns the server major version.
    pub async fn preflight(&self) -> Result<u32> {
        self.gateway
            .ensure_bucket()
            .await
            .map_err(|e| Error::Connectivity {
                target: "object store".to_string(),
                message: e.to_string(),
            })?;

        if !self.checker.check_database().await {
            return Err(Error::Connectivity {
                target: "database".to_string(),
                message: "cannot connect".to_string(),
            });
        }

        let expected = match self.expected_major_version {
            Some(major) => major,
            None => self.producer.tool_major_version().await?,
        };
        self.checker.check_database_version(expected).await
    }

    /// Run one full cycle.
    pub async fn run_cycle(&self, trigger: Trigger) -> BackupRun {
        let mut run = BackupRun::new(trigger);
        info!("Starting {} backup", trigger);

        self.execute(&mut run).await;
        run.finished_at = Some(Utc::now());

        match &run.failure {
            None => info!(
                "Backup complete: {} ({} bytes), {} expired snapshot(s) pruned",
                run.snapshot.as_ref().map_or("", |s| s.remote_key.as_str()),
                run.snapshot.as_ref().map_or(0, |s| s.size_bytes),
                run.pruned.len()
            ),
            Some(failure) => error!(
                "Backup failed during {}: {}",
                failure.stage, failure.message
            ),
        }

        run
    }

    async fn execute(&self, run: &mut BackupRun) {
        if let Err(e) = self.checker.check_all().await {
            run.fail(BackupStage::Connectivity, &e);
            return;
        }
        run.connectivity_ok = true;

        if let Err(e) = tokio::fs::create_dir_all(&self.work_dir).await {
            run.fail(BackupStage::Dump, &Error::Io(e));
            return;
        }

        let mut artifact = self.producer.prepare(&self.work_dir, Utc::now());
        let written = self.producer.write(&mut artifact).await;
        run.snapshot = Some(artifact.clone());

        if let Err(e) = written {
            run.fail(BackupStage::Dump, &e);
            self.discard_failed(&artifact).await;
            return;
        }

        if let Err(e) = self
            .gateway
            .upload(&artifact.local_path, &artifact.remote_key)
            .await
        {
            run.fail(BackupStage::Upload, &e);
            self.discard_failed(&artifact).await;
            return;
        }
        run.uploaded = true;

        match self
            .verifier
            .verify(&artifact.local_path, &artifact.remote_key, artifact.format)
            .await
        {
            Ok(true) => run.verified = true,
            Ok(false) => {
                let err = Error::Verification {
                    key: artifact.remote_key.clone(),
                };
                run.fail(BackupStage::Verify, &err);
                self.discard_failed(&artifact).await;
                return;
            }
            Err(e) => {
                run.fail(BackupStage::Verify, &e);
                self.discard_failed(&artifact).await;
                return;
            }
        }

        if self.retention.is_enabled() {
            match self
                .pruner
                .prune(&self.prefix, self.retention.retention_days)
                .await
            {
                Ok(deleted) => run.pruned = deleted,
                Err(e) => warn!("Retention pass aborted: {}", e),
            }
        }

        remove_local(&artifact).await;
    }

    async fn discard_failed(&self, artifact: &SnapshotArtifact) {
        if self.keep_failed_artifacts {
            if tokio::fs::try_exists(&artifact.local_path)
                .await
                .unwrap_or(false)
            {
                info!(
                    "Keeping local snapshot for inspection: {}",
                    artifact.local_path.display()
                );
            }
        } else {
            remove_local(artifact).await;
        }
    }
}

async fn remove_local(artifact: &SnapshotArtifact) {
    match tokio::fs::remove_file(&artifact.local_path).await {
        Ok(()) => debug!("Removed local snapshot {}", artifact.local_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "Failed to remove local snapshot {}: {}",
            artifact.local_path.display(),
            e
        ),
    }
}

#[async_trait]
impl BackupJob for BackupWorkflow {
    async fn run(&self, trigger: Trigger) -> BackupRun {
        self.run_cycle(trigger).await
    }
}
