//! Backup workflow tests.

use chrono::TimeDelta;
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use super::helpers::{
    seed_snapshot, test_config, RecordingAdmin, ScriptedRunner, CUSTOM_DUMP, PASSWORD, PLAIN_DUMP,
};
use pg_backup_core::{
    BackupScheduler, BackupStage, BackupWorkflow, Config, CronSchedule, DumpFormat, Error,
    MemoryGateway, ObjectStoreGateway, Trigger,
};

struct Fixture {
    _dir: TempDir,
    config: Config,
    gateway: Arc<MemoryGateway>,
    admin: Arc<RecordingAdmin>,
    runner: Arc<ScriptedRunner>,
}

impl Fixture {
    fn new(runner: ScriptedRunner) -> Self {
        Self::with(runner, RecordingAdmin::new(), MemoryGateway::new("pg-backups"))
    }

    fn with(runner: ScriptedRunner, admin: RecordingAdmin, gateway: MemoryGateway) -> Self {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        Self {
            _dir: dir,
            config,
            gateway: Arc::new(gateway),
            admin: Arc::new(admin),
            runner: Arc::new(runner),
        }
    }

    fn workflow(&self) -> BackupWorkflow {
        BackupWorkflow::new(
            &self.config,
            self.gateway.clone(),
            self.admin.clone(),
            self.runner.clone(),
        )
    }

    async fn remote_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .gateway
            .list("db/")
            .map_ok(|m| m.key)
            .try_collect()
            .await
            .unwrap();
        keys.sort();
        keys
    }

    fn local_files(&self) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(&self.config.backup.work_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }
}

#[tokio::test]
async fn test_successful_cycle() {
    let fixture = Fixture::new(ScriptedRunner::new());
    let recent = seed_snapshot(&fixture.gateway, "db/", TimeDelta::days(1)).await;
    let expired = seed_snapshot(&fixture.gateway, "db/", TimeDelta::days(8)).await;
    let ancient = seed_snapshot(&fixture.gateway, "db/", TimeDelta::days(30)).await;
    fixture.gateway.put_bytes("db/notes.txt", "keep").await.unwrap();

    let run = fixture.workflow().run_cycle(Trigger::Manual).await;

    assert!(run.succeeded(), "unexpected failure: {:?}", run.failure);
    assert!(run.connectivity_ok);
    assert!(run.uploaded);
    assert!(run.verified);
    assert!(run.finished_at.is_some());

    let mut pruned = run.pruned.clone();
    pruned.sort();
    let mut expected = vec![expired, ancient];
    expected.sort();
    assert_eq!(pruned, expected);

    let snapshot = run.snapshot.unwrap();
    assert!(snapshot.remote_key.starts_with("db/backup-"));
    assert_eq!(snapshot.size_bytes, CUSTOM_DUMP.len() as u64);

    let head = fixture.gateway.head(&snapshot.remote_key).await.unwrap();
    assert_eq!(head.size, snapshot.size_bytes);

    let mut remaining = vec![
        "db/notes.txt".to_string(),
        recent,
        snapshot.remote_key.clone(),
    ];
    remaining.sort();
    assert_eq!(fixture.remote_keys().await, remaining);

    // Local copy removed after upload and verification
    assert!(fixture.local_files().is_empty());

    assert_eq!(
        fixture.runner.commands(),
        vec!["pg_dump", "pg_restore --list"]
    );
}

#[tokio::test]
async fn test_zero_byte_dump_fails_and_keeps_file() {
    let fixture = Fixture::new(ScriptedRunner::new().with_dump_bytes(b""));
    let expired = seed_snapshot(&fixture.gateway, "db/", TimeDelta::days(30)).await;

    let run = fixture.workflow().run_cycle(Trigger::Manual).await;

    let failure = run.failure.clone().unwrap();
    assert_eq!(failure.stage, BackupStage::Dump);
    assert!(!run.uploaded);
    assert!(run.pruned.is_empty());

    // Empty file retained for inspection
    let snapshot = run.snapshot.unwrap();
    assert!(snapshot.local_path.exists());
    assert_eq!(std::fs::metadata(&snapshot.local_path).unwrap().len(), 0);

    // Nothing uploaded, nothing pruned
    assert_eq!(fixture.remote_keys().await, vec![expired]);
}

#[tokio::test]
async fn test_failed_artifact_removed_when_not_kept() {
    let mut fixture = Fixture::new(ScriptedRunner::new().with_dump_bytes(b""));
    fixture.config.backup.keep_failed_artifacts = false;

    let run = fixture.workflow().run_cycle(Trigger::Manual).await;

    assert_eq!(run.failure.unwrap().stage, BackupStage::Dump);
    assert!(fixture.local_files().is_empty());
}

#[tokio::test]
async fn test_dump_error_is_redacted() {
    let stderr = format!(
        "pg_dump: error: connection to server failed: password \"{}\" rejected",
        PASSWORD
    );
    let fixture = Fixture::new(ScriptedRunner::new().failing_dump(&stderr));

    let run = fixture.workflow().run_cycle(Trigger::Manual).await;

    let failure = run.failure.unwrap();
    assert_eq!(failure.stage, BackupStage::Dump);
    assert!(failure.message.contains("connection to server failed"));
    assert!(!failure.message.contains(PASSWORD));
}

#[tokio::test]
async fn test_unreachable_store_stops_before_dump() {
    let fixture = Fixture::with(
        ScriptedRunner::new(),
        RecordingAdmin::new(),
        MemoryGateway::without_bucket("pg-backups"),
    );

    let run = fixture.workflow().run_cycle(Trigger::Manual).await;

    assert_eq!(run.failure.unwrap().stage, BackupStage::Connectivity);
    assert!(!run.connectivity_ok);
    assert!(run.snapshot.is_none());
    assert!(fixture.runner.commands().is_empty());
}

#[tokio::test]
async fn test_unreachable_database_stops_before_dump() {
    let fixture = Fixture::with(
        ScriptedRunner::new(),
        RecordingAdmin::new().unreachable(),
        MemoryGateway::new("pg-backups"),
    );

    let run = fixture.workflow().run_cycle(Trigger::Manual).await;

    let failure = run.failure.unwrap();
    assert_eq!(failure.stage, BackupStage::Connectivity);
    assert!(failure.message.contains("database"));
    assert!(fixture.runner.commands().is_empty());
}

#[tokio::test]
async fn test_verification_failure_skips_pruning() {
    let fixture = Fixture::new(ScriptedRunner::new().failing_list());
    let expired = seed_snapshot(&fixture.gateway, "db/", TimeDelta::days(30)).await;

    let run = fixture.workflow().run_cycle(Trigger::Manual).await;

    let failure = run.failure.clone().unwrap();
    assert_eq!(failure.stage, BackupStage::Verify);
    assert!(run.uploaded);
    assert!(!run.verified);
    assert!(run.pruned.is_empty());

    let snapshot = run.snapshot.unwrap();
    assert!(snapshot.local_path.exists());
    assert!(fixture.remote_keys().await.contains(&expired));
}

#[tokio::test]
async fn test_damaged_custom_archive_header_fails_verification() {
    let fixture = Fixture::new(
        ScriptedRunner::new()
            .with_dump_bytes(b"\x00GDMP\x01\x0e\x00\x04\x08\x08\x01")
            .failing_list(),
    );

    let run = fixture.workflow().run_cycle(Trigger::Manual).await;

    let failure = run.failure.clone().unwrap();
    assert_eq!(failure.stage, BackupStage::Verify);
    assert!(!run.verified);
    assert!(run.snapshot.unwrap().local_path.exists());
}

#[tokio::test]
async fn test_plain_dump_skips_archive_listing() {
    let mut fixture = Fixture::new(ScriptedRunner::new().with_dump_bytes(PLAIN_DUMP));
    fixture.config.backup.dump_format = DumpFormat::Plain;

    let run = fixture.workflow().run_cycle(Trigger::Manual).await;

    assert!(run.succeeded(), "unexpected failure: {:?}", run.failure);
    assert_eq!(run.snapshot.unwrap().format, DumpFormat::Plain);
    assert_eq!(fixture.runner.commands(), vec!["pg_dump"]);

    let dump = &fixture.runner.invocations()[0];
    assert!(dump.args.windows(2).any(|w| w == ["--format", "plain"]));
}

#[tokio::test]
async fn test_retention_disabled_keeps_everything() {
    let mut fixture = Fixture::new(ScriptedRunner::new());
    fixture.config.backup.retention.retention_days = 0;
    let old = seed_snapshot(&fixture.gateway, "db/", TimeDelta::days(365)).await;

    let run = fixture.workflow().run_cycle(Trigger::Manual).await;

    assert!(run.succeeded());
    assert!(run.pruned.is_empty());
    assert!(fixture.remote_keys().await.contains(&old));
}

#[tokio::test]
async fn test_preflight_creates_bucket_and_checks_version() {
    let fixture = Fixture::with(
        ScriptedRunner::new(),
        RecordingAdmin::new(),
        MemoryGateway::without_bucket("pg-backups"),
    );

    let major = fixture.workflow().preflight().await.unwrap();

    assert_eq!(major, 16);
    assert!(fixture.gateway.bucket_exists().await.unwrap());
    assert_eq!(fixture.runner.commands(), vec!["pg_dump --version"]);
    assert_eq!(fixture.admin.calls(), vec!["ping", "server_version"]);
}

#[tokio::test]
async fn test_preflight_rejects_version_mismatch() {
    let fixture = Fixture::with(
        ScriptedRunner::new(),
        RecordingAdmin::new().with_version("15.6"),
        MemoryGateway::new("pg-backups"),
    );

    let err = fixture.workflow().preflight().await.unwrap_err();
    assert!(matches!(
        err,
        Error::VersionMismatch { expected: 16, ref found } if found == "15.6"
    ));
}

#[tokio::test]
async fn test_preflight_uses_configured_version() {
    let mut fixture = Fixture::with(
        ScriptedRunner::new(),
        RecordingAdmin::new().with_version("15.6"),
        MemoryGateway::new("pg-backups"),
    );
    fixture.config.backup.expected_major_version = Some(15);

    assert_eq!(fixture.workflow().preflight().await.unwrap(), 15);
    assert!(fixture.runner.commands().is_empty());
}

#[tokio::test]
async fn test_preflight_unreachable_database() {
    let fixture = Fixture::with(
        ScriptedRunner::new(),
        RecordingAdmin::new().unreachable(),
        MemoryGateway::new("pg-backups"),
    );

    let err = fixture.workflow().preflight().await.unwrap_err();
    assert!(matches!(err, Error::Connectivity { .. }));
}

#[tokio::test]
async fn test_scheduler_drives_startup_run() {
    let fixture = Fixture::new(ScriptedRunner::new());
    let scheduler = Arc::new(BackupScheduler::new(
        CronSchedule::parse("0 0 1 1 *").unwrap(),
        Duration::ZERO,
        Duration::from_secs(5),
        Arc::new(fixture.workflow()),
    ));

    let handle = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    scheduler.shutdown_handle().send(()).unwrap();
    let report = handle.await.unwrap().unwrap();

    assert_eq!(report.runs_started, 1);
    assert_eq!(report.runs_failed, 0);
    assert_eq!(fixture.remote_keys().await.len(), 1);
}
