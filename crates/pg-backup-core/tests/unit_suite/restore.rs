//! Restore orchestration tests.

use std::sync::Arc;
use tempfile::TempDir;

use super::helpers::{test_config, RecordingAdmin, ScriptedRunner, CUSTOM_DUMP, PASSWORD, PLAIN_DUMP};
use pg_backup_core::{
    Config, ConnectivityChecker, DumpFormat, Error, MemoryGateway, RestoreOrchestrator, RestoreRequest, RestoreStage,
};

const SNAPSHOT: &str = "backup-2024-01-01T00-00-00-000Z.sql";

struct Fixture {
    dir: TempDir,
    config: Config,
    gateway: Arc<MemoryGateway>,
    admin: Arc<RecordingAdmin>,
    runner: Arc<ScriptedRunner>,
}

impl Fixture {
    fn new(runner: ScriptedRunner, admin: RecordingAdmin) -> Self {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        Self {
            dir,
            config,
            gateway: Arc::new(MemoryGateway::new("pg-backups")),
            admin: Arc::new(admin),
            runner: Arc::new(runner),
        }
    }

    fn orchestrator(&self) -> RestoreOrchestrator {
        RestoreOrchestrator::new(
            self.gateway.clone(),
            self.admin.clone(),
            self.runner.clone(),
            self.config.database.clone(),
            self.dir.path(),
        )
    }

    fn request(&self) -> RestoreRequest {
        self.config.restore_request(Some(SNAPSHOT)).unwrap()
    }
}

#[tokio::test]
async fn test_download_failure_never_touches_database() {
    let fixture = Fixture::new(ScriptedRunner::new(), RecordingAdmin::new());

    let err = fixture.orchestrator().run(&fixture.request()).await.unwrap_err();

    assert!(matches!(
        err,
        Error::RestoreStage {
            stage: RestoreStage::Download,
            ..
        }
    ));
    assert!(fixture.admin.calls().is_empty());
    assert!(fixture.runner.commands().is_empty());
}

#[tokio::test]
async fn test_restore_into_missing_database() {
    let fixture = Fixture::new(ScriptedRunner::new(), RecordingAdmin::new().missing_target());
    fixture
        .gateway
        .put_bytes(&format!("db/{}", SNAPSHOT), CUSTOM_DUMP)
        .await
        .unwrap();
    let checker = ConnectivityChecker::new(fixture.gateway.clone(), fixture.admin.clone());

    assert!(checker.check_all().await.is_err());
    checker.check_restore_targets().await.unwrap();

    fixture.orchestrator().run(&fixture.request()).await.unwrap();

    let calls = fixture.admin.calls();
    assert!(calls.contains(&"ping_admin".to_string()));
    assert_eq!(calls.last().unwrap(), "recreate_database");
    assert_eq!(fixture.runner.commands(), vec!["pg_restore"]);
}

#[tokio::test]
async fn test_restore_checks_report_unreachable_server() {
    let fixture = Fixture::new(ScriptedRunner::new(), RecordingAdmin::new().unreachable());
    let checker = ConnectivityChecker::new(fixture.gateway.clone(), fixture.admin.clone());

    let err = checker.check_restore_targets().await.unwrap_err();

    assert!(matches!(err, Error::Connectivity { ref target, .. } if target == "database"));
    assert_eq!(fixture.admin.calls(), vec!["ping_admin"]);
}

#[tokio::test]
async fn test_custom_archive_restored_with_pg_restore() {
    let fixture = Fixture::new(ScriptedRunner::new(), RecordingAdmin::new());
    fixture
        .gateway
        .put_bytes(&format!("db/{}", SNAPSHOT), CUSTOM_DUMP)
        .await
        .unwrap();

    let report = fixture.orchestrator().run(&fixture.request()).await.unwrap();

    assert_eq!(report.remote_key, format!("db/{}", SNAPSHOT));
    assert_eq!(report.database, "app");
    assert_eq!(report.format, DumpFormat::Custom);
    assert_eq!(report.size_bytes, CUSTOM_DUMP.len() as u64);

    assert_eq!(fixture.admin.calls(), vec!["recreate_database"]);
    assert_eq!(fixture.runner.commands(), vec!["pg_restore"]);

    let restore = &fixture.runner.invocations()[0];
    assert!(restore.args.windows(2).any(|w| w == ["--dbname", "app"]));
    assert!(restore.args.iter().all(|a| !a.contains(PASSWORD)));

    // Downloaded copy removed
    assert!(!fixture.dir.path().join(SNAPSHOT).exists());
}

#[tokio::test]
async fn test_plain_dump_restored_with_psql() {
    let fixture = Fixture::new(ScriptedRunner::new(), RecordingAdmin::new());
    fixture
        .gateway
        .put_bytes(&format!("db/{}", SNAPSHOT), PLAIN_DUMP)
        .await
        .unwrap();

    let report = fixture.orchestrator().run(&fixture.request()).await.unwrap();

    assert_eq!(report.format, DumpFormat::Plain);
    assert_eq!(fixture.runner.commands(), vec!["psql"]);
}

#[tokio::test]
async fn test_recreate_failure_stops_before_restore() {
    let fixture = Fixture::new(ScriptedRunner::new(), RecordingAdmin::new().failing_recreate());
    fixture
        .gateway
        .put_bytes(&format!("db/{}", SNAPSHOT), CUSTOM_DUMP)
        .await
        .unwrap();

    let err = fixture.orchestrator().run(&fixture.request()).await.unwrap_err();

    assert!(matches!(
        err,
        Error::RestoreStage {
            stage: RestoreStage::DropAndRecreate,
            ..
        }
    ));
    assert!(fixture.runner.commands().is_empty());
}

#[tokio::test]
async fn test_restore_tool_failure_is_redacted() {
    let stderr = format!("pg_restore: error: password {} rejected", PASSWORD);
    let fixture = Fixture::new(
        ScriptedRunner::new().failing_restore(&stderr),
        RecordingAdmin::new(),
    );
    fixture
        .gateway
        .put_bytes(&format!("db/{}", SNAPSHOT), CUSTOM_DUMP)
        .await
        .unwrap();

    let err = fixture.orchestrator().run(&fixture.request()).await.unwrap_err();

    match &err {
        Error::RestoreStage { stage, source } => {
            assert_eq!(*stage, RestoreStage::Restore);
            assert!(matches!(source.as_ref(), Error::Tool { program, .. } if program == "pg_restore"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!err.to_string().contains(PASSWORD));
    assert_eq!(fixture.admin.calls(), vec!["recreate_database"]);
}

#[tokio::test]
async fn test_key_without_file_name_rejected() {
    let fixture = Fixture::new(ScriptedRunner::new(), RecordingAdmin::new());

    let err = fixture
        .orchestrator()
        .run(&RestoreRequest::new("db/"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert!(fixture.admin.calls().is_empty());
}
