//! PostgreSQL Backup Core Library
//!
//! This crate provides scheduled `pg_dump` snapshots of a PostgreSQL
//! database to S3-compatible object storage, with verification, retention
//! pruning and a destructive restore path.

pub mod backup;
pub mod config;
pub mod connectivity;
pub mod database;
pub mod error;
pub mod restore;
pub mod retention;
pub mod snapshot;
pub mod storage;
pub mod tools;

pub use backup::{
    BackupJob, BackupRun, BackupScheduler, BackupStage, BackupWorkflow, CronSchedule,
    SchedulerReport, Trigger,
};
pub use config::{
    BackupOptions, Config, DatabaseConfig, ObjectStoreConfig, RestoreOptions, RetentionPolicy,
};
pub use connectivity::ConnectivityChecker;
pub use database::{DatabaseAdmin, PgAdmin};
pub use error::{Error, Result, StorageError};
pub use restore::{RestoreOrchestrator, RestoreReport, RestoreRequest, RestoreStage};
pub use retention::RetentionPruner;
pub use snapshot::{DumpFormat, SnapshotArtifact, SnapshotProducer, SnapshotVerifier};
pub use storage::{create_gateway, MemoryGateway, ObjectMetadata, ObjectStoreGateway};
pub use tools::{ProcessRunner, ToolInvocation, ToolOutput, ToolRunner};
