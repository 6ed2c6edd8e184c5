//! Backup module: the per-cycle workflow and the scheduler driving it.

pub mod engine;
pub mod scheduler;

pub use engine::{BackupRun, BackupStage, BackupWorkflow, StageFailure};
pub use scheduler::{
    BackupJob, BackupScheduler, CronSchedule, SchedulerReport, SchedulerState, Trigger,
};
