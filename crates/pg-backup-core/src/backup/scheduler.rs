//! Backup scheduling.
//!
//! A cron trigger and a one-off startup trigger feed a single bounded run
//! queue. One worker drains the queue, so backup runs never overlap; a
//! trigger that arrives while another run is already queued is dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::BackupRun;
use crate::{Error, Result};

const DAILY_AT_MIDNIGHT: &str = "0 0 * * *";

/// A cron expression evaluated in UTC.
///
/// Accepts the standard five-field form (`min hour dom month dow`) as well
/// as the six and seven-field forms with a leading seconds field.
#[derive(Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.split_whitespace().collect::<Vec<_>>().join(" ");
        let normalized = match expression.split(' ').count() {
            5 => format!("0 {}", expression),
            _ => expression.clone(),
        };

        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| {
            Error::Config(format!("Invalid cron expression {:?}: {}", expression, e))
        })?;

        Ok(Self {
            expression,
            schedule,
        })
    }

    /// Every day at 00:00 UTC
    pub fn daily_at_midnight() -> Self {
        match Self::parse(DAILY_AT_MIDNIGHT) {
            Ok(schedule) => schedule,
            Err(e) => unreachable!("built-in schedule must parse: {}", e),
        }
    }

    /// The expression as configured
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expression).finish()
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl FromStr for CronSchedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for CronSchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.expression)
    }
}

/// What started a backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// The one-off run after process start
    Startup,
    /// A cron fire time
    Scheduled { at: DateTime<Utc> },
    /// Requested from the command line
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Startup => write!(f, "startup"),
            Trigger::Scheduled { at } => write!(f, "scheduled ({})", at.to_rfc3339()),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

/// Work executed for each trigger
#[async_trait]
pub trait BackupJob: Send + Sync {
    /// Run one backup. Failures are reported in the returned record.
    async fn run(&self, trigger: Trigger) -> BackupRun;
}

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Summary returned when the scheduler stops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerReport {
    pub runs_started: u64,
    pub runs_failed: u64,
    /// Triggers dropped because a run was already queued
    pub triggers_skipped: u64,
    /// The in-flight run outlived the grace period and was cancelled
    pub aborted: bool,
}

#[derive(Default)]
struct RunCounters {
    started: AtomicU64,
    failed: AtomicU64,
}

/// Cron-driven backup scheduler
pub struct BackupScheduler {
    schedule: CronSchedule,
    startup_delay: Duration,
    shutdown_grace: Duration,
    job: Arc<dyn BackupJob>,
    state: Arc<Mutex<SchedulerState>>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: Mutex<Option<broadcast::Receiver<()>>>,
}

impl BackupScheduler {
    pub fn new(
        schedule: CronSchedule,
        startup_delay: Duration,
        shutdown_grace: Duration,
        job: Arc<dyn BackupJob>,
    ) -> Self {
        // Subscribe up front so a shutdown sent before run() is not lost
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Self {
            schedule,
            startup_delay,
            shutdown_grace,
            job,
            state: Arc::new(Mutex::new(SchedulerState::Idle)),
            shutdown_tx,
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
        }
    }

    /// Get a shutdown handle that can be used to stop the scheduler
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Request a cooperative shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    /// Run until shutdown is requested.
    ///
    /// On shutdown no further triggers are accepted, queued triggers are
    /// discarded and the in-flight run gets the grace period to finish
    /// before it is aborted.
    pub async fn run(&self) -> Result<SchedulerReport> {
        let mut shutdown_rx = self
            .shutdown_rx
            .lock()
            .take()
            .unwrap_or_else(|| self.shutdown_tx.subscribe());

        let (queue_tx, queue_rx) = mpsc::channel::<Trigger>(1);
        let stopping = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(RunCounters::default());

        let mut worker = tokio::spawn(Self::work(
            self.job.clone(),
            queue_rx,
            self.state.clone(),
            stopping.clone(),
            counters.clone(),
        ));

        info!(
            "Scheduler started: schedule {:?} (UTC), startup run in {:?}",
            self.schedule.expression(),
            self.startup_delay
        );

        let mut report = SchedulerReport::default();
        let mut startup_deadline = Some(Instant::now() + self.startup_delay);
        let mut last_fired = Utc::now();

        loop {
            let next_fire = self.schedule.next_after(&last_fired.max(Utc::now()));
            let cron_deadline = next_fire.map(deadline_for);
            if let Some(at) = next_fire {
                debug!("Next scheduled backup at {}", at.to_rfc3339());
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested, stopping scheduler");
                    break;
                }

                joined = &mut worker => {
                    *self.state.lock() = SchedulerState::Idle;
                    let message = match joined {
                        Err(e) if e.is_panic() => "backup worker panicked".to_string(),
                        Err(e) => format!("backup worker failed: {}", e),
                        Ok(()) => "backup worker exited".to_string(),
                    };
                    error!("Scheduler cannot continue: {}", message);
                    return Err(Error::Scheduler(message));
                }

                _ = wait_until(startup_deadline) => {
                    startup_deadline = None;
                    self.enqueue(&queue_tx, Trigger::Startup, &mut report);
                }

                _ = wait_until(cron_deadline) => {
                    if let Some(at) = next_fire {
                        last_fired = at;
                        self.enqueue(&queue_tx, Trigger::Scheduled { at }, &mut report);
                    }
                }
            }
        }

        stopping.store(true, Ordering::SeqCst);
        drop(queue_tx);

        if self.state() == SchedulerState::Running {
            info!(
                "Waiting up to {:?} for the in-flight backup to finish",
                self.shutdown_grace
            );
        }

        if tokio::time::timeout(self.shutdown_grace, &mut worker)
            .await
            .is_err()
        {
            warn!(
                "In-flight backup did not finish within {:?}, aborting",
                self.shutdown_grace
            );
            worker.abort();
            let _ = worker.await;
            *self.state.lock() = SchedulerState::Idle;
            report.aborted = true;
        }

        report.runs_started = counters.started.load(Ordering::SeqCst);
        report.runs_failed = counters.failed.load(Ordering::SeqCst);

        info!(
            "Scheduler stopped: {} run(s), {} failed, {} trigger(s) skipped",
            report.runs_started, report.runs_failed, report.triggers_skipped
        );
        Ok(report)
    }

    fn enqueue(
        &self,
        queue: &mpsc::Sender<Trigger>,
        trigger: Trigger,
        report: &mut SchedulerReport,
    ) {
        match queue.try_send(trigger) {
            Ok(()) => debug!("Queued {} backup", trigger),
            Err(mpsc::error::TrySendError::Full(_)) => {
                report.triggers_skipped += 1;
                warn!(
                    "Skipping {} backup: a run is already in progress and another is queued",
                    trigger
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                report.triggers_skipped += 1;
                error!("Backup worker has stopped, dropping {} trigger", trigger);
            }
        }
    }

    async fn work(
        job: Arc<dyn BackupJob>,
        mut queue: mpsc::Receiver<Trigger>,
        state: Arc<Mutex<SchedulerState>>,
        stopping: Arc<AtomicBool>,
        counters: Arc<RunCounters>,
    ) {
        while let Some(trigger) = queue.recv().await {
            if stopping.load(Ordering::SeqCst) {
                debug!("Discarding queued {} trigger during shutdown", trigger);
                continue;
            }

            *state.lock() = SchedulerState::Running;
            counters.started.fetch_add(1, Ordering::SeqCst);

            let run = job.run(trigger).await;

            *state.lock() = SchedulerState::Idle;
            if !run.succeeded() {
                counters.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

/// Monotonic deadline for a wall-clock instant; past instants fire now
fn deadline_for(at: DateTime<Utc>) -> Instant {
    let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    Instant::now() + wait
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
