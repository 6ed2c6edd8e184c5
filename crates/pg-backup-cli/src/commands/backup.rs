use anyhow::{bail, Result};
use pg_backup_core::{BackupWorkflow, Trigger};
use tracing::info;

use super::Services;

pub async fn run() -> Result<()> {
    let services = Services::from_env()?;
    let workflow = BackupWorkflow::new(
        &services.config,
        services.gateway.clone(),
        services.database.clone(),
        services.runner.clone(),
    );

    let major = workflow.preflight().await?;
    info!("Preflight passed (PostgreSQL {})", major);

    let run = workflow.run_cycle(Trigger::Manual).await;
    if let Some(failure) = run.failure {
        bail!("Backup failed during {}: {}", failure.stage, failure.message);
    }

    if let Some(snapshot) = &run.snapshot {
        println!("{}", snapshot.remote_key);
    }
    Ok(())
}
