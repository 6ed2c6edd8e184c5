use anyhow::Result;
use pg_backup_core::{ConnectivityChecker, RestoreOrchestrator};
use tracing::info;

use super::Services;

pub async fn run(file: Option<&str>) -> Result<()> {
    let services = Services::from_env()?;
    let request = services.config.restore_request(file)?;

    ConnectivityChecker::new(services.gateway.clone(), services.database.clone())
        .check_restore_targets()
        .await?;

    let orchestrator = RestoreOrchestrator::new(
        services.gateway.clone(),
        services.database.clone(),
        services.runner.clone(),
        services.config.database.clone(),
        services.config.backup.work_dir.clone(),
    );

    let report = orchestrator.run(&request).await?;
    info!(
        "Database {} restored from {}",
        report.database, report.remote_key
    );
    Ok(())
}
