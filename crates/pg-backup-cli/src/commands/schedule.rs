use anyhow::Result;
use pg_backup_core::{BackupScheduler, BackupWorkflow};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::Services;

pub async fn run() -> Result<()> {
    let services = Services::from_env()?;
    let options = &services.config.backup;

    let workflow = BackupWorkflow::new(
        &services.config,
        services.gateway.clone(),
        services.database.clone(),
        services.runner.clone(),
    );

    // Version mismatch or an unreachable store ends the process before the
    // first trigger
    let major = workflow.preflight().await?;
    info!("Preflight passed (PostgreSQL {})", major);

    if options.retention.is_enabled() {
        info!("Retention: {} day(s)", options.retention.retention_days);
    } else {
        info!("Retention disabled");
    }

    let scheduler = BackupScheduler::new(
        options.schedule.clone(),
        options.startup_delay,
        options.shutdown_grace,
        Arc::new(workflow),
    );

    tokio::spawn(forward_signals(scheduler.shutdown_handle()));

    let report = scheduler.run().await?;
    if report.aborted {
        warn!("Shutdown aborted an in-flight backup");
    }
    info!("Shutdown complete");
    Ok(())
}

/// Turn SIGINT or SIGTERM into a scheduler shutdown
async fn forward_signals(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    let _ = shutdown_tx.send(());
}
