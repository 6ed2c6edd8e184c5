use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "pg-backup")]
#[command(about = "Scheduled PostgreSQL backups to S3-compatible storage", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the backup daemon: one startup backup, then on the cron schedule
    Schedule,

    /// Run a single backup now
    Backup,

    /// Replace the database with a snapshot (destructive)
    Restore {
        /// Snapshot file name relative to S3_PREFIX (overrides S3_RESTORE_FILE)
        #[arg(short, long)]
        file: Option<String>,
    },

    /// List snapshots in the bucket
    List {
        /// Output format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    // Priority: RUST_LOG env var > verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Ignoring unreadable .env file: {}", e),
    }

    match cli.command {
        Commands::Schedule => {
            commands::schedule::run().await?;
        }
        Commands::Backup => {
            commands::backup::run().await?;
        }
        Commands::Restore { file } => {
            commands::restore::run(file.as_deref()).await?;
        }
        Commands::List { format } => {
            commands::list::run(&format).await?;
        }
    }

    Ok(())
}
