pub mod backup;
pub mod list;
pub mod restore;
pub mod schedule;

use anyhow::Result;
use pg_backup_core::storage::create_gateway;
use pg_backup_core::{
    Config, DatabaseAdmin, ObjectStoreGateway, PgAdmin, ProcessRunner, ToolRunner,
};
use std::sync::Arc;
use tracing::info;

/// Production handles shared by the commands
pub struct Services {
    pub config: Config,
    pub gateway: Arc<dyn ObjectStoreGateway>,
    pub database: Arc<dyn DatabaseAdmin>,
    pub runner: Arc<dyn ToolRunner>,
}

impl Services {
    /// Load configuration from the environment and build the clients
    pub fn from_env() -> Result<Self> {
        let config = Config::from_env()?;
        info!(
            "Database {}@{}:{}/{}, bucket {} at {}",
            config.database.user,
            config.database.host,
            config.database.port,
            config.database.database,
            config.storage.bucket,
            config.storage.endpoint
        );

        let gateway = create_gateway(&config.storage)?;
        let database: Arc<dyn DatabaseAdmin> = Arc::new(PgAdmin::new(config.database.clone()));

        Ok(Self {
            config,
            gateway,
            database,
            runner: Arc::new(ProcessRunner),
        })
    }
}

/// Output format for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "yaml" => Self::Yaml,
            _ => Self::Text,
        }
    }
}
