//! Scoped PostgreSQL connections for checks and administrative statements.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Trait for the SQL-level operations the workflows need.
///
/// Every call opens its own connection and closes it before returning,
/// on success and failure alike.
#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    /// Run a trivial query against the target database
    async fn ping(&self) -> Result<()>;

    /// Run a trivial query against the administrative database. Succeeds
    /// while the target database does not exist yet.
    async fn ping_admin(&self) -> Result<()>;

    /// Server version string, e.g. `16.2 (Debian 16.2-1.pgdg120+2)`
    async fn server_version(&self) -> Result<String>;

    /// Drop and create the target database from the administrative
    /// database. Destructive.
    async fn recreate_database(&self) -> Result<()>;
}

/// PostgreSQL implementation using sqlx
pub struct PgAdmin {
    config: DatabaseConfig,
}

impl PgAdmin {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    fn options(&self, dbname: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(&self.config.password)
            .database(dbname)
            .application_name("pg-backup")
    }

    fn driver_error(&self, err: sqlx::Error) -> Error {
        Error::Database(self.config.redact(&err.to_string()))
    }

    async fn connect(&self, dbname: &str) -> Result<PgConnection> {
        debug!("Connecting to {}:{}/{}", self.config.host, self.config.port, dbname);

        match tokio::time::timeout(CONNECT_TIMEOUT, PgConnection::connect_with(&self.options(dbname)))
            .await
        {
            Ok(result) => result.map_err(|e| self.driver_error(e)),
            Err(_) => Err(Error::Database(format!(
                "connection to {}:{} timed out after {:?}",
                self.config.host, self.config.port, CONNECT_TIMEOUT
            ))),
        }
    }

    async fn select_one(&self, dbname: &str) -> Result<()> {
        let mut conn = self.connect(dbname).await?;
        let result = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&mut conn)
            .await;
        let _ = conn.close().await;

        result.map(|_| ()).map_err(|e| self.driver_error(e))
    }
}

#[async_trait]
impl DatabaseAdmin for PgAdmin {
    async fn ping(&self) -> Result<()> {
        self.select_one(&self.config.database).await
    }

    async fn ping_admin(&self) -> Result<()> {
        self.select_one(self.config.admin_database()).await
    }

    async fn server_version(&self) -> Result<String> {
        let mut conn = self.connect(&self.config.database).await?;
        let result = sqlx::query_scalar::<_, String>("SELECT current_setting('server_version')")
            .fetch_one(&mut conn)
            .await;
        let _ = conn.close().await;

        result.map_err(|e| self.driver_error(e))
    }

    async fn recreate_database(&self) -> Result<()> {
        let drop_sql = drop_database_sql(&self.config.database);
        let create_sql = create_database_sql(&self.config.database);
        let mut conn = self.connect(self.config.admin_database()).await?;

        info!("Dropping database {} if it exists", self.config.database);
        let mut result = Executor::execute(&mut conn, drop_sql.as_str()).await.map(|_| ());
        if result.is_ok() {
            info!("Creating database {}", self.config.database);
            result = Executor::execute(&mut conn, create_sql.as_str()).await.map(|_| ());
        }
        let _ = conn.close().await;

        result.map_err(|e| self.driver_error(e))
    }
}

fn drop_database_sql(name: &str) -> String {
    format!("DROP DATABASE IF EXISTS {}", quote_identifier(name))
}

fn create_database_sql(name: &str) -> String {
    format!("CREATE DATABASE {}", quote_identifier(name))
}

/// Quote an SQL identifier, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
