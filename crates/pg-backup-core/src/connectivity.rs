//! Preflight connectivity and compatibility checks.

use std::sync::Arc;
use tracing::{info, warn};

use crate::database::DatabaseAdmin;
use crate::storage::ObjectStoreGateway;
use crate::{Error, Result};

/// Verifies the store and database are usable before expensive or
/// destructive work starts
pub struct ConnectivityChecker {
    gateway: Arc<dyn ObjectStoreGateway>,
    database: Arc<dyn DatabaseAdmin>,
}

impl ConnectivityChecker {
    pub fn new(gateway: Arc<dyn ObjectStoreGateway>, database: Arc<dyn DatabaseAdmin>) -> Self {
        Self { gateway, database }
    }

    /// Probe the bucket. Read-only.
    pub async fn check_storage(&self) -> bool {
        match self.gateway.bucket_exists().await {
            Ok(true) => true,
            Ok(false) => {
                warn!("Bucket {} does not exist", self.gateway.bucket());
                false
            }
            Err(e) => {
                warn!("Object store check failed: {}", e);
                false
            }
        }
    }

    /// Open a connection, run a trivial query and close it again
    pub async fn check_database(&self) -> bool {
        match self.database.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Database check failed: {}", e);
                false
            }
        }
    }

    /// Reach the server through its administrative database. The target
    /// database may be absent.
    pub async fn check_server(&self) -> bool {
        match self.database.ping_admin().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Database server check failed: {}", e);
                false
            }
        }
    }

    /// Both checks, as a single error naming whatever is unreachable
    pub async fn check_all(&self) -> Result<()> {
        let storage_ok = self.check_storage().await;
        let database_ok = self.check_database().await;
        Self::summarize(storage_ok, database_ok)
    }

    /// Checks run before a restore, which recreates the target database
    /// and so cannot require it to exist
    pub async fn check_restore_targets(&self) -> Result<()> {
        let storage_ok = self.check_storage().await;
        let server_ok = self.check_server().await;
        Self::summarize(storage_ok, server_ok)
    }

    fn summarize(storage_ok: bool, database_ok: bool) -> Result<()> {
        let unreachable: Vec<&str> = [("object store", storage_ok), ("database", database_ok)]
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect();

        if unreachable.is_empty() {
            Ok(())
        } else {
            Err(Error::Connectivity {
                target: unreachable.join(" and "),
                message: "preflight check failed".to_string(),
            })
        }
    }

    /// Fail unless the server's major version equals `expected_major`.
    ///
    /// This is a startup gate; callers terminate the process on error.
    pub async fn check_database_version(&self, expected_major: u32) -> Result<u32> {
        let version = self.database.server_version().await.map_err(|e| Error::Connectivity {
            target: "database".to_string(),
            message: e.to_string(),
        })?;

        match parse_major_version(&version) {
            Some(major) if major == expected_major => {
                info!("Database server version {} is compatible", version.trim());
                Ok(major)
            }
            _ => Err(Error::VersionMismatch {
                expected: expected_major,
                found: version.trim().to_string(),
            }),
        }
    }
}

/// Major component of a PostgreSQL version string.
///
/// Accepts server strings (`16.2`, `16.2 (Debian 16.2-1.pgdg120+2)`,
/// `17beta1`) as well as tool banners (`pg_dump (PostgreSQL) 16.2`).
pub fn parse_major_version(version: &str) -> Option<u32> {
    let token = version
        .split_whitespace()
        .find(|t| t.starts_with(|c: char| c.is_ascii_digit()))?;
    let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
