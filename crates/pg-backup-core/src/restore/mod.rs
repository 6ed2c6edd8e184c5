//! Restore module.
//!
//! A restore replaces the configured database with the contents of one
//! remote snapshot. It is destructive and has no rollback once the database
//! has been dropped.

pub mod engine;

pub use engine::{RestoreOrchestrator, RestoreReport};

use serde::Serialize;
use std::fmt;

/// Stages of a restore, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStage {
    /// Fetch the snapshot from the object store
    Download,
    /// Drop and create the target database
    DropAndRecreate,
    /// Replay the snapshot with pg_restore or psql
    Restore,
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreStage::Download => write!(f, "download"),
            RestoreStage::DropAndRecreate => write!(f, "drop and recreate"),
            RestoreStage::Restore => write!(f, "restore"),
        }
    }
}

/// Which snapshot to restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreRequest {
    /// Full object key, prefix included
    pub remote_key: String,
}

impl RestoreRequest {
    pub fn new(remote_key: impl Into<String>) -> Self {
        Self {
            remote_key: remote_key.into(),
        }
    }

    /// Last path segment of the key, used as the local file name
    pub fn file_name(&self) -> &str {
        self.remote_key
            .rsplit('/')
            .next()
            .unwrap_or(&self.remote_key)
    }
}
