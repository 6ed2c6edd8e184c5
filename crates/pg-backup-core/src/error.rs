//! Error types for the PostgreSQL backup core library.

use thiserror::Error;

use crate::restore::RestoreStage;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the PostgreSQL backup library.
///
/// Messages carried by these variants have already been scrubbed of the
/// database password; see [`crate::config::DatabaseConfig::redact`].
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Object store or database unreachable
    #[error("{target} unreachable: {message}")]
    Connectivity { target: String, message: String },

    /// Server major version differs from the one the tooling supports
    #[error("Database major version mismatch: expected {expected}, server reports {found}")]
    VersionMismatch { expected: u32, found: String },

    /// pg_dump failed or produced an unusable file
    #[error("Dump failed: {0}")]
    Dump(String),

    /// An external client tool exited unsuccessfully
    #[error("{program} failed: {message}")]
    Tool { program: String, message: String },

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Remote copy does not match the local snapshot
    #[error("Verification failed for {key}")]
    Verification { key: String },

    /// A restore stage failed; the restore process cannot continue
    #[error("Restore failed during {stage}: {source}")]
    RestoreStage {
        stage: RestoreStage,
        #[source]
        source: Box<Error>,
    },

    /// Database driver error
    #[error("Database error: {0}")]
    Database(String),

    /// The scheduler can no longer run backups
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap this error as the failure of a restore stage.
    pub fn at_stage(self, stage: RestoreStage) -> Self {
        Error::RestoreStage {
            stage,
            source: Box::new(self),
        }
    }
}

/// Object store errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Upload failed
    #[error("Upload of {key} failed: {message}")]
    Upload { key: String, message: String },

    /// Download failed
    #[error("Download of {key} failed: {message}")]
    Download { key: String, message: String },

    /// Delete failed
    #[error("Delete of {key} failed: {message}")]
    Delete { key: String, message: String },

    /// Bucket check or creation failed
    #[error("Bucket {bucket}: {message}")]
    Bucket { bucket: String, message: String },

    /// Storage backend error
    #[error("Backend error: {0}")]
    Backend(String),
}
