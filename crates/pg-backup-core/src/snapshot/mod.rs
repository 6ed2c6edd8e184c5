//! Local snapshot production and verification.

mod naming;
mod producer;
mod verifier;

pub use naming::{
    parse_snapshot_file_name, parse_snapshot_key, snapshot_file_name, truncate_to_millis,
    SNAPSHOT_FILE_PREFIX, SNAPSHOT_FILE_SUFFIX,
};
pub use producer::SnapshotProducer;
pub use verifier::SnapshotVerifier;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::io::AsyncReadExt;

use crate::{Error, Result};

/// Leading bytes of a pg_dump custom-format archive
pub const CUSTOM_ARCHIVE_MAGIC: &[u8] = b"PGDMP";

/// pg_dump output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    /// Plain SQL script, restored with psql
    Plain,
    /// Compressed custom archive, restored with pg_restore
    #[default]
    Custom,
}

impl DumpFormat {
    /// Value for `pg_dump --format`
    pub fn pg_dump_flag(&self) -> &'static str {
        match self {
            DumpFormat::Plain => "plain",
            DumpFormat::Custom => "custom",
        }
    }

    /// Detect the format of a local dump from its header
    pub async fn detect(path: &Path) -> Result<Self> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut header = [0u8; 5];
        let mut filled = 0;
        while filled < header.len() {
            let n = file.read(&mut header[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if &header[..filled] == CUSTOM_ARCHIVE_MAGIC {
            Ok(DumpFormat::Custom)
        } else {
            Ok(DumpFormat::Plain)
        }
    }
}

impl fmt::Display for DumpFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pg_dump_flag())
    }
}

impl FromStr for DumpFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "p" => Ok(DumpFormat::Plain),
            "custom" | "c" => Ok(DumpFormat::Custom),
            other => Err(Error::Config(format!(
                "Unsupported dump format: {} (expected plain or custom)",
                other
            ))),
        }
    }
}

/// A point-in-time snapshot written to local disk and destined for the
/// object store.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotArtifact {
    /// Creation instant, millisecond precision
    pub created_at: DateTime<Utc>,
    /// `backup-<timestamp>.sql`
    pub file_name: String,
    pub local_path: PathBuf,
    /// Storage prefix followed by the file name
    pub remote_key: String,
    /// Populated once the dump has been written
    pub size_bytes: u64,
    pub format: DumpFormat,
}

impl SnapshotArtifact {
    /// Describe a snapshot that is about to be written into `dir`
    pub fn new(created_at: DateTime<Utc>, dir: &Path, prefix: &str, format: DumpFormat) -> Self {
        let created_at = truncate_to_millis(created_at);
        let file_name = snapshot_file_name(&created_at);
        Self {
            created_at,
            local_path: dir.join(&file_name),
            remote_key: format!("{}{}", prefix, file_name),
            file_name,
            size_bytes: 0,
            format,
        }
    }
}
