//! Configuration structures for backup and restore operations.
//!
//! Configuration is read once from environment variables (the variable names
//! match the ones operators already set for the container image) and is then
//! immutable for the lifetime of the process. Every component receives the
//! slice of configuration it needs by reference or clone; there is no global
//! client state.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::backup::CronSchedule;
use crate::restore::RestoreRequest;
use crate::snapshot::DumpFormat;
use crate::{Error, Result};

const REQUIRED_VARS: &[&str] = &[
    "POSTGRES_HOST",
    "POSTGRES_PORT",
    "POSTGRES_USER",
    "POSTGRES_PASSWORD",
    "POSTGRES_DB",
    "AWS_REGION",
    "S3_ENDPOINT",
    "S3_BUCKET",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
];

const REDACTED: &str = "***";

/// Shorter passwords are only scrubbed where they stand as a whole token
const MIN_SUBSTRING_REDACTION: usize = 4;

/// Main configuration structure
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Database to back up or restore into
    pub database: DatabaseConfig,

    /// Object store holding the snapshots
    pub storage: ObjectStoreConfig,

    /// Backup-specific options
    pub backup: BackupOptions,

    /// Restore-specific options
    pub restore: RestoreOptions,
}

/// PostgreSQL connection parameters
#[derive(Clone, Serialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip)]
    pub password: String,
    pub database: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &REDACTED)
            .field("database", &self.database)
            .finish()
    }
}

impl DatabaseConfig {
    /// Scrub the password out of diagnostic text before it is logged or
    /// wrapped in an error.
    ///
    /// Very short passwords would match inside ordinary words, so those are
    /// replaced only where they are not flanked by alphanumerics.
    pub fn redact(&self, text: &str) -> String {
        let password = self.password.as_str();
        if password.is_empty() {
            return text.to_string();
        }
        if password.chars().count() >= MIN_SUBSTRING_REDACTION {
            return text.replace(password, REDACTED);
        }

        let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
        let mut redacted = String::with_capacity(text.len());
        let mut copied = 0;
        for (start, matched) in text.match_indices(password) {
            let end = start + matched.len();
            if is_word(text[..start].chars().next_back()) || is_word(text[end..].chars().next()) {
                continue;
            }
            redacted.push_str(&text[copied..start]);
            redacted.push_str(REDACTED);
            copied = end;
        }
        redacted.push_str(&text[copied..]);
        redacted
    }

    /// Database used to issue DROP/CREATE for the target, so the
    /// connection issuing the drop is never the database being dropped.
    pub fn admin_database(&self) -> &str {
        if self.database == "postgres" {
            "template1"
        } else {
            "postgres"
        }
    }
}

/// S3-compatible object store parameters
#[derive(Clone, Serialize)]
pub struct ObjectStoreConfig {
    /// Endpoint URL (MinIO, Ceph RGW, AWS)
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    /// Prepended verbatim to snapshot file names
    pub prefix: String,
    pub access_key_id: String,
    #[serde(skip)]
    pub secret_access_key: String,
}

impl fmt::Debug for ObjectStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &REDACTED)
            .finish()
    }
}

impl ObjectStoreConfig {
    /// Remote key for a snapshot file name
    pub fn key_for(&self, file_name: &str) -> String {
        format!("{}{}", self.prefix, file_name)
    }

    /// Plain-HTTP endpoints are common for local MinIO deployments
    pub fn allow_http(&self) -> bool {
        self.endpoint.starts_with("http://")
    }
}

/// How long remote snapshots are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    /// Maximum snapshot age in days; 0 disables pruning
    pub retention_days: u32,
}

impl RetentionPolicy {
    pub fn is_enabled(&self) -> bool {
        self.retention_days > 0
    }
}

/// Backup-specific options
#[derive(Debug, Clone, Serialize)]
pub struct BackupOptions {
    /// Recurring trigger, evaluated in UTC (default: daily at midnight)
    pub schedule: CronSchedule,

    pub retention: RetentionPolicy,

    /// Delay before the startup run (default: 60s)
    pub startup_delay: Duration,

    /// pg_dump output format (default: custom archive)
    pub dump_format: DumpFormat,

    /// Directory for local snapshot files (default: /tmp)
    pub work_dir: PathBuf,

    /// Keep the local file when a cycle fails after the dump (default: true)
    pub keep_failed_artifacts: bool,

    /// Time an in-flight run gets to finish after shutdown is requested
    pub shutdown_grace: Duration,

    /// Required server major version; detected from pg_dump when unset
    pub expected_major_version: Option<u32>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            schedule: CronSchedule::daily_at_midnight(),
            retention: RetentionPolicy::default(),
            startup_delay: default_startup_delay(),
            dump_format: DumpFormat::default(),
            work_dir: default_work_dir(),
            keep_failed_artifacts: true,
            shutdown_grace: default_shutdown_grace(),
            expected_major_version: None,
        }
    }
}

fn default_startup_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

/// Restore-specific options
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreOptions {
    /// Snapshot file name to restore, relative to the storage prefix
    pub restore_file: Option<String>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Empty values count as missing. All missing required variables are
    /// reported in a single error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let missing: Vec<&str> = REQUIRED_VARS
            .iter()
            .copied()
            .filter(|name| get(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "Missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let required = |name: &str| get(name).unwrap_or_default();

        let port = parse_var::<u16>("POSTGRES_PORT", &required("POSTGRES_PORT"))?;

        let database = DatabaseConfig {
            host: required("POSTGRES_HOST"),
            port,
            user: required("POSTGRES_USER"),
            password: required("POSTGRES_PASSWORD"),
            database: required("POSTGRES_DB"),
        };

        let storage = ObjectStoreConfig {
            endpoint: required("S3_ENDPOINT"),
            region: required("AWS_REGION"),
            bucket: required("S3_BUCKET"),
            prefix: get("S3_PREFIX").unwrap_or_default(),
            access_key_id: required("AWS_ACCESS_KEY_ID"),
            secret_access_key: required("AWS_SECRET_ACCESS_KEY"),
        };

        let mut backup = BackupOptions::default();
        if let Some(expr) = get("BACKUP_SCHEDULE") {
            backup.schedule = CronSchedule::parse(&expr)?;
        }
        if let Some(days) = get("BACKUP_RETENTION_DAYS") {
            backup.retention.retention_days = parse_var("BACKUP_RETENTION_DAYS", &days)?;
        }
        if let Some(secs) = get("BACKUP_STARTUP_DELAY_SECS") {
            backup.startup_delay =
                Duration::from_secs(parse_var("BACKUP_STARTUP_DELAY_SECS", &secs)?);
        }
        if let Some(format) = get("BACKUP_DUMP_FORMAT") {
            backup.dump_format = format.parse()?;
        }
        if let Some(dir) = get("BACKUP_WORK_DIR") {
            backup.work_dir = PathBuf::from(dir);
        }
        if let Some(keep) = get("BACKUP_KEEP_FAILED_ARTIFACTS") {
            backup.keep_failed_artifacts = parse_bool("BACKUP_KEEP_FAILED_ARTIFACTS", &keep)?;
        }
        if let Some(secs) = get("BACKUP_SHUTDOWN_GRACE_SECS") {
            backup.shutdown_grace =
                Duration::from_secs(parse_var("BACKUP_SHUTDOWN_GRACE_SECS", &secs)?);
        }
        if let Some(major) = get("POSTGRES_MAJOR_VERSION") {
            backup.expected_major_version = Some(parse_var("POSTGRES_MAJOR_VERSION", &major)?);
        }

        let restore = RestoreOptions {
            restore_file: get("S3_RESTORE_FILE"),
        };

        Ok(Self {
            database,
            storage,
            backup,
            restore,
        })
    }

    /// Build the restore request, preferring an explicit file name over
    /// `S3_RESTORE_FILE`. The storage prefix is prepended to the name.
    pub fn restore_request(&self, file_override: Option<&str>) -> Result<RestoreRequest> {
        let file = file_override
            .filter(|f| !f.trim().is_empty())
            .or(self.restore.restore_file.as_deref())
            .ok_or_else(|| {
                Error::Config("Missing required environment variables: S3_RESTORE_FILE".to_string())
            })?;

        Ok(RestoreRequest {
            remote_key: self.storage.key_for(file),
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: {:?}", name, value)))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "Invalid value for {}: {:?}",
            name, value
        ))),
    }
}
