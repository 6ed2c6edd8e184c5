//! Test helper utilities.
//!
//! Scripted stand-ins for the external tools and the database, plus a
//! configuration builder pointing at a scratch directory.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

use pg_backup_core::snapshot::snapshot_file_name;
use pg_backup_core::{
    Config, DatabaseAdmin, Error, MemoryGateway, Result, ToolInvocation, ToolOutput, ToolRunner,
};

/// Password used by [`test_config`]; must never leak into errors
pub const PASSWORD: &str = "hunter2";

/// Header of a custom-format archive followed by some filler
pub const CUSTOM_DUMP: &[u8] = b"PGDMP\x01\x0e\x00\x04\x08\x08\x01\x01\x00\x00\x00\x00";

/// Start of a plain SQL dump
pub const PLAIN_DUMP: &[u8] = b"--\n-- PostgreSQL database dump\n--\nSELECT 1;\n";

/// Configuration with a scratch work dir, `db/` prefix and 7-day retention
pub fn test_config(work_dir: &Path) -> Config {
    let work_dir = work_dir.display().to_string();
    let env: HashMap<&str, &str> = HashMap::from([
        ("POSTGRES_HOST", "db.internal"),
        ("POSTGRES_PORT", "5432"),
        ("POSTGRES_USER", "backup"),
        ("POSTGRES_PASSWORD", PASSWORD),
        ("POSTGRES_DB", "app"),
        ("AWS_REGION", "us-east-1"),
        ("S3_ENDPOINT", "http://localhost:9000"),
        ("S3_BUCKET", "pg-backups"),
        ("AWS_ACCESS_KEY_ID", "minioadmin"),
        ("AWS_SECRET_ACCESS_KEY", "minioadmin"),
        ("S3_PREFIX", "db/"),
        ("BACKUP_RETENTION_DAYS", "7"),
        ("BACKUP_STARTUP_DELAY_SECS", "0"),
        ("BACKUP_WORK_DIR", work_dir.as_str()),
    ]);
    Config::from_lookup(|name| env.get(name).map(|v| v.to_string())).unwrap()
}

/// Store a snapshot under `prefix` that is `age` old
pub async fn seed_snapshot(gateway: &MemoryGateway, prefix: &str, age: TimeDelta) -> String {
    let created_at: DateTime<Utc> = Utc::now() - age;
    let key = format!("{}{}", prefix, snapshot_file_name(&created_at));
    gateway.put_bytes(&key, CUSTOM_DUMP).await.unwrap();
    key
}

/// Tool runner that answers from a script instead of spawning processes
pub struct ScriptedRunner {
    dump_bytes: Vec<u8>,
    dump_stderr: Option<String>,
    version: String,
    list_succeeds: bool,
    restore_stderr: Option<String>,
    invocations: Mutex<Vec<ToolInvocation>>,
}

impl ScriptedRunner {
    /// Dumps a small custom archive; every tool succeeds
    pub fn new() -> Self {
        Self {
            dump_bytes: CUSTOM_DUMP.to_vec(),
            dump_stderr: None,
            version: "pg_dump (PostgreSQL) 16.2\n".to_string(),
            list_succeeds: true,
            restore_stderr: None,
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_dump_bytes(mut self, bytes: &[u8]) -> Self {
        self.dump_bytes = bytes.to_vec();
        self
    }

    /// pg_dump exits non-zero with `stderr`
    pub fn failing_dump(mut self, stderr: &str) -> Self {
        self.dump_stderr = Some(stderr.to_string());
        self
    }

    /// `pg_restore --list` rejects the archive
    pub fn failing_list(mut self) -> Self {
        self.list_succeeds = false;
        self
    }

    /// pg_restore and psql exit non-zero with `stderr`
    pub fn failing_restore(mut self, stderr: &str) -> Self {
        self.restore_stderr = Some(stderr.to_string());
        self
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().clone()
    }

    /// `program` plus the first argument, e.g. `pg_restore --list`
    pub fn commands(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .map(|i| match i.args.first() {
                Some(first) if first.starts_with("--") && first != "--host" => {
                    format!("{} {}", i.program, first)
                }
                _ => i.program.clone(),
            })
            .collect()
    }

    fn ok(stdout: &str) -> ToolOutput {
        ToolOutput {
            success: true,
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn failed(stderr: &str) -> ToolOutput {
        ToolOutput {
            success: false,
            exit_code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        self.invocations.lock().push(invocation.clone());
        let has = |flag: &str| invocation.args.iter().any(|a| a == flag);

        match invocation.program.as_str() {
            "pg_dump" if has("--version") => Ok(Self::ok(&self.version)),
            "pg_dump" => {
                let output = invocation
                    .args
                    .iter()
                    .position(|a| a == "--file")
                    .and_then(|i| invocation.args.get(i + 1))
                    .ok_or_else(|| Error::Dump("no --file argument".to_string()))?;
                tokio::fs::write(output, &self.dump_bytes).await?;

                match &self.dump_stderr {
                    Some(stderr) => Ok(Self::failed(stderr)),
                    None => Ok(Self::ok("")),
                }
            }
            "pg_restore" if has("--list") => {
                if self.list_succeeds {
                    Ok(Self::ok(";\n; Archive created at 2024-01-01\n"))
                } else {
                    Ok(Self::failed("pg_restore: error: could not read input file"))
                }
            }
            "pg_restore" | "psql" => match &self.restore_stderr {
                Some(stderr) => Ok(Self::failed(stderr)),
                None => Ok(Self::ok("")),
            },
            other => Err(Error::Tool {
                program: other.to_string(),
                message: "not scripted".to_string(),
            }),
        }
    }
}

/// Database admin that records calls instead of connecting
pub struct RecordingAdmin {
    reachable: bool,
    target_exists: bool,
    version: String,
    recreate_fails: bool,
    calls: Mutex<Vec<String>>,
}

impl RecordingAdmin {
    /// Reachable PostgreSQL 16 server
    pub fn new() -> Self {
        Self {
            reachable: true,
            target_exists: true,
            version: "16.2 (Debian 16.2-1.pgdg120+2)".to_string(),
            recreate_fails: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Server is up but the target database has not been created
    pub fn missing_target(mut self) -> Self {
        self.target_exists = false;
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn failing_recreate(mut self) -> Self {
        self.recreate_fails = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: &str) -> Result<()> {
        self.calls.lock().push(call.to_string());
        if self.reachable {
            Ok(())
        } else {
            Err(Error::Database("connection refused".to_string()))
        }
    }

    fn record_on_target(&self, call: &str) -> Result<()> {
        self.record(call)?;
        if self.target_exists {
            Ok(())
        } else {
            Err(Error::Database(
                "database \"app\" does not exist".to_string(),
            ))
        }
    }
}

impl Default for RecordingAdmin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseAdmin for RecordingAdmin {
    async fn ping(&self) -> Result<()> {
        self.record_on_target("ping")
    }

    async fn ping_admin(&self) -> Result<()> {
        self.record("ping_admin")
    }

    async fn server_version(&self) -> Result<String> {
        self.record_on_target("server_version")?;
        Ok(self.version.clone())
    }

    async fn recreate_database(&self) -> Result<()> {
        self.record("recreate_database")?;
        if self.recreate_fails {
            return Err(Error::Database(
                "database \"app\" is being accessed by other users".to_string(),
            ));
        }
        Ok(())
    }
}
