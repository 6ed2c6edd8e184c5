//! PostgreSQL client tool invocation.
//!
//! `pg_dump`, `pg_restore` and `psql` are always spawned with an argument
//! vector, never through a shell, and the password reaches them only through
//! the child's `PGPASSWORD` environment variable so it never shows up in the
//! process list.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::snapshot::DumpFormat;
use crate::Result;

/// A fully specified external tool invocation
#[derive(Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for the child; values are treated as secrets
    pub env: Vec<(String, String)>,
}

impl fmt::Debug for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_names: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ToolInvocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env_names)
            .finish()
    }
}

impl ToolInvocation {
    fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn connect(mut self, db: &DatabaseConfig, dbname: &str) -> Self {
        self.args.extend([
            "--host".to_string(),
            db.host.clone(),
            "--port".to_string(),
            db.port.to_string(),
            "--username".to_string(),
            db.user.clone(),
            "--dbname".to_string(),
            dbname.to_string(),
            "--no-password".to_string(),
        ]);
        self.env
            .push(("PGPASSWORD".to_string(), db.password.clone()));
        self
    }

    /// `pg_dump --version`
    pub fn pg_dump_version() -> Self {
        Self::new("pg_dump").arg("--version")
    }

    /// Dump the configured database into `output`
    pub fn pg_dump(db: &DatabaseConfig, format: DumpFormat, output: &Path) -> Self {
        Self::new("pg_dump")
            .connect(db, &db.database)
            .arg("--format")
            .arg(format.pg_dump_flag())
            .arg("--file")
            .arg(output.display().to_string())
    }

    /// List the table of contents of a custom-format archive
    pub fn pg_restore_list(archive: &Path) -> Self {
        Self::new("pg_restore")
            .arg("--list")
            .arg(archive.display().to_string())
    }

    /// Restore a custom-format archive into the configured database
    pub fn pg_restore(db: &DatabaseConfig, archive: &Path) -> Self {
        Self::new("pg_restore")
            .connect(db, &db.database)
            .arg(archive.display().to_string())
    }

    /// Replay a plain SQL dump into the configured database
    pub fn psql_file(db: &DatabaseConfig, script: &Path) -> Self {
        Self::new("psql")
            .connect(db, &db.database)
            .arg("--set")
            .arg("ON_ERROR_STOP=1")
            .arg("--file")
            .arg(script.display().to_string())
    }
}

/// Captured result of a finished tool
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Best available diagnostic: stderr, else stdout, else the exit code
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("exited with status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Trait for running external tools
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run to completion. `Err` means the tool could not be run at all; a
    /// non-zero exit is reported through [`ToolOutput::success`].
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput>;
}

/// Runs tools as child processes
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        debug!("Running {:?}", invocation);

        // kill_on_drop: an aborted run must not leave an orphaned pg_dump
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(ToolOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
