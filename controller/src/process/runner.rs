//! Process runner abstraction
//!
//! Every external tool the controller drives (git, kubeseal) goes through
//! [`ProcessRunner`], so tests can substitute scripted fakes.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::ControlError;

/// A command to execute
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,

    /// Arguments, passed verbatim
    pub args: Vec<String>,

    /// Working directory, inherited when unset
    pub current_dir: Option<PathBuf>,

    /// Extra environment variables on top of the inherited environment
    pub envs: Vec<(String, String)>,

    /// Directory prepended to `PATH` for executable lookup
    pub search_path: Option<PathBuf>,

    /// Kill the process if it runs longer than this
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn search_path(mut self, dir: Option<PathBuf>) -> Self {
        self.search_path = dir;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Position of an argument, if present
    pub fn arg_position(&self, arg: &str) -> Option<usize> {
        self.args.iter().position(|a| a == arg)
    }

    /// Value following a flag such as `--secret-file <path>`
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.arg_position(flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,

    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, for error reports
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{}\n{}", stdout, stderr),
        }
    }

    /// Turn a non-zero exit into a message describing the failure
    pub fn check(self, command: &CommandSpec) -> Result<ProcessOutput, String> {
        if self.success() {
            return Ok(self);
        }
        let code = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Err(format!(
            "`{}` exited with {}: {}",
            command,
            code,
            self.combined()
        ))
    }
}

/// Executes external commands
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run a command to completion, capturing stdout and stderr.
    ///
    /// A non-zero exit is not an error at this level; spawn failures and
    /// timeouts are.
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, ControlError>;
}

/// Runs commands on the host with tokio
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn augmented_path(extra: &PathBuf) -> Result<OsString, ControlError> {
        let current = std::env::var_os("PATH").unwrap_or_default();
        let paths = std::iter::once(extra.clone()).chain(std::env::split_paths(&current));
        std::env::join_paths(paths)
            .map_err(|e| ControlError::ProcessError(format!("Invalid search path: {}", e)))
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, ControlError> {
        debug!("Running: {}", command);

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &command.envs {
            cmd.env(key, value);
        }
        if let Some(extra) = &command.search_path {
            cmd.env("PATH", Self::augmented_path(extra)?);
        }

        let output = match command.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| {
                    ControlError::ProcessError(format!("`{}` timed out after {:?}", command, limit))
                })?,
            None => cmd.output().await,
        }
        .map_err(|e| ControlError::ProcessError(format!("Failed to run `{}`: {}", command, e)))?;

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}
