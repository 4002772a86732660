//! Command execution abstraction for hostprep.
//!
//! This module provides:
//! - [`CommandSpec`]: Specification for commands to execute
//! - [`ExecutionResult`]: Result of command execution
//! - [`CommandExecutor`]: Trait for command execution strategies
//! - [`RealCommandExecutor`]: Production implementation using `std::process::Command`
//! - [`execute_checked`]: Runs a spec and turns a non-zero exit into
//!   [`ProvisionError::ExternalTool`]

mod pipe;
mod real;

use std::fmt;
use std::process::ExitStatus;

use anyhow::Result;

use crate::error::ProvisionError;

pub use real::RealCommandExecutor;

const REDACTED: &str = "<redacted>";

/// Specification for a command to be executed
#[derive(Clone)]
pub struct CommandSpec {
    /// The command to execute (e.g., "apt-get")
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Environment variables to set (in addition to inherited environment)
    pub env: Vec<(String, String)>,
    /// Data written to the child's stdin, if any
    pub stdin: Option<String>,
    /// Collect stdout into [`ExecutionResult::stdout`] instead of logging it
    pub capture_stdout: bool,
    /// Arguments carry secrets and must never be logged
    pub sensitive: bool,
}

impl CommandSpec {
    /// Creates a new CommandSpec with command and args
    #[must_use]
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            stdin: None,
            capture_stdout: false,
            sensitive: false,
        }
    }

    /// Adds an environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feeds the given data to the command's stdin
    #[must_use]
    pub fn with_stdin(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Captures stdout instead of streaming it to the log
    #[must_use]
    pub fn capturing_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    /// Marks the arguments as secret
    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Returns true if this spec invokes `command` with `args` as a prefix.
    ///
    /// Used by recording executors in tests to match calls.
    pub fn matches(&self, command: &str, args: &[&str]) -> bool {
        self.command == command
            && self.args.len() >= args.len()
            && self.args.iter().zip(args).all(|(a, b)| a == b)
    }
}

impl fmt::Display for CommandSpec {
    /// Renders the command line, replacing arguments with `<redacted>` for
    /// sensitive specs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command)?;
        if self.sensitive {
            if !self.args.is_empty() {
                write!(f, " {}", REDACTED)?;
            }
            return Ok(());
        }
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<&str> = if self.sensitive {
            vec![REDACTED]
        } else {
            self.args.iter().map(String::as_str).collect()
        };
        f.debug_struct("CommandSpec")
            .field("command", &self.command)
            .field("args", &args)
            .field("env", &self.env)
            .field("stdin", &self.stdin.as_ref().map(|_| REDACTED))
            .field("capture_stdout", &self.capture_stdout)
            .finish()
    }
}

/// Result of command execution
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Exit status of the command (None in dry-run mode)
    pub status: Option<ExitStatus>,
    /// Captured stdout when [`CommandSpec::capture_stdout`] was set
    pub stdout: Option<String>,
}

impl ExecutionResult {
    /// Returns true if the command executed successfully.
    ///
    /// In dry-run mode (status is None), this always returns true.
    pub fn success(&self) -> bool {
        self.status.is_none_or(|s| s.success())
    }

    /// Returns the exit code if available
    pub fn code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    /// Returns true if the command was not actually run.
    pub fn is_dry_run(&self) -> bool {
        self.status.is_none()
    }
}

/// Trait for command execution.
///
/// Implementations must be `Send + Sync` so an executor can be shared as
/// `Arc<dyn CommandExecutor>` between the orchestrator and its steps.
pub trait CommandExecutor: Send + Sync {
    /// Executes a command with the given specification.
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult>;
}

/// Executes `spec` and fails with [`ProvisionError::ExternalTool`] on a
/// non-zero exit status.
///
/// Spawn failures from the executor are passed through unchanged.
pub fn execute_checked(executor: &dyn CommandExecutor, spec: &CommandSpec) -> Result<ExecutionResult> {
    let result = executor.execute(spec)?;
    if !result.success() {
        let status = result
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown status".to_string());
        return Err(ProvisionError::ExternalTool {
            command: spec.to_string(),
            status,
        }
        .into());
    }
    Ok(result)
}
