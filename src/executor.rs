//! External command execution
//!
//! Every probe and every corrective action goes through [`CommandExecutor`],
//! so tests can swap the shell out for a scripted mock.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Default per-command timeout
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to spawn command: {0}")]
    Spawn(String),

    #[error("command exited with status {code:?}: {output}")]
    Failed { code: Option<i32>, output: String },
}

impl CommandError {
    /// Fire-and-forget commands only count as failed when they never ran or hung.
    /// A non-zero exit still means the command was delivered.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, CommandError::Timeout(_) | CommandError::Spawn(_))
    }
}

/// Runs a command line and returns its captured output.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &str, timeout: Duration) -> Result<String, CommandError>;
}

/// Executes command lines through `sh -c`.
#[derive(Debug, Default, Clone)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(&self, command: &str, limit: Duration) -> Result<String, CommandError> {
        trace!("exec: {}", command);

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output();

        let output = match timeout(limit, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(CommandError::Spawn(e.to_string())),
            Err(_) => {
                debug!("Command timed out after {:?}: {}", limit, command);
                return Err(CommandError::Timeout(limit));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stderr.trim().is_empty() {
            stdout.to_string()
        } else {
            format!("{stdout}\n{stderr}")
        };

        if output.status.success() {
            Ok(combined)
        } else {
            Err(CommandError::Failed {
                code: output.status.code(),
                output: combined,
            })
        }
    }
}

/// Telephony engine CLI (`asterisk -rx "<command>"`) on top of an executor.
#[derive(Clone)]
pub struct EngineCli {
    executor: Arc<dyn CommandExecutor>,
    binary: String,
    timeout: Duration,
}

impl EngineCli {
    pub fn new(executor: Arc<dyn CommandExecutor>, binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            executor,
            binary: binary.into(),
            timeout,
        }
    }

    /// Build the shell command line for an engine CLI command
    pub fn command_line(&self, command: &str) -> String {
        format!("{} -rx \"{}\"", self.binary, command)
    }

    /// Run an engine CLI command
    pub async fn rx(&self, command: &str) -> Result<String, CommandError> {
        self.executor.run(&self.command_line(command), self.timeout).await
    }

    /// Run an arbitrary shell command with the same timeout
    pub async fn shell(&self, command: &str) -> Result<String, CommandError> {
        self.executor.run(command, self.timeout).await
    }
}
