//! External command task implementation.
//!
//! [`CommandTask`] wraps shell commands and external executables so they can
//! be used as tasks in a DAG. The task's result is a JSON object with the
//! captured output:
//!
//! ```json
//! { "stdout": "...", "stderr": "...", "exit_code": 0 }
//! ```
//!
//! Failure modes:
//!
//! - **Non-zero exit code**: [`TaskError::CommandFailed`] with the exit code
//!   and stderr output
//! - **Timeout**: [`TaskError::Timeout`] (transient, can retry)
//! - **Spawn failure**: [`TaskError::ExecutionFailed`], e.g. program not found
//!
//! ```rust
//! use handoff::{CommandTask, RetryPolicy};
//! use std::time::Duration;
//!
//! let fetch = CommandTask::builder("curl")
//!     .name("fetch_listings")
//!     .args(["-s", "https://cars.example.com/listings"])
//!     .timeout(Duration::from_secs(30))
//!     .retry_policy(RetryPolicy::fixed(3, Duration::from_secs(5)))
//!     .build();
//! ```

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::context::TaskContext;
use crate::core::retry::RetryPolicy;
use crate::core::task::{Task, TaskError};

/// A task that executes an external command.
#[derive(Debug, Clone)]
pub struct CommandTask {
    name: String,
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    retry_policy: Option<RetryPolicy>,
    timeout: Option<Duration>,
}

impl CommandTask {
    /// Create a new builder for a command task.
    pub fn builder(program: impl Into<String>) -> CommandTaskBuilder {
        CommandTaskBuilder::new(program)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl Task for CommandTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &TaskContext) -> Result<Value, TaskError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        let output = match self.timeout {
            Some(duration) => timeout(duration, cmd.output())
                .await
                .map_err(|_| TaskError::Timeout(duration))?
                .map_err(|e| TaskError::ExecutionFailed(e.to_string()))?,
            None => cmd
                .output()
                .await
                .map_err(|e| TaskError::ExecutionFailed(e.to_string()))?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        // Killed by a signal.
        let code = output.status.code().unwrap_or(-1);

        if output.status.success() {
            Ok(json!({
                "stdout": stdout,
                "stderr": stderr,
                "exit_code": code,
            }))
        } else {
            Err(TaskError::CommandFailed { code, stderr })
        }
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry_policy.clone()
    }

    fn description(&self) -> Option<&str> {
        Some(&self.program)
    }
}

/// Builder for creating `CommandTask` instances.
#[derive(Debug, Clone)]
pub struct CommandTaskBuilder {
    name: Option<String>,
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    retry_policy: Option<RetryPolicy>,
    timeout: Option<Duration>,
}

impl CommandTaskBuilder {
    /// Create a new builder with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            name: None,
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            retry_policy: None,
            timeout: None,
        }
    }

    /// Set the task name. Defaults to the program.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
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

    /// Add a single environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Override the scheduler's retry policy for this task.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Bound each attempt. The child process is killed on timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn build(self) -> CommandTask {
        let name = self.name.unwrap_or_else(|| self.program.clone());
        CommandTask {
            name,
            program: self.program,
            args: self.args,
            env: self.env,
            working_dir: self.working_dir,
            retry_policy: self.retry_policy,
            timeout: self.timeout,
        }
    }
}
