//! Task trait and error types.
//!
//! The `Task` trait is the unit of work the scheduler runs. Task bodies are
//! opaque: they may call any collaborator service and return any JSON
//! payload. A task declares through [`Task::kind`] whether its result must
//! be confirmed by an external respondent before it counts as finished.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::context::{ContextError, TaskContext};
use super::retry::RetryPolicy;
use super::types::TaskId;

/// Errors that can occur during task execution.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A transient error that may succeed on retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// Task timed out.
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    /// External command failed with exit code.
    #[error("command exited with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    /// Error reading upstream results.
    #[error("context error: {0}")]
    Context(#[from] ContextError),

    /// The external respondent did not answer in time.
    #[error("no response from respondent after {0:?}")]
    InteractionTimeout(Duration),

    /// The interaction bridge could not take or finish the request.
    #[error("interaction unavailable: {0}")]
    InteractionUnavailable(String),

    /// A dependency failed and the run fails its dependents.
    #[error("upstream task failed: {0}")]
    UpstreamFailed(TaskId),

    /// The task body panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl TaskError {
    /// Check if this error is considered transient (should trigger retry).
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskError::Transient(_) | TaskError::Timeout(_))
    }
}

/// Whether a task finishes on its own or needs an external response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// The body's result is final.
    #[default]
    Automated,
    /// The body's result is presented to the respondent, whose answer
    /// becomes the final result.
    InteractionRequired,
}

impl TaskKind {
    pub fn requires_interaction(&self) -> bool {
        matches!(self, TaskKind::InteractionRequired)
    }
}

/// The core trait for defining executable tasks.
///
/// Tasks may be executed more than once when a retry policy applies, so a
/// body must be safe to rerun from the start after a failure.
///
/// # Example
///
/// ```ignore
/// use handoff::{Task, TaskContext, TaskError};
/// use async_trait::async_trait;
/// use serde_json::{Value, json};
///
/// struct LookupSafetyRating;
///
/// #[async_trait]
/// impl Task for LookupSafetyRating {
///     fn name(&self) -> &str {
///         "safety_rating"
///     }
///
///     async fn execute(&self, ctx: &TaskContext) -> Result<Value, TaskError> {
///         let model: String = ctx.get("pick_model")?;
///         Ok(json!({ "model": model, "stars": 5 }))
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync {
    /// Returns the unique name/identifier for this task.
    fn name(&self) -> &str;

    /// Execute the task body once.
    ///
    /// # Returns
    /// * `Ok(Value)` - The result, or for interaction tasks the payload to
    ///   present to the respondent
    /// * `Err(TaskError)` - Task failed
    async fn execute(&self, ctx: &TaskContext) -> Result<Value, TaskError>;

    /// Whether this task needs an external response to finish.
    fn kind(&self) -> TaskKind {
        TaskKind::Automated
    }

    /// Per-task retry policy. `None` uses the scheduler's default.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    /// Optional description for display/logging purposes.
    fn description(&self) -> Option<&str> {
        None
    }
}
