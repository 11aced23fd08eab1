//! Task execution engine.
//!
//! This module provides the execution infrastructure for running DAGs: the
//! retrying executor, the worker pool, the interaction bridge, the
//! scheduler loop that ties them together, and the built-in task bodies.

mod bridge;
mod command;
mod executor;
mod pool;
mod prompt;
mod respondent;
mod scheduler;

pub use bridge::{
    BridgeConfig, BridgeError, CompletionHandle, DEFAULT_QUEUE_CAPACITY, InteractionBridge,
    InteractionPrompt, InteractionRequest, Resolution,
};
pub use command::{CommandTask, CommandTaskBuilder};
pub use executor::{TaskExecutor, TaskResult};
pub use pool::{Completion, WorkerPool};
pub use prompt::PromptTask;
pub use respondent::{Respondent, StdinRespondent, render_payload};
pub use scheduler::{FailurePolicy, RunReport, Scheduler, SchedulerConfig, SchedulerError};
