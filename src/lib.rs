//! handoff - a DAG task scheduler with a serialized hand-off queue.
//!
//! Tasks run on a bounded worker pool as soon as their dependencies finish.
//! Tasks that need an external answer are queued on an
//! [`InteractionBridge`], whose single consumer presents them to a
//! [`Respondent`] one at a time while automated work keeps running.

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod testing;

pub use config::{ConfigError, Workflow, WorkflowBuilder, WorkflowConfig, YamlLoader};
pub use core::context::{ContextError, TaskContext};
pub use core::dag::{Dag, DagBuilder, DagError, TaskNode};
pub use core::retry::{RetryCondition, RetryPolicy};
pub use core::state::{TaskRecord, TaskState};
pub use core::task::{Task, TaskError, TaskKind};
pub use core::types::{DagId, RunId, TaskId};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{
    BridgeConfig, BridgeError, CommandTask, CommandTaskBuilder, CompletionHandle,
    FailurePolicy, InteractionBridge, InteractionPrompt, InteractionRequest, PromptTask,
    Respondent, RunReport, Scheduler, SchedulerConfig, SchedulerError, StdinRespondent,
    TaskExecutor, TaskResult, WorkerPool,
};
