//! Per-task lifecycle state for a scheduling run.
//!
//! ```text
//! Pending -> Ready -> Running -> Done
//!                       |  \---> Failed
//!                       \-> AwaitingInteraction -> Done | Failed
//! ```
//!
//! A [`TaskRecord`] carries a result only when `Done` and an error only when
//! `Failed`. Records are owned and mutated by the scheduler loop alone.

use serde_json::Value;
use std::time::Instant;

use super::task::{TaskError, TaskKind};
use super::types::TaskId;

/// Lifecycle state of a task within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Waiting for dependencies to resolve.
    Pending,
    /// All dependencies resolved, not yet dispatched.
    Ready,
    /// Dispatched to the worker pool.
    Running,
    /// Body finished; waiting on the external respondent.
    AwaitingInteraction,
    /// Completed with a result.
    Done,
    /// Completed with an error.
    Failed,
}

impl TaskState {
    /// Whether the state is final (`Done` or `Failed`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }
}

/// Outcome and bookkeeping for a single task in a run.
#[derive(Debug)]
pub struct TaskRecord {
    id: TaskId,
    kind: TaskKind,
    state: TaskState,
    result: Option<Value>,
    error: Option<TaskError>,
    attempts: u32,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

impl TaskRecord {
    /// Create a record in the `Pending` state.
    pub fn new(id: TaskId, kind: TaskKind) -> Self {
        Self {
            id,
            kind,
            state: TaskState::Pending,
            result: None,
            error: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// The task's result, present iff the task is `Done`.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// The captured error, present iff the task is `Failed`.
    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    /// Number of times the task body was executed (0 if it never ran).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the body first acquired a worker.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// When the task reached a terminal state.
    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }

    pub(crate) fn mark_ready(&mut self) {
        self.state = TaskState::Ready;
    }

    pub(crate) fn mark_running(&mut self) {
        self.state = TaskState::Running;
    }

    pub(crate) fn record_execution(&mut self, attempts: u32, started_at: Instant) {
        self.attempts = attempts;
        self.started_at = Some(started_at);
    }

    /// The body finished; the task now waits on the respondent.
    pub(crate) fn mark_awaiting(&mut self) {
        self.state = TaskState::AwaitingInteraction;
    }

    pub(crate) fn complete(&mut self, result: Value) {
        self.state = TaskState::Done;
        self.result = Some(result);
        self.error = None;
        self.finished_at = Some(Instant::now());
    }

    pub(crate) fn fail(&mut self, error: TaskError) {
        self.state = TaskState::Failed;
        self.result = None;
        self.error = Some(error);
        self.finished_at = Some(Instant::now());
    }
}
