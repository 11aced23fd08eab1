//! Task execution context.
//!
//! Each dispatched task receives a [`TaskContext`] holding its identity, the
//! current attempt number, and the results of upstream dependencies that
//! finished `Done`. Upstream results are snapshotted at dispatch time, so
//! the context is read-only and cheap to clone between retry attempts.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::types::{DagId, TaskId};

/// Errors that can occur when reading from the context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// No upstream result was recorded for this task.
    #[error("no upstream result for task: {0}")]
    UpstreamNotFound(TaskId),

    /// Failed to deserialize an upstream result.
    #[error("deserialization error for upstream '{task}': {message}")]
    DeserializationError { task: TaskId, message: String },
}

/// Read-only view handed to a task body.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    dag_id: DagId,
    attempt: u32,
    upstream: Arc<HashMap<TaskId, Value>>,
}

impl TaskContext {
    /// Create a context for the first attempt of a task.
    ///
    /// # Arguments
    /// * `task_id` - ID of the task being executed
    /// * `dag_id` - ID of the DAG the task belongs to
    /// * `upstream` - Results of dependencies that finished `Done`
    pub fn new(task_id: TaskId, dag_id: DagId, upstream: HashMap<TaskId, Value>) -> Self {
        Self {
            task_id,
            dag_id,
            attempt: 1,
            upstream: Arc::new(upstream),
        }
    }

    /// Context with no upstream results (roots, tests).
    pub fn root(task_id: impl Into<TaskId>, dag_id: impl Into<DagId>) -> Self {
        Self::new(task_id.into(), dag_id.into(), HashMap::new())
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn dag_id(&self) -> &DagId {
        &self.dag_id
    }

    /// Current attempt number, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    /// Raw result of an upstream task, if it finished `Done`.
    pub fn upstream(&self, task: &str) -> Option<&Value> {
        self.upstream.get(&TaskId::new(task))
    }

    /// Deserialize the result of an upstream task.
    pub fn get<T: DeserializeOwned>(&self, task: &str) -> Result<T, ContextError> {
        let id = TaskId::new(task);
        let value = self
            .upstream
            .get(&id)
            .ok_or_else(|| ContextError::UpstreamNotFound(id.clone()))?;
        serde_json::from_value(value.clone()).map_err(|e| ContextError::DeserializationError {
            task: id,
            message: e.to_string(),
        })
    }

    /// Iterate over all upstream results.
    pub fn upstream_results(&self) -> impl Iterator<Item = (&TaskId, &Value)> {
        self.upstream.iter()
    }
}
