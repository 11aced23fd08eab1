//! Lifecycle events and event handling.
//!
//! The scheduler and executor emit events at every state change of a run,
//! so callers can observe progress without polling task records.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::{DagId, RunId, TaskId};

/// Lifecycle events emitted during a run.
#[derive(Debug, Clone)]
pub enum Event {
    /// A DAG run has started.
    RunStarted {
        run_id: RunId,
        dag_id: DagId,
        task_count: usize,
        timestamp: Instant,
    },

    /// An attempt of a task body has started. Emitted once per attempt.
    TaskStarted {
        task_id: TaskId,
        dag_id: DagId,
        /// 1-indexed attempt number.
        attempt: u32,
        timestamp: Instant,
    },

    /// A task body failed and will be retried after `delay`.
    TaskRetrying {
        task_id: TaskId,
        dag_id: DagId,
        /// The attempt that just failed (1-indexed).
        attempt: u32,
        /// Total attempts allowed, including the first.
        max_attempts: u32,
        delay: Duration,
        timestamp: Instant,
    },

    /// A task body succeeded and the task was handed to the respondent.
    InteractionRequested {
        task_id: TaskId,
        dag_id: DagId,
        timestamp: Instant,
    },

    /// A task reached `Done`.
    TaskCompleted {
        task_id: TaskId,
        dag_id: DagId,
        duration: Duration,
        attempts: u32,
        timestamp: Instant,
    },

    /// A task reached `Failed`.
    TaskFailed {
        task_id: TaskId,
        dag_id: DagId,
        error: String,
        /// Zero when the task never ran.
        attempts: u32,
        timestamp: Instant,
    },

    /// Every task of a run is resolved.
    RunCompleted {
        run_id: RunId,
        dag_id: DagId,
        success: bool,
        duration: Duration,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::RunStarted { timestamp, .. }
            | Event::TaskStarted { timestamp, .. }
            | Event::TaskRetrying { timestamp, .. }
            | Event::InteractionRequested { timestamp, .. }
            | Event::TaskCompleted { timestamp, .. }
            | Event::TaskFailed { timestamp, .. }
            | Event::RunCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// The task this event is about, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Event::TaskStarted { task_id, .. }
            | Event::TaskRetrying { task_id, .. }
            | Event::InteractionRequested { task_id, .. }
            | Event::TaskCompleted { task_id, .. }
            | Event::TaskFailed { task_id, .. } => Some(task_id),
            Event::RunStarted { .. } | Event::RunCompleted { .. } => None,
        }
    }

    pub fn run_started(run_id: RunId, dag_id: DagId, task_count: usize) -> Self {
        Event::RunStarted {
            run_id,
            dag_id,
            task_count,
            timestamp: Instant::now(),
        }
    }

    pub fn task_started(task_id: TaskId, dag_id: DagId, attempt: u32) -> Self {
        Event::TaskStarted {
            task_id,
            dag_id,
            attempt,
            timestamp: Instant::now(),
        }
    }

    pub fn task_retrying(
        task_id: TaskId,
        dag_id: DagId,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    ) -> Self {
        Event::TaskRetrying {
            task_id,
            dag_id,
            attempt,
            max_attempts,
            delay,
            timestamp: Instant::now(),
        }
    }

    pub fn interaction_requested(task_id: TaskId, dag_id: DagId) -> Self {
        Event::InteractionRequested {
            task_id,
            dag_id,
            timestamp: Instant::now(),
        }
    }

    pub fn task_completed(
        task_id: TaskId,
        dag_id: DagId,
        duration: Duration,
        attempts: u32,
    ) -> Self {
        Event::TaskCompleted {
            task_id,
            dag_id,
            duration,
            attempts,
            timestamp: Instant::now(),
        }
    }

    pub fn task_failed(task_id: TaskId, dag_id: DagId, error: String, attempts: u32) -> Self {
        Event::TaskFailed {
            task_id,
            dag_id,
            error,
            attempts,
            timestamp: Instant::now(),
        }
    }

    pub fn run_completed(run_id: RunId, dag_id: DagId, success: bool, duration: Duration) -> Self {
        Event::RunCompleted {
            run_id,
            dag_id,
            success,
            duration,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers, in registration order.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
