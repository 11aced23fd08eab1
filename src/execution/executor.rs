//! Task execution with retry.
//!
//! The `TaskExecutor` runs a single task body under a [`RetryPolicy`]:
//! - Reruns the whole body on failure while the policy allows it
//! - Waits an exponentially growing delay between attempts
//! - Reports the attempt count and the final outcome

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::core::context::TaskContext;
use crate::core::retry::RetryPolicy;
use crate::core::task::{Task, TaskError};
use crate::core::types::TaskId;
use crate::events::{Event, EventBus};

/// Result of executing a task.
#[derive(Debug)]
pub struct TaskResult {
    /// The task that was executed.
    pub task_id: TaskId,
    /// Number of attempts made (1 = first try, 2+ = retries).
    pub attempts: u32,
    /// Total duration of all attempts, including backoff.
    pub duration: Duration,
    /// The body's value, or the error of the last attempt.
    pub outcome: Result<Value, TaskError>,
}

impl TaskResult {
    /// Create a successful result.
    pub fn success(task_id: TaskId, attempts: u32, duration: Duration, value: Value) -> Self {
        Self {
            task_id,
            attempts,
            duration,
            outcome: Ok(value),
        }
    }

    /// Create a failed result.
    pub fn failure(task_id: TaskId, attempts: u32, duration: Duration, error: TaskError) -> Self {
        Self {
            task_id,
            attempts,
            duration,
            outcome: Err(error),
        }
    }

    /// Whether the task succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Executor for running tasks with retry logic.
pub struct TaskExecutor {
    /// Policy for tasks that don't declare their own.
    default_policy: RetryPolicy,
    event_bus: Option<Arc<EventBus>>,
}

impl TaskExecutor {
    /// Create a new executor with the given default retry policy.
    pub fn new(default_policy: RetryPolicy) -> Self {
        Self {
            default_policy,
            event_bus: None,
        }
    }

    /// Emit `TaskStarted`/`TaskRetrying` events on the given bus.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Execute a task with retry logic.
    ///
    /// Each attempt bumps the context's attempt counter before the body
    /// runs. When attempts are exhausted the last error is returned in the
    /// result's outcome.
    pub async fn execute(&self, task: &dyn Task, ctx: &mut TaskContext) -> TaskResult {
        self.execute_counted(task, ctx, &AtomicU32::new(0)).await
    }

    /// Like [`execute`](Self::execute), also storing the number of attempts
    /// started so far in `started`. The count survives a body that panics.
    pub async fn execute_counted(
        &self,
        task: &dyn Task,
        ctx: &mut TaskContext,
        started: &AtomicU32,
    ) -> TaskResult {
        let task_id = TaskId::new(task.name());
        let start_time = Instant::now();
        let policy = task
            .retry_policy()
            .unwrap_or_else(|| self.default_policy.clone());

        let mut attempts = 0u32;

        loop {
            attempts += 1;
            ctx.set_attempt(attempts);
            started.store(attempts, Ordering::SeqCst);

            if let Some(bus) = &self.event_bus {
                bus.emit(Event::task_started(
                    task_id.clone(),
                    ctx.dag_id().clone(),
                    attempts,
                ))
                .await;
            }

            match task.execute(ctx).await {
                Ok(value) => {
                    debug!(task = %task_id, attempts, "task body succeeded");
                    return TaskResult::success(task_id, attempts, start_time.elapsed(), value);
                }
                Err(err) => {
                    if !policy.should_retry(attempts, &err) {
                        warn!(
                            task = %task_id,
                            attempts,
                            error = %err,
                            "task body failed, not retrying"
                        );
                        return TaskResult::failure(task_id, attempts, start_time.elapsed(), err);
                    }

                    let delay = policy.delay_for(attempts);
                    warn!(
                        task = %task_id,
                        attempt = attempts,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "task body failed, retrying"
                    );

                    if let Some(bus) = &self.event_bus {
                        bus.emit(Event::task_retrying(
                            task_id.clone(),
                            ctx.dag_id().clone(),
                            attempts,
                            policy.max_attempts,
                            delay,
                        ))
                        .await;
                    }

                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
