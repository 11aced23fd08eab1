//! Bounded pool of concurrently running task bodies.
//!
//! The pool admits any number of dispatched tasks but lets at most `size`
//! bodies run at once. Completions are collected in a `JoinSet`, so the
//! scheduler can wait for whichever in-flight task finishes first instead of
//! waiting for a whole batch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info_span};

use crate::core::context::TaskContext;
use crate::core::task::{Task, TaskError};
use crate::core::types::TaskId;

use super::executor::{TaskExecutor, TaskResult};

/// A finished task body, successful or not.
#[derive(Debug)]
pub struct Completion {
    /// Outcome of the body after retries.
    pub result: TaskResult,
    /// When the body acquired a worker slot.
    pub started_at: Instant,
    /// When the last attempt returned.
    pub finished_at: Instant,
}

impl Completion {
    pub fn task_id(&self) -> &TaskId {
        &self.result.task_id
    }
}

/// Fixed-size executor for task bodies.
pub struct WorkerPool {
    size: usize,
    executor: Arc<TaskExecutor>,
    semaphore: Arc<Semaphore>,
    in_flight: JoinSet<Completion>,
}

impl WorkerPool {
    /// Create a pool running at most `size` bodies at once (minimum 1).
    pub fn new(size: usize, executor: Arc<TaskExecutor>) -> Self {
        let size = size.max(1);
        Self {
            size,
            executor,
            semaphore: Arc::new(Semaphore::new(size)),
            in_flight: JoinSet::new(),
        }
    }

    /// Maximum number of bodies running at once.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of dispatched tasks that have not been collected yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Start a task body. It runs as soon as a worker slot frees up.
    pub fn dispatch(&mut self, task: Arc<dyn Task>, mut ctx: TaskContext) {
        let executor = Arc::clone(&self.executor);
        let semaphore = Arc::clone(&self.semaphore);
        let task_id = TaskId::new(task.name());
        let span = info_span!("worker", task = %task_id, dag = %ctx.dag_id());

        self.in_flight.spawn(
            async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let now = Instant::now();
                        return Completion {
                            result: TaskResult::failure(
                                task_id,
                                0,
                                now.elapsed(),
                                TaskError::ExecutionFailed("worker pool closed".into()),
                            ),
                            started_at: now,
                            finished_at: now,
                        };
                    }
                };

                let started_at = Instant::now();
                let attempts = Arc::new(AtomicU32::new(0));
                // The body runs in its own task so a panic is reported as a
                // failed completion instead of being lost with the join.
                let body = {
                    let attempts = Arc::clone(&attempts);
                    tokio::spawn(
                        async move {
                            executor
                                .execute_counted(task.as_ref(), &mut ctx, &attempts)
                                .await
                        }
                        .in_current_span(),
                    )
                };
                let result = match body.await {
                    Ok(result) => result,
                    Err(join_err) => {
                        let attempts = attempts.load(Ordering::SeqCst).max(1);
                        error!(task = %task_id, attempts, error = %join_err, "task body panicked");
                        TaskResult::failure(
                            task_id,
                            attempts,
                            started_at.elapsed(),
                            TaskError::Panicked(join_err.to_string()),
                        )
                    }
                };

                Completion {
                    result,
                    started_at,
                    finished_at: Instant::now(),
                }
            }
            .instrument(span),
        );
    }

    /// Wait for the next in-flight task to finish.
    ///
    /// Returns `None` when nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        loop {
            match self.in_flight.join_next().await? {
                Ok(completion) => return Some(completion),
                Err(join_err) => {
                    error!(error = %join_err, "worker task aborted");
                }
            }
        }
    }

}
