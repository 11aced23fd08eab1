//! Hand-off queue for tasks that need an external response.
//!
//! The [`InteractionBridge`] owns a bounded FIFO queue and exactly one
//! consumer task. Producers submit [`InteractionRequest`]s; the consumer
//! presents each one to the [`Respondent`] in arrival order, waits for the
//! answer (optionally bounded by a timeout) and reports it through the
//! request's [`CompletionHandle`]. Waiting on the respondent blocks only the
//! consumer, never the worker pool or the scheduler loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::core::task::TaskError;
use crate::core::types::{DagId, TaskId};

use super::respondent::Respondent;

/// Default number of requests the queue holds before producers wait.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Errors returned when handing a request to the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The consumer is gone; the request was resolved as unavailable.
    #[error("interaction bridge is closed, cannot accept task: {0}")]
    Closed(TaskId),
    /// The consumer is gone and no slot can be reserved.
    #[error("interaction bridge is closed")]
    Disconnected,
}

/// What the respondent is shown.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionPrompt {
    pub task_id: TaskId,
    pub dag_id: DagId,
    /// The result of the task body, e.g. a question for the operator.
    pub payload: Value,
}

/// The respondent's answer for one task.
#[derive(Debug)]
pub struct Resolution {
    pub task_id: TaskId,
    pub outcome: Result<Value, TaskError>,
}

/// Completion callback carried by every request.
///
/// Resolving the handle reports back to the scheduler that submitted the
/// request. A handle dropped without being resolved reports
/// [`TaskError::InteractionUnavailable`], so a torn-down consumer never
/// leaves a task waiting forever.
#[derive(Debug)]
pub struct CompletionHandle {
    task_id: TaskId,
    tx: Option<mpsc::UnboundedSender<Resolution>>,
}

impl CompletionHandle {
    pub fn new(task_id: TaskId, tx: mpsc::UnboundedSender<Resolution>) -> Self {
        Self {
            task_id,
            tx: Some(tx),
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Report the outcome for this task.
    pub fn resolve(mut self, outcome: Result<Value, TaskError>) {
        self.send(outcome);
    }

    fn send(&mut self, outcome: Result<Value, TaskError>) {
        if let Some(tx) = self.tx.take() {
            let resolution = Resolution {
                task_id: self.task_id.clone(),
                outcome,
            };
            if tx.send(resolution).is_err() {
                debug!(task = %self.task_id, "resolution dropped, scheduler run already ended");
            }
        }
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.send(Err(TaskError::InteractionUnavailable(
                "request dropped before a response arrived".into(),
            )));
        }
    }
}

/// A queued hand-off for one `AwaitingInteraction` task.
#[derive(Debug)]
pub struct InteractionRequest {
    pub prompt: InteractionPrompt,
    pub completion: CompletionHandle,
}

/// Bridge settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Queue capacity (minimum 1).
    pub capacity: usize,
    /// How long to wait for each response. `None` waits indefinitely.
    pub response_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            response_timeout: None,
        }
    }
}

/// FIFO hand-off queue with a single dedicated consumer.
pub struct InteractionBridge {
    tx: mpsc::Sender<InteractionRequest>,
    consumer: JoinHandle<()>,
    config: BridgeConfig,
}

impl InteractionBridge {
    /// Start the consumer task. Must be called from within a tokio runtime.
    pub fn spawn(respondent: Arc<dyn Respondent>, config: BridgeConfig) -> Self {
        let capacity = config.capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let consumer = tokio::spawn(
            consume(rx, respondent, config.response_timeout)
                .instrument(info_span!("interaction_consumer")),
        );

        Self {
            tx,
            consumer,
            config,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Number of requests waiting in the queue (not counting the one being
    /// answered).
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Wait until the queue has room for one more request.
    ///
    /// The returned permit holds the slot until a request is sent through
    /// it, so a caller can wait for capacity alongside other work and hand
    /// over the request only once the slot is certain.
    pub async fn reserve(&self) -> Result<mpsc::Permit<'_, InteractionRequest>, BridgeError> {
        self.tx.reserve().await.map_err(|_| BridgeError::Disconnected)
    }

    /// Enqueue a request, waiting for room if the queue is full.
    ///
    /// If the consumer is gone the request's handle resolves as unavailable
    /// and [`BridgeError::Closed`] is returned.
    pub async fn submit(&self, request: InteractionRequest) -> Result<(), BridgeError> {
        let task_id = request.prompt.task_id.clone();
        debug!(task = %task_id, queued = self.queued(), "enqueueing interaction");
        self.tx
            .send(request)
            .await
            .map_err(|_| BridgeError::Closed(task_id))
    }

    /// Stop accepting requests, let the consumer drain the queue and wait
    /// for it to exit.
    pub async fn shutdown(self) {
        let Self { tx, consumer, .. } = self;
        drop(tx);
        if let Err(e) = consumer.await {
            error!(error = %e, "interaction consumer ended abnormally");
        }
    }
}

async fn consume(
    mut rx: mpsc::Receiver<InteractionRequest>,
    respondent: Arc<dyn Respondent>,
    response_timeout: Option<Duration>,
) {
    while let Some(request) = rx.recv().await {
        let InteractionRequest { prompt, completion } = request;
        info!(task = %prompt.task_id, dag = %prompt.dag_id, "presenting interaction");

        // Answered in a child task so a panicking respondent fails this
        // request only.
        let answer = {
            let respondent = Arc::clone(&respondent);
            let prompt = prompt.clone();
            tokio::spawn(async move { respondent.respond(&prompt).await }.in_current_span())
        };

        let outcome = match response_timeout {
            Some(limit) => {
                let abort = answer.abort_handle();
                match tokio::time::timeout(limit, answer).await {
                    Ok(joined) => flatten(joined),
                    Err(_) => {
                        abort.abort();
                        warn!(
                            task = %prompt.task_id,
                            timeout_ms = limit.as_millis() as u64,
                            "respondent timed out"
                        );
                        Err(TaskError::InteractionTimeout(limit))
                    }
                }
            }
            None => flatten(answer.await),
        };

        if let Err(e) = &outcome {
            warn!(task = %prompt.task_id, error = %e, "interaction failed");
        } else {
            debug!(task = %prompt.task_id, "interaction answered");
        }
        completion.resolve(outcome);
    }
    debug!("interaction queue closed, consumer exiting");
}

fn flatten(
    joined: Result<Result<Value, TaskError>, tokio::task::JoinError>,
) -> Result<Value, TaskError> {
    joined.unwrap_or_else(|e| {
        Err(TaskError::InteractionUnavailable(format!(
            "respondent failed: {}",
            e
        )))
    })
}
