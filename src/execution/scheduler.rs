//! DAG scheduler.
//!
//! The [`Scheduler`] drives one DAG to completion with Kahn-style
//! incremental topological execution:
//!
//! 1. Tasks with no dependencies start `Ready`.
//! 2. Every ready task is dispatched to the [`WorkerPool`].
//! 3. The loop sleeps until the first of the in-flight bodies finishes or
//!    the [`InteractionBridge`] resolves a request.
//! 4. Automated completions close their task immediately; successful
//!    interaction-required bodies are handed to the bridge and close when
//!    the respondent answers.
//! 5. Closing a task decrements its dependents' in-degree; a dependent
//!    reaching zero becomes `Ready`.
//!
//! All readiness bookkeeping lives in the loop itself. Workers and the
//! bridge consumer only send results back over channels.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::core::context::TaskContext;
use crate::core::dag::Dag;
use crate::core::retry::RetryPolicy;
use crate::core::state::{TaskRecord, TaskState};
use crate::core::task::TaskError;
use crate::core::types::{DagId, RunId, TaskId};
use crate::events::{Event, EventBus};

use super::bridge::{
    BridgeConfig, CompletionHandle, DEFAULT_QUEUE_CAPACITY, InteractionBridge, InteractionPrompt,
    InteractionRequest, Resolution,
};
use super::executor::{TaskExecutor, TaskResult};
use super::pool::{Completion, WorkerPool};
use super::respondent::Respondent;

/// What happens to the dependents of a task that ends `Failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// A failed task releases its dependents exactly like a successful one.
    #[default]
    ReleaseDependents,
    /// Every transitive dependent of a failed task is failed without running.
    FailDependents,
}

/// Construction-time settings for a scheduling run.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Maximum number of task bodies running at once.
    pub pool_size: usize,
    /// Retry policy for tasks that don't declare their own.
    pub retry: RetryPolicy,
    pub failure_policy: FailurePolicy,
    /// Per-request respondent timeout. `None` waits indefinitely.
    pub interaction_timeout: Option<Duration>,
    /// Capacity of the interaction queue.
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            retry: RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(10)),
            failure_policy: FailurePolicy::default(),
            interaction_timeout: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_interaction_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.interaction_timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Settings for the bridge paired with this scheduler.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            capacity: self.queue_capacity,
            response_timeout: self.interaction_timeout,
        }
    }
}

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Nothing is in flight or queued, yet some tasks never resolved.
    #[error("scheduler stalled with {} unresolved task(s): {unresolved:?}", unresolved.len())]
    Stalled { unresolved: Vec<TaskId> },
}

/// Final state of every task after a run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    pub dag_id: DagId,
    pub duration: Duration,
    records: HashMap<TaskId, TaskRecord>,
    order: Vec<TaskId>,
    completion_order: Vec<TaskId>,
}

impl RunReport {
    pub fn record(&self, task: &str) -> Option<&TaskRecord> {
        self.records.get(&TaskId::new(task))
    }

    pub fn state(&self, task: &str) -> Option<TaskState> {
        self.record(task).map(|r| r.state())
    }

    pub fn result(&self, task: &str) -> Option<&Value> {
        self.record(task).and_then(|r| r.result())
    }

    pub fn error(&self, task: &str) -> Option<&TaskError> {
        self.record(task).and_then(|r| r.error())
    }

    /// Records in DAG insertion order.
    pub fn records(&self) -> impl Iterator<Item = &TaskRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// Task IDs in the order they reached a terminal state.
    pub fn completion_order(&self) -> &[TaskId] {
        &self.completion_order
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether every task ended `Done`.
    pub fn is_success(&self) -> bool {
        self.records.values().all(|r| r.state() == TaskState::Done)
    }

    pub fn done_tasks(&self) -> Vec<TaskId> {
        self.tasks_in(TaskState::Done)
    }

    pub fn failed_tasks(&self) -> Vec<TaskId> {
        self.tasks_in(TaskState::Failed)
    }

    pub fn done_count(&self) -> usize {
        self.done_tasks().len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed_tasks().len()
    }

    fn tasks_in(&self, state: TaskState) -> Vec<TaskId> {
        self.records()
            .filter(|r| r.state() == state)
            .map(|r| r.id().clone())
            .collect()
    }
}

/// Readiness bookkeeping for one run. Owned by the scheduler loop.
struct RunState<'a> {
    dag: &'a Dag,
    policy: FailurePolicy,
    records: HashMap<TaskId, TaskRecord>,
    in_degree: HashMap<TaskId, usize>,
    ready: VecDeque<TaskId>,
    resolved: usize,
    completion_order: Vec<TaskId>,
}

impl<'a> RunState<'a> {
    fn new(dag: &'a Dag, policy: FailurePolicy) -> Self {
        let mut records = HashMap::with_capacity(dag.len());
        let mut in_degree = HashMap::with_capacity(dag.len());
        let mut ready = VecDeque::new();

        for id in dag.task_ids() {
            let kind = dag
                .get_task(id)
                .map(|node| node.task.kind())
                .unwrap_or_default();
            let mut record = TaskRecord::new(id.clone(), kind);
            let degree = dag.in_degree(id);
            if degree == 0 {
                record.mark_ready();
                ready.push_back(id.clone());
            }
            records.insert(id.clone(), record);
            in_degree.insert(id.clone(), degree);
        }

        Self {
            dag,
            policy,
            records,
            in_degree,
            ready,
            resolved: 0,
            completion_order: Vec::new(),
        }
    }

    fn is_resolved(&self) -> bool {
        self.resolved == self.records.len()
    }

    fn unresolved(&self) -> Vec<TaskId> {
        self.dag
            .task_ids()
            .iter()
            .filter(|id| {
                self.records
                    .get(*id)
                    .is_some_and(|r| !r.state().is_terminal())
            })
            .cloned()
            .collect()
    }

    fn next_ready(&mut self) -> Option<TaskId> {
        self.ready.pop_front()
    }

    fn record_mut(&mut self, id: &TaskId) -> Option<&mut TaskRecord> {
        self.records.get_mut(id)
    }

    fn record(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.records.get(id)
    }

    /// Results of the task's dependencies that ended `Done`.
    fn upstream_results(&self, id: &TaskId) -> HashMap<TaskId, Value> {
        self.dag
            .dependencies(id)
            .iter()
            .filter_map(|dep| {
                let value = self.records.get(dep)?.result()?;
                Some((dep.clone(), value.clone()))
            })
            .collect()
    }

    /// Close a task and release (or fail) its dependents.
    ///
    /// Returns the dependents that were failed as a consequence.
    fn settle(&mut self, id: &TaskId, outcome: Result<Value, TaskError>) -> Vec<TaskId> {
        let Some(record) = self.records.get_mut(id) else {
            return Vec::new();
        };
        if record.state().is_terminal() {
            return Vec::new();
        }

        let failed = outcome.is_err();
        match outcome {
            Ok(value) => record.complete(value),
            Err(err) => record.fail(err),
        }
        self.resolved += 1;
        self.completion_order.push(id.clone());

        let dag = self.dag;
        let mut cascaded = Vec::new();
        let mut closed = vec![(id.clone(), failed)];

        while let Some((upstream, upstream_failed)) = closed.pop() {
            for dependent in dag.dependents(&upstream) {
                let remaining = match self.in_degree.get_mut(dependent) {
                    Some(degree) => {
                        *degree = degree.saturating_sub(1);
                        *degree
                    }
                    None => continue,
                };
                let Some(record) = self.records.get_mut(dependent) else {
                    continue;
                };
                if record.state() != TaskState::Pending {
                    continue;
                }

                if upstream_failed && self.policy == FailurePolicy::FailDependents {
                    record.fail(TaskError::UpstreamFailed(upstream.clone()));
                    self.resolved += 1;
                    self.completion_order.push(dependent.clone());
                    cascaded.push(dependent.clone());
                    closed.push((dependent.clone(), true));
                } else if remaining == 0 {
                    record.mark_ready();
                    self.ready.push_back(dependent.clone());
                }
            }
        }

        cascaded
    }

    fn into_report(self, run_id: RunId, duration: Duration) -> RunReport {
        RunReport {
            run_id,
            dag_id: self.dag.id().clone(),
            duration,
            records: self.records,
            order: self.dag.task_ids().to_vec(),
            completion_order: self.completion_order,
        }
    }
}

/// Drives DAG runs over a worker pool and an injected interaction bridge.
pub struct Scheduler {
    config: SchedulerConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            event_bus: None,
        }
    }

    /// Emit lifecycle events on the given bus.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start a bridge configured from this scheduler's settings.
    pub fn spawn_bridge(&self, respondent: Arc<dyn Respondent>) -> InteractionBridge {
        InteractionBridge::spawn(respondent, self.config.bridge_config())
    }

    /// Run a DAG until every task is `Done` or `Failed`.
    ///
    /// Individual task failures never abort the run; they are captured on
    /// the task's record in the returned report.
    pub async fn run(
        &self,
        dag: &Dag,
        bridge: &InteractionBridge,
    ) -> Result<RunReport, SchedulerError> {
        let run_id = RunId::new();
        let span = info_span!(
            "dag_run",
            dag = %dag.id(),
            run = %run_id,
            task_count = dag.len(),
        );
        self.run_inner(dag, bridge, run_id).instrument(span).await
    }

    async fn run_inner(
        &self,
        dag: &Dag,
        bridge: &InteractionBridge,
        run_id: RunId,
    ) -> Result<RunReport, SchedulerError> {
        let dag_id = dag.id().clone();
        let start_time = Instant::now();
        info!(
            pool_size = self.config.pool_size,
            policy = ?self.config.failure_policy,
            "starting DAG run"
        );
        self.emit(Event::run_started(run_id, dag_id.clone(), dag.len()))
            .await;

        let mut executor = TaskExecutor::new(self.config.retry.clone());
        if let Some(bus) = &self.event_bus {
            executor = executor.with_event_bus(Arc::clone(bus));
        }
        let mut pool = WorkerPool::new(self.config.pool_size, Arc::new(executor));
        let (resolution_tx, mut resolutions) = mpsc::unbounded_channel::<Resolution>();
        let mut state = RunState::new(dag, self.config.failure_policy);
        // Hand-offs waiting for room in the bridge queue.
        let mut pending: VecDeque<InteractionRequest> = VecDeque::new();
        let mut awaiting = 0usize;

        loop {
            while let Some(task_id) = state.next_ready() {
                let Some(node) = dag.get_task(&task_id) else {
                    continue;
                };
                let ctx = TaskContext::new(
                    task_id.clone(),
                    dag_id.clone(),
                    state.upstream_results(&task_id),
                );
                if let Some(record) = state.record_mut(&task_id) {
                    record.mark_running();
                }
                debug!(task = %task_id, in_flight = pool.in_flight(), "dispatching task");
                pool.dispatch(Arc::clone(&node.task), ctx);
            }

            if state.is_resolved() {
                break;
            }

            if pool.in_flight() == 0 && awaiting == 0 {
                let unresolved = state.unresolved();
                error!(?unresolved, "no work in flight but tasks remain unresolved");
                return Err(SchedulerError::Stalled { unresolved });
            }

            tokio::select! {
                Some(completion) = pool.next_completion(), if pool.in_flight() > 0 => {
                    if let Some(request) = self
                        .on_completion(&mut state, completion, &resolution_tx)
                        .await
                    {
                        pending.push_back(request);
                        awaiting += 1;
                    }
                }
                Some(resolution) = resolutions.recv(), if awaiting > 0 => {
                    awaiting -= 1;
                    self.on_resolution(&mut state, resolution).await;
                }
                slot = bridge.reserve(), if !pending.is_empty() => match slot {
                    Ok(permit) => {
                        if let Some(request) = pending.pop_front() {
                            debug!(task = %request.prompt.task_id, "interaction enqueued");
                            permit.send(request);
                        }
                    }
                    Err(e) => {
                        // Dropped handles resolve their tasks as unavailable.
                        warn!(
                            error = %e,
                            dropped = pending.len(),
                            "interaction bridge refused requests"
                        );
                        pending.clear();
                    }
                },
                else => {}
            }
        }

        let duration = start_time.elapsed();
        let report = state.into_report(run_id, duration);
        let success = report.is_success();
        info!(
            success,
            done = report.done_count(),
            failed = report.failed_count(),
            duration_ms = duration.as_millis() as u64,
            "DAG run completed"
        );
        self.emit(Event::run_completed(run_id, dag_id, success, duration))
            .await;

        Ok(report)
    }

    /// Classify a finished body. Returns the hand-off to queue on the bridge
    /// if the task now awaits an interaction.
    async fn on_completion(
        &self,
        state: &mut RunState<'_>,
        completion: Completion,
        resolution_tx: &mpsc::UnboundedSender<Resolution>,
    ) -> Option<InteractionRequest> {
        let Completion {
            result, started_at, ..
        } = completion;
        let TaskResult {
            task_id,
            attempts,
            outcome,
            ..
        } = result;

        let Some(record) = state.record_mut(&task_id) else {
            warn!(task = %task_id, "completion for unknown task ignored");
            return None;
        };
        record.record_execution(attempts, started_at);
        let needs_interaction = record.kind().requires_interaction();

        match outcome {
            Ok(payload) if needs_interaction => {
                record.mark_awaiting();
                debug!(task = %task_id, "handing task to interaction bridge");
                self.emit(Event::interaction_requested(
                    task_id.clone(),
                    state.dag.id().clone(),
                ))
                .await;

                Some(InteractionRequest {
                    prompt: InteractionPrompt {
                        task_id: task_id.clone(),
                        dag_id: state.dag.id().clone(),
                        payload,
                    },
                    completion: CompletionHandle::new(task_id, resolution_tx.clone()),
                })
            }
            outcome => {
                self.close(state, &task_id, outcome).await;
                None
            }
        }
    }

    async fn on_resolution(&self, state: &mut RunState<'_>, resolution: Resolution) {
        let Resolution { task_id, outcome } = resolution;
        match state.record(&task_id).map(|r| r.state()) {
            Some(TaskState::AwaitingInteraction) => {
                self.close(state, &task_id, outcome).await;
            }
            other => {
                warn!(task = %task_id, state = ?other, "unexpected interaction resolution ignored");
            }
        }
    }

    /// Close a task, release its dependents, and report what changed.
    async fn close(
        &self,
        state: &mut RunState<'_>,
        task_id: &TaskId,
        outcome: Result<Value, TaskError>,
    ) {
        let cascaded = state.settle(task_id, outcome);
        let dag_id = state.dag.id().clone();

        if let Some(record) = state.record(task_id) {
            let duration = record
                .started_at()
                .map(|s| s.elapsed())
                .unwrap_or_default();
            match record.error() {
                None => {
                    debug!(task = %task_id, attempts = record.attempts(), "task done");
                    self.emit(Event::task_completed(
                        task_id.clone(),
                        dag_id.clone(),
                        duration,
                        record.attempts(),
                    ))
                    .await;
                }
                Some(err) => {
                    warn!(
                        task = %task_id,
                        attempts = record.attempts(),
                        error = %err,
                        "task failed"
                    );
                    self.emit(Event::task_failed(
                        task_id.clone(),
                        dag_id.clone(),
                        err.to_string(),
                        record.attempts(),
                    ))
                    .await;
                }
            }
        }

        for skipped in cascaded {
            warn!(task = %skipped, upstream = %task_id, "failing dependent of failed task");
            let error = state
                .record(&skipped)
                .and_then(|r| r.error())
                .map(|e| e.to_string())
                .unwrap_or_default();
            self.emit(Event::task_failed(skipped, dag_id.clone(), error, 0))
                .await;
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).await;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
