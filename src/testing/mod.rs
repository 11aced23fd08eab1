//! Testing utilities for users of the handoff library.
//!
//! This module provides helpers for testing DAG runs:
//!
//! - [`StaticTask`]: returns a fixed value, optionally after a delay
//! - [`FailingTask`]: fails N times then succeeds
//! - [`ScriptedRespondent`]: answers interactions from a script
//! - [`GatedRespondent`]: holds each interaction until the test releases it
//! - [`RecordingHandler`]: captures emitted events
//! - [`TestHarness`]: runs DAGs with a scheduler and bridge in one call

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};

use crate::core::context::TaskContext;
use crate::core::dag::Dag;
use crate::core::retry::RetryPolicy;
use crate::core::task::{Task, TaskError, TaskKind};
use crate::core::types::TaskId;
use crate::events::{Event, EventBus, EventHandler};
use crate::execution::{
    FailurePolicy, InteractionPrompt, Respondent, RunReport, Scheduler, SchedulerConfig,
    SchedulerError,
};

enum Output {
    Fixed(Value),
    EchoUpstream,
}

/// A task that returns a fixed value.
///
/// # Example
///
/// ```
/// use handoff::testing::StaticTask;
/// use serde_json::json;
/// use std::time::Duration;
///
/// let search = StaticTask::automated("search", json!("Web Result"))
///     .with_delay(Duration::from_millis(50));
/// let ask = StaticTask::interaction("ask", json!("What type of car do you want?"));
/// ```
pub struct StaticTask {
    name: String,
    kind: TaskKind,
    output: Output,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl StaticTask {
    /// An automated task whose result is `value`.
    pub fn automated(name: impl Into<String>, value: Value) -> Self {
        Self::with_kind(name, TaskKind::Automated, Output::Fixed(value))
    }

    /// An interaction task that presents `payload` to the respondent.
    pub fn interaction(name: impl Into<String>, payload: Value) -> Self {
        Self::with_kind(name, TaskKind::InteractionRequired, Output::Fixed(payload))
    }

    /// An automated task whose result is an object of its upstream results.
    pub fn echo_upstream(name: impl Into<String>) -> Self {
        Self::with_kind(name, TaskKind::Automated, Output::EchoUpstream)
    }

    fn with_kind(name: impl Into<String>, kind: TaskKind, output: Output) -> Self {
        Self {
            name: name.into(),
            kind,
            output,
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Sleep before returning.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times the body ran.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Task for StaticTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Value, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.output {
            Output::Fixed(value) => Ok(value.clone()),
            Output::EchoUpstream => {
                let results: Map<String, Value> = ctx
                    .upstream_results()
                    .map(|(id, value)| (id.as_str().to_string(), value.clone()))
                    .collect();
                Ok(Value::Object(results))
            }
        }
    }

    fn kind(&self) -> TaskKind {
        self.kind
    }
}

/// A task that fails a configurable number of times before succeeding.
///
/// Useful for testing retry logic and error handling. Failure counting is
/// protected by a mutex, so the task behaves deterministically when shared.
///
/// # Example
///
/// ```
/// use handoff::testing::FailingTask;
///
/// // Fails 2 times, then succeeds on the 3rd attempt
/// let task = FailingTask::new("flaky_task", 2);
/// ```
pub struct FailingTask {
    name: String,
    state: Mutex<FailingTaskState>,
    error_message: String,
    transient: bool,
    kind: TaskKind,
    retry_policy: Option<RetryPolicy>,
}

struct FailingTaskState {
    failures_remaining: u32,
    call_count: u32,
}

impl FailingTask {
    /// Create a task that fails `fail_count` times then succeeds.
    pub fn new(name: impl Into<String>, fail_count: u32) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(FailingTaskState {
                failures_remaining: fail_count,
                call_count: 0,
            }),
            error_message: "intentional test failure".to_string(),
            transient: false,
            kind: TaskKind::Automated,
            retry_policy: None,
        }
    }

    /// Create a task that never succeeds.
    pub fn always(name: impl Into<String>) -> Self {
        Self::new(name, u32::MAX)
    }

    /// Fail with a custom error message.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    /// Fail with [`TaskError::Transient`] instead of `ExecutionFailed`.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Present the success value to the respondent.
    pub fn interaction(mut self) -> Self {
        self.kind = TaskKind::InteractionRequired;
        self
    }

    /// Set a retry policy for this task.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Get the number of times this task has been called.
    pub async fn call_count(&self) -> u32 {
        self.state.lock().await.call_count
    }

    /// Get the number of failures remaining before success.
    pub async fn failures_remaining(&self) -> u32 {
        self.state.lock().await.failures_remaining
    }
}

#[async_trait]
impl Task for FailingTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &TaskContext) -> Result<Value, TaskError> {
        let mut state = self.state.lock().await;
        state.call_count += 1;

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            if self.transient {
                Err(TaskError::Transient(self.error_message.clone()))
            } else {
                Err(TaskError::ExecutionFailed(self.error_message.clone()))
            }
        } else {
            Ok(json!({ "succeeded_on_call": state.call_count }))
        }
    }

    fn kind(&self) -> TaskKind {
        self.kind
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry_policy.clone()
    }
}

/// A respondent that answers from a fixed script.
///
/// A task with no scripted answer fails with
/// [`TaskError::InteractionUnavailable`].
#[derive(Default)]
pub struct ScriptedRespondent {
    answers: HashMap<String, (Value, Option<Duration>)>,
    presented: StdMutex<Vec<InteractionPrompt>>,
}

impl ScriptedRespondent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `task` with `value` immediately.
    pub fn answer(mut self, task: &str, value: Value) -> Self {
        self.answers.insert(task.to_string(), (value, None));
        self
    }

    /// Answer `task` with `value` after `delay`.
    pub fn answer_after(mut self, task: &str, value: Value, delay: Duration) -> Self {
        self.answers.insert(task.to_string(), (value, Some(delay)));
        self
    }

    /// Prompts presented so far, in presentation order.
    pub fn presented(&self) -> Vec<InteractionPrompt> {
        self.presented
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Respondent for ScriptedRespondent {
    async fn respond(&self, prompt: &InteractionPrompt) -> Result<Value, TaskError> {
        self.presented
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.clone());

        let Some((value, delay)) = self.answers.get(prompt.task_id.as_str()) else {
            return Err(TaskError::InteractionUnavailable(format!(
                "no scripted answer for {}",
                prompt.task_id
            )));
        };
        if let Some(delay) = delay {
            tokio::time::sleep(*delay).await;
        }
        Ok(value.clone())
    }
}

/// A respondent that blocks each interaction until the test releases it.
///
/// Answers may be released before or after the prompt is presented.
pub struct GatedRespondent {
    released: watch::Sender<HashMap<String, Value>>,
    presented: watch::Sender<Vec<InteractionPrompt>>,
}

impl GatedRespondent {
    pub fn new() -> Self {
        Self {
            released: watch::Sender::new(HashMap::new()),
            presented: watch::Sender::new(Vec::new()),
        }
    }

    /// Make `value` the answer for `task`.
    pub fn release(&self, task: &str, value: Value) {
        self.released.send_modify(|answers| {
            answers.insert(task.to_string(), value);
        });
    }

    /// Prompts presented so far, in presentation order.
    pub fn presented(&self) -> Vec<InteractionPrompt> {
        self.presented.borrow().clone()
    }

    /// Wait until at least `count` prompts have been presented.
    pub async fn wait_presented(&self, count: usize) {
        let mut rx = self.presented.subscribe();
        // The sender lives in self, so the channel cannot close here.
        let _ = rx.wait_for(|prompts| prompts.len() >= count).await;
    }
}

impl Default for GatedRespondent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Respondent for GatedRespondent {
    async fn respond(&self, prompt: &InteractionPrompt) -> Result<Value, TaskError> {
        self.presented.send_modify(|prompts| prompts.push(prompt.clone()));

        let key = prompt.task_id.as_str();
        let mut rx = self.released.subscribe();
        let answers = rx
            .wait_for(|answers| answers.contains_key(key))
            .await
            .map_err(|e| TaskError::InteractionUnavailable(e.to_string()))?;
        answers
            .get(key)
            .cloned()
            .ok_or_else(|| TaskError::InteractionUnavailable(format!("no answer for {}", key)))
    }
}

/// Event handler that records every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All events received so far, in emission order.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Events about one task.
    pub async fn task_events(&self, task: &str) -> Vec<Event> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.task_id().is_some_and(|id| id.as_str() == task))
            .cloned()
            .collect()
    }

    /// Tasks in the order they reached `Done` or `Failed`.
    pub async fn terminal_order(&self) -> Vec<TaskId> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::TaskCompleted { task_id, .. } | Event::TaskFailed { task_id, .. } => {
                    Some(task_id.clone())
                }
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// Runs DAGs with a scheduler and an interaction bridge in one call.
///
/// Retries default to millisecond backoff so tests stay fast.
///
/// # Example
///
/// ```ignore
/// use handoff::testing::{ScriptedRespondent, TestHarness};
/// use std::sync::Arc;
///
/// let harness = TestHarness::new()
///     .with_respondent(Arc::new(ScriptedRespondent::new().answer("ask", json!("a wagon"))));
///
/// let report = harness.execute_and_assert_success(&dag).await;
/// assert_eq!(report.result("ask"), Some(&json!("a wagon")));
/// ```
pub struct TestHarness {
    config: SchedulerConfig,
    respondent: Arc<dyn Respondent>,
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default().with_retry(RetryPolicy::exponential(
                3,
                Duration::from_millis(1),
                Duration::from_millis(10),
            )),
            respondent: Arc::new(ScriptedRespondent::new()),
            handlers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.config = self.config.with_pool_size(pool_size);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.config = self.config.with_retry(policy);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config = self.config.with_failure_policy(policy);
        self
    }

    pub fn with_interaction_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_interaction_timeout(Some(timeout));
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.with_queue_capacity(capacity);
        self
    }

    pub fn with_respondent(mut self, respondent: Arc<dyn Respondent>) -> Self {
        self.respondent = respondent;
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Run a DAG to completion and shut the bridge down.
    pub async fn execute(&self, dag: &Dag) -> Result<RunReport, SchedulerError> {
        let mut scheduler = Scheduler::new(self.config.clone());
        if !self.handlers.is_empty() {
            let bus = Arc::new(EventBus::new());
            for handler in &self.handlers {
                bus.register(Arc::clone(handler)).await;
            }
            scheduler = scheduler.with_event_bus(bus);
        }

        let bridge = scheduler.spawn_bridge(Arc::clone(&self.respondent));
        let report = scheduler.run(dag, &bridge).await;
        bridge.shutdown().await;
        report
    }

    /// Execute and assert every task ended `Done`.
    pub async fn execute_and_assert_success(&self, dag: &Dag) -> RunReport {
        let report = self.execute(dag).await.expect("scheduler run aborted");
        assert!(
            report.is_success(),
            "Expected DAG to succeed, but it failed. Failed tasks: {:?}",
            report.failed_tasks()
        );
        report
    }

    /// Execute and assert at least one task ended `Failed`.
    pub async fn execute_and_assert_failure(&self, dag: &Dag) -> RunReport {
        let report = self.execute(dag).await.expect("scheduler run aborted");
        assert!(
            !report.is_success(),
            "Expected DAG to fail, but it succeeded"
        );
        report
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
