//! Scheduling integration tests.
//!
//! Tests liveness, ordering, concurrency, retries and failure policies of
//! runs made only of automated tasks.

use async_trait::async_trait;
use handoff::testing::{FailingTask, RecordingHandler, StaticTask, TestHarness};
use handoff::{
    DagBuilder, DagError, Event, FailurePolicy, RetryCondition, RetryPolicy, Task, TaskContext,
    TaskError, TaskState,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{assert_all_resolved, assert_dependencies_respected};

fn sleepy(name: &str, millis: u64) -> Arc<StaticTask> {
    Arc::new(StaticTask::automated(name, json!(name)).with_delay(Duration::from_millis(millis)))
}

struct PanickingTask;

#[async_trait]
impl Task for PanickingTask {
    fn name(&self) -> &str {
        "panics"
    }

    async fn execute(&self, _ctx: &TaskContext) -> Result<Value, TaskError> {
        panic!("lookup service exploded");
    }
}

#[tokio::test]
async fn test_every_task_resolves_in_wide_dag() {
    // Two layers of fan-out/fan-in with a failing task in the middle.
    let mut builder = DagBuilder::new("wide", "Wide").add_task(sleepy("root", 5));
    for i in 0..6 {
        let name = format!("mid_{}", i);
        builder = builder.add_task_with_deps(sleepy(&name, 10), &["root"]);
    }
    builder = builder.add_task_with_deps(Arc::new(FailingTask::always("broken")), &["root"]);
    let mids: Vec<String> = (0..6).map(|i| format!("mid_{}", i)).collect();
    let mut deps: Vec<&str> = mids.iter().map(String::as_str).collect();
    deps.push("broken");
    let dag = builder
        .add_task_with_deps(sleepy("sink", 5), &deps)
        .build()
        .unwrap();

    let report = TestHarness::new()
        .with_pool_size(2)
        .execute(&dag)
        .await
        .unwrap();

    assert_eq!(report.len(), 9);
    assert_all_resolved(&report);
    assert_dependencies_respected(&dag, &report);
    assert_eq!(report.failed_tasks().len(), 1);
    assert_eq!(report.state("sink"), Some(TaskState::Done));
}

#[tokio::test]
async fn test_cycle_rejected_before_scheduling() {
    let a = StaticTask::automated("a", json!(1));
    let b = StaticTask::automated("b", json!(2));
    let c = StaticTask::automated("c", json!(3));

    let result = DagBuilder::new("loop", "Loop")
        .add_task(Arc::new(a))
        .add_task_with_deps(Arc::new(b), &["a"])
        .add_task_with_deps(Arc::new(c), &["b"])
        .add_dependency("a", "c")
        .build();

    assert!(matches!(result, Err(DagError::CycleDetected(_))));
}

#[tokio::test]
async fn test_missing_dependency_rejected() {
    let result = DagBuilder::new("gap", "Gap")
        .add_task_with_deps(Arc::new(StaticTask::automated("a", json!(1))), &["ghost"])
        .build();

    assert!(matches!(result, Err(DagError::MissingDependency { .. })));
}

#[tokio::test]
async fn test_dependencies_finish_before_dependents_start() {
    let dag = DagBuilder::new("diamond", "Diamond")
        .add_task(sleepy("a", 20))
        .add_task_with_deps(sleepy("b", 30), &["a"])
        .add_task_with_deps(sleepy("c", 10), &["a"])
        .add_task_with_deps(sleepy("d", 5), &["b", "c"])
        .build()
        .unwrap();

    let report = TestHarness::new().execute_and_assert_success(&dag).await;

    assert_dependencies_respected(&dag, &report);
    assert_eq!(report.completion_order().first().unwrap().as_str(), "a");
    assert_eq!(report.completion_order().last().unwrap().as_str(), "d");
}

#[tokio::test]
async fn test_antichain_runs_concurrently() {
    let dag = DagBuilder::new("antichain", "Antichain")
        .add_task(sleepy("x", 150))
        .add_task(sleepy("y", 150))
        .add_task(sleepy("z", 150))
        .build()
        .unwrap();

    let report = TestHarness::new()
        .with_pool_size(3)
        .execute_and_assert_success(&dag)
        .await;

    let latest_start = report.records().filter_map(|r| r.started_at()).max().unwrap();
    let earliest_finish = report.records().filter_map(|r| r.finished_at()).min().unwrap();
    assert!(latest_start < earliest_finish, "run intervals do not overlap");
}

#[tokio::test]
async fn test_pool_of_one_serializes_bodies() {
    let dag = DagBuilder::new("serial", "Serial")
        .add_task(sleepy("x", 30))
        .add_task(sleepy("y", 30))
        .build()
        .unwrap();

    let report = TestHarness::new()
        .with_pool_size(1)
        .execute_and_assert_success(&dag)
        .await;

    let x = report.record("x").unwrap().started_at().unwrap();
    let y = report.record("y").unwrap().started_at().unwrap();
    let (first, second) = if x < y { (x, y) } else { (y, x) };
    assert!(second >= first + Duration::from_millis(30));
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let flaky = Arc::new(FailingTask::new("flaky", 2).transient());
    let dag = DagBuilder::new("retry", "Retry")
        .add_task(flaky.clone())
        .build()
        .unwrap();

    let report = TestHarness::new().execute_and_assert_success(&dag).await;

    let record = report.record("flaky").unwrap();
    assert_eq!(record.attempts(), 3);
    assert_eq!(record.result(), Some(&json!({ "succeeded_on_call": 3 })));
    assert_eq!(flaky.call_count().await, 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_and_stop_invoking() {
    let doomed = Arc::new(FailingTask::always("doomed").with_error("inventory offline"));
    let dag = DagBuilder::new("doomed", "Doomed")
        .add_task(doomed.clone())
        .build()
        .unwrap();

    let report = TestHarness::new().execute_and_assert_failure(&dag).await;

    let record = report.record("doomed").unwrap();
    assert_eq!(record.state(), TaskState::Failed);
    assert_eq!(record.attempts(), 3);
    assert!(record.result().is_none());
    assert_eq!(
        record.error().unwrap().to_string(),
        "execution failed: inventory offline"
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(doomed.call_count().await, 3);
}

#[tokio::test]
async fn test_transient_only_condition_skips_permanent_errors() {
    let permanent = Arc::new(FailingTask::new("permanent", 1));
    let dag = DagBuilder::new("cond", "Condition")
        .add_task(permanent.clone())
        .build()
        .unwrap();
    let policy = RetryPolicy::fixed(5, Duration::from_millis(1))
        .with_condition(RetryCondition::TransientOnly);

    let report = TestHarness::new()
        .with_retry(policy)
        .execute_and_assert_failure(&dag)
        .await;

    assert_eq!(report.record("permanent").unwrap().attempts(), 1);
    assert_eq!(permanent.call_count().await, 1);
}

#[tokio::test]
async fn test_task_policy_overrides_scheduler_default() {
    let task = Arc::new(
        FailingTask::new("custom", 4)
            .with_retry_policy(RetryPolicy::fixed(5, Duration::from_millis(1))),
    );
    let dag = DagBuilder::new("override", "Override")
        .add_task(task)
        .build()
        .unwrap();

    let report = TestHarness::new().execute_and_assert_success(&dag).await;

    assert_eq!(report.record("custom").unwrap().attempts(), 5);
}

#[tokio::test]
async fn test_retry_events_emitted_per_attempt() {
    let dag = DagBuilder::new("events", "Events")
        .add_task(Arc::new(FailingTask::new("flaky", 1)))
        .build()
        .unwrap();
    let handler = RecordingHandler::new();

    TestHarness::new()
        .with_event_handler(handler.clone())
        .execute_and_assert_success(&dag)
        .await;

    let events = handler.task_events("flaky").await;
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            Event::TaskStarted { .. } => "started",
            Event::TaskRetrying { .. } => "retrying",
            Event::TaskCompleted { .. } => "completed",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["started", "retrying", "started", "completed"]);
}

#[tokio::test]
async fn test_panicking_body_fails_only_that_task() {
    let dag = DagBuilder::new("panic", "Panic")
        .add_task(Arc::new(PanickingTask))
        .add_task(sleepy("healthy", 5))
        .build()
        .unwrap();

    let report = TestHarness::new()
        .with_retry(RetryPolicy::none())
        .execute(&dag)
        .await
        .unwrap();

    assert!(matches!(report.error("panics"), Some(TaskError::Panicked(_))));
    assert_eq!(report.state("healthy"), Some(TaskState::Done));
}

#[tokio::test]
async fn test_release_policy_runs_dependents_of_failed_task() {
    let downstream = Arc::new(StaticTask::echo_upstream("downstream"));
    let dag = DagBuilder::new("release", "Release")
        .add_task(Arc::new(FailingTask::always("upstream")))
        .add_task(Arc::new(StaticTask::automated("sibling", json!("ok"))))
        .add_task_with_deps(downstream.clone(), &["upstream", "sibling"])
        .build()
        .unwrap();

    let report = TestHarness::new()
        .with_failure_policy(FailurePolicy::ReleaseDependents)
        .execute(&dag)
        .await
        .unwrap();

    assert_eq!(report.state("upstream"), Some(TaskState::Failed));
    assert_eq!(report.state("downstream"), Some(TaskState::Done));
    // Only results of dependencies that finished Done are visible.
    assert_eq!(report.result("downstream"), Some(&json!({ "sibling": "ok" })));
    assert_eq!(downstream.call_count(), 1);
}

#[tokio::test]
async fn test_fail_dependents_policy_skips_transitive_dependents() {
    let skipped = Arc::new(StaticTask::automated("grandchild", json!(1)));
    let dag = DagBuilder::new("cascade", "Cascade")
        .add_task(Arc::new(FailingTask::always("upstream")))
        .add_task_with_deps(Arc::new(StaticTask::automated("child", json!(1))), &["upstream"])
        .add_task_with_deps(skipped.clone(), &["child"])
        .add_task(Arc::new(StaticTask::automated("unrelated", json!(1))))
        .build()
        .unwrap();
    let handler = RecordingHandler::new();

    let report = TestHarness::new()
        .with_failure_policy(FailurePolicy::FailDependents)
        .with_event_handler(handler.clone())
        .execute(&dag)
        .await
        .unwrap();

    assert_all_resolved(&report);
    assert_eq!(report.state("child"), Some(TaskState::Failed));
    assert_eq!(report.state("grandchild"), Some(TaskState::Failed));
    assert_eq!(report.state("unrelated"), Some(TaskState::Done));
    assert!(report.record("grandchild").unwrap().started_at().is_none());
    assert_eq!(skipped.call_count(), 0);

    let failed_events = handler
        .events()
        .await
        .iter()
        .filter(|e| matches!(e, Event::TaskFailed { .. }))
        .count();
    assert_eq!(failed_events, 3);
}
