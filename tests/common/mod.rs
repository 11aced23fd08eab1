//! Common test utilities shared across integration tests.

use handoff::testing::RecordingHandler;
use handoff::{Dag, Event, RunReport, TaskState};
use std::time::Duration;

/// Assert that no task started before every one of its dependencies finished.
pub fn assert_dependencies_respected(dag: &Dag, report: &RunReport) {
    for id in dag.task_ids() {
        let record = report.record(id.as_str()).unwrap();
        let Some(started) = record.started_at() else {
            continue;
        };
        for dep in dag.dependencies(id) {
            let dep_record = report.record(dep.as_str()).unwrap();
            let finished = dep_record
                .finished_at()
                .unwrap_or_else(|| panic!("{} started before {} finished", id, dep));
            assert!(
                finished <= started,
                "{} started before its dependency {} finished",
                id,
                dep
            );
        }
    }
}

/// Assert that every task ended in a terminal state.
pub fn assert_all_resolved(report: &RunReport) {
    for record in report.records() {
        assert!(
            matches!(record.state(), TaskState::Done | TaskState::Failed),
            "task {} ended in {:?}",
            record.id(),
            record.state()
        );
    }
}

/// Wait until the recorded events satisfy `predicate`, polling every 10ms.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_events<F>(handler: &RecordingHandler, timeout: Duration, predicate: F)
where
    F: Fn(&[Event]) -> bool,
{
    let start = tokio::time::Instant::now();
    loop {
        let events = handler.events().await;
        if predicate(&events) {
            return;
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for events, got {} event(s)", events.len());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Number of `TaskCompleted` events for the given task ids.
pub fn completed_count(events: &[Event], tasks: &[&str]) -> usize {
    events
        .iter()
        .filter(|e| match e {
            Event::TaskCompleted { task_id, .. } => tasks.contains(&task_id.as_str()),
            _ => false,
        })
        .count()
}
