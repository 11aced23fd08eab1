//! Interaction hand-off integration tests.
//!
//! Tests that interaction-required tasks are served one at a time in
//! submission order without holding up automated work.

use handoff::testing::{
    GatedRespondent, RecordingHandler, ScriptedRespondent, StaticTask, TestHarness,
};
use handoff::{DagBuilder, Event, TaskError, TaskId, TaskState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{assert_dependencies_respected, completed_count, wait_for_events};

fn ids(list: &[TaskId]) -> Vec<String> {
    list.iter().map(|id| id.to_string()).collect()
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    // A -> {B, C} -> D, with B and C answered by the respondent.
    let dag = DagBuilder::new("cars", "Car Recommender")
        .add_task(Arc::new(
            StaticTask::automated("A", json!("Web Result")).with_delay(Duration::from_millis(20)),
        ))
        .add_task_with_deps(
            Arc::new(StaticTask::interaction("B", json!("What type of car do you want?"))),
            &["A"],
        )
        .add_task_with_deps(
            Arc::new(StaticTask::interaction("C", json!("What is your budget?"))),
            &["A"],
        )
        .add_task_with_deps(Arc::new(StaticTask::echo_upstream("D")), &["B", "C"])
        .build()
        .unwrap();
    let respondent = Arc::new(
        ScriptedRespondent::new()
            .answer("B", json!("a wagon"))
            .answer("C", json!("under 30k")),
    );
    let handler = RecordingHandler::new();

    let report = TestHarness::new()
        .with_respondent(respondent.clone())
        .with_event_handler(handler.clone())
        .execute_and_assert_success(&dag)
        .await;

    assert_dependencies_respected(&dag, &report);
    let order = ids(report.completion_order());
    assert_eq!(order.first().map(String::as_str), Some("A"));
    assert_eq!(order.last().map(String::as_str), Some("D"));

    // The respondent saw B and C in the order they were handed off.
    let requested: Vec<String> = handler
        .events()
        .await
        .iter()
        .filter_map(|e| match e {
            Event::InteractionRequested { task_id, .. } => Some(task_id.to_string()),
            _ => None,
        })
        .collect();
    let presented: Vec<String> = respondent
        .presented()
        .iter()
        .map(|p| p.task_id.to_string())
        .collect();
    assert_eq!(presented.len(), 2);
    assert_eq!(presented, requested);

    assert_eq!(
        report.result("D"),
        Some(&json!({ "B": "a wagon", "C": "under 30k" }))
    );
    assert_eq!(report.record("B").unwrap().state(), TaskState::Done);
}

#[tokio::test]
async fn test_fifo_even_when_later_answer_arrives_first() {
    // B's body is slower, so A is handed off first.
    let dag = DagBuilder::new("fifo", "FIFO")
        .add_task(Arc::new(StaticTask::interaction("A", json!("first?"))))
        .add_task(Arc::new(
            StaticTask::interaction("B", json!("second?")).with_delay(Duration::from_millis(50)),
        ))
        .build()
        .unwrap();
    let respondent = Arc::new(GatedRespondent::new());
    let handler = RecordingHandler::new();
    let harness = TestHarness::new()
        .with_respondent(respondent.clone())
        .with_event_handler(handler.clone());

    let run = tokio::spawn(async move { harness.execute(&dag).await });

    respondent.wait_presented(1).await;
    wait_for_events(&handler, Duration::from_secs(5), |events| {
        events
            .iter()
            .filter(|e| matches!(e, Event::InteractionRequested { .. }))
            .count()
            == 2
    })
    .await;

    // Answering B first must not resolve anything while A is presented.
    respondent.release("B", json!("b"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(respondent.presented().len(), 1);
    assert_eq!(respondent.presented()[0].task_id.as_str(), "A");
    assert!(handler.terminal_order().await.is_empty());

    respondent.release("A", json!("a"));
    let report = run.await.unwrap().unwrap();

    assert!(report.is_success());
    assert_eq!(ids(&handler.terminal_order().await), vec!["A", "B"]);
    let presented: Vec<String> = respondent
        .presented()
        .iter()
        .map(|p| p.task_id.to_string())
        .collect();
    assert_eq!(presented, vec!["A", "B"]);
    assert_eq!(report.result("A"), Some(&json!("a")));
    assert_eq!(report.result("B"), Some(&json!("b")));
}

#[tokio::test]
async fn test_queued_interactions_do_not_stall_automated_tasks() {
    let mut builder = DagBuilder::new("busy", "Busy");
    for i in 0..5 {
        builder = builder.add_task(Arc::new(StaticTask::interaction(
            format!("ask_{}", i),
            json!(i),
        )));
    }
    // A chain of automated work that starts while the questions queue up.
    let dag = builder
        .add_task(Arc::new(
            StaticTask::automated("fetch", json!(1)).with_delay(Duration::from_millis(30)),
        ))
        .add_task_with_deps(
            Arc::new(StaticTask::automated("rank", json!(2)).with_delay(Duration::from_millis(30))),
            &["fetch"],
        )
        .add_task_with_deps(
            Arc::new(
                StaticTask::automated("summarize", json!(3))
                    .with_delay(Duration::from_millis(30)),
            ),
            &["rank"],
        )
        .build()
        .unwrap();
    let respondent = Arc::new(GatedRespondent::new());
    let handler = RecordingHandler::new();
    let harness = TestHarness::new()
        .with_pool_size(2)
        .with_respondent(respondent.clone())
        .with_event_handler(handler.clone());

    let run = tokio::spawn(async move { harness.execute(&dag).await });

    // Every automated task finishes while all five questions are unanswered.
    wait_for_events(&handler, Duration::from_secs(5), |events| {
        completed_count(events, &["fetch", "rank", "summarize"]) == 3
    })
    .await;
    assert_eq!(respondent.presented().len(), 1);

    for i in 0..5 {
        respondent.release(&format!("ask_{}", i), json!(format!("answer {}", i)));
    }
    let report = run.await.unwrap().unwrap();

    assert!(report.is_success());
    for name in ["fetch", "rank", "summarize"] {
        let record = report.record(name).unwrap();
        let latency = record.finished_at().unwrap() - record.started_at().unwrap();
        assert!(latency < Duration::from_secs(1), "{} took {:?}", name, latency);
    }
    let order = ids(&handler.terminal_order().await);
    assert_eq!(&order[..3], &["fetch", "rank", "summarize"]);
}

#[tokio::test]
async fn test_full_interaction_queue_does_not_block_scheduling() {
    let mut builder = DagBuilder::new("backlog", "Backlog");
    for i in 0..3 {
        builder = builder.add_task(Arc::new(StaticTask::interaction(
            format!("ask_{}", i),
            json!(i),
        )));
    }
    let dag = builder
        .add_task(Arc::new(
            StaticTask::automated("fetch", json!(1)).with_delay(Duration::from_millis(50)),
        ))
        .add_task_with_deps(Arc::new(StaticTask::automated("rank", json!(2))), &["fetch"])
        .build()
        .unwrap();
    let respondent = Arc::new(GatedRespondent::new());
    let handler = RecordingHandler::new();
    // One request is presented, one fills the queue, one waits on the
    // scheduler side.
    let harness = TestHarness::new()
        .with_pool_size(8)
        .with_queue_capacity(1)
        .with_respondent(respondent.clone())
        .with_event_handler(handler.clone());

    let run = tokio::spawn(async move { harness.execute(&dag).await });

    wait_for_events(&handler, Duration::from_secs(5), |events| {
        completed_count(events, &["fetch", "rank"]) == 2
    })
    .await;
    assert_eq!(respondent.presented().len(), 1);

    for i in 0..3 {
        respondent.release(&format!("ask_{}", i), json!(format!("answer {}", i)));
    }
    let report = run.await.unwrap().unwrap();

    assert!(report.is_success());
    assert_eq!(respondent.presented().len(), 3);
    let order = ids(&handler.terminal_order().await);
    assert_eq!(&order[..2], &["fetch", "rank"]);
}

#[tokio::test]
async fn test_timeout_fails_one_interaction_and_serves_the_next() {
    let dag = DagBuilder::new("timeout", "Timeout")
        .add_task(Arc::new(StaticTask::interaction("slow", json!("?"))))
        .add_task(Arc::new(
            StaticTask::interaction("quick", json!("?")).with_delay(Duration::from_millis(20)),
        ))
        .add_task_with_deps(Arc::new(StaticTask::automated("after", json!(1))), &["slow"])
        .build()
        .unwrap();
    let respondent = ScriptedRespondent::new()
        .answer_after("slow", json!("too late"), Duration::from_secs(30))
        .answer("quick", json!("in time"));

    let report = TestHarness::new()
        .with_interaction_timeout(Duration::from_millis(100))
        .with_respondent(Arc::new(respondent))
        .execute(&dag)
        .await
        .unwrap();

    assert!(matches!(
        report.error("slow"),
        Some(TaskError::InteractionTimeout(d)) if *d == Duration::from_millis(100)
    ));
    assert_eq!(report.state("quick"), Some(TaskState::Done));
    assert_eq!(report.result("quick"), Some(&json!("in time")));
    // Release policy: a timed-out task still releases its dependents.
    assert_eq!(report.state("after"), Some(TaskState::Done));
    assert!(report.duration < Duration::from_secs(10));
}

#[tokio::test]
async fn test_respondent_sees_upstream_derived_payload() {
    let dag = DagBuilder::new("payload", "Payload")
        .add_task(Arc::new(StaticTask::automated("search", json!(["wagon", "coupe"]))))
        .add_task_with_deps(
            Arc::new(handoff::PromptTask::new("pick", "Which of {{search}}?")),
            &["search"],
        )
        .build()
        .unwrap();
    let respondent = Arc::new(ScriptedRespondent::new().answer("pick", json!("wagon")));

    let report = TestHarness::new()
        .with_respondent(respondent.clone())
        .execute_and_assert_success(&dag)
        .await;

    assert_eq!(
        respondent.presented()[0].payload,
        json!("Which of [\"wagon\",\"coupe\"]?")
    );
    assert_eq!(report.result("pick"), Some(&json!("wagon")));
}
