//! Complete workflow integration tests.
//!
//! Tests the full pipeline from a YAML file on disk to a finished run.

use handoff::testing::{RecordingHandler, ScriptedRespondent, TestHarness};
use handoff::{
    ConfigError, DagError, FailurePolicy, TaskError, TaskState, WorkflowBuilder, YamlLoader,
};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_workflow(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

const RECOMMENDER: &str = r#"
id: recommender
name: Car Recommender
scheduler:
  pool_size: 2
  retry:
    max_attempts: 2
    base_delay_ms: 1
    max_delay_ms: 5
tasks:
  - id: confirm
    type: prompt
    prompt: "Listings: {{search}} Safety: {{safety}}. Which one?"
    depends_on: [search, safety]
  - id: search
    type: command
    command: echo
    args: ["wagon"]
  - id: safety
    type: command
    command: sh
    args: ["-c", "printf '%s' \"$STARS stars\""]
    environment:
      STARS: "5"
  - id: report
    type: command
    command: echo
    args: ["done"]
    depends_on: [confirm]
"#;

#[tokio::test]
async fn test_yaml_workflow_runs_end_to_end() {
    let file = write_workflow(RECOMMENDER);
    let workflow = WorkflowBuilder::from_file(file.path()).unwrap();
    let respondent = Arc::new(ScriptedRespondent::new().answer("confirm", json!("the wagon")));

    let report = TestHarness::new()
        .with_config(workflow.scheduler.clone())
        .with_respondent(respondent.clone())
        .execute_and_assert_success(&workflow.dag)
        .await;

    assert_eq!(report.len(), 4);
    assert_eq!(report.result("search").unwrap()["stdout"], json!("wagon\n"));
    assert_eq!(report.result("safety").unwrap()["stdout"], json!("5 stars"));
    assert_eq!(report.result("confirm"), Some(&json!("the wagon")));
    assert_eq!(
        respondent.presented()[0].payload,
        json!(concat!(
            "Listings: {\"exit_code\":0,\"stderr\":\"\",\"stdout\":\"wagon\\n\"} ",
            "Safety: {\"exit_code\":0,\"stderr\":\"\",\"stdout\":\"5 stars\"}. Which one?"
        ))
    );
    assert_eq!(report.completion_order().last().unwrap().as_str(), "report");
}

#[tokio::test]
async fn test_failing_command_with_fail_dependents() {
    let file = write_workflow(
        r#"
id: broken
name: Broken
scheduler:
  failure_policy: fail_dependents
  retry:
    max_attempts: 2
    base_delay_ms: 1
    max_delay_ms: 1
tasks:
  - id: fetch
    type: command
    command: sh
    args: ["-c", "echo unreachable >&2; exit 7"]
  - id: parse
    type: command
    command: echo
    args: ["parsed"]
    depends_on: [fetch]
  - id: independent
    type: command
    command: "true"
"#,
    );
    let workflow = WorkflowBuilder::from_file(file.path()).unwrap();
    assert_eq!(
        workflow.scheduler.failure_policy,
        FailurePolicy::FailDependents
    );
    let handler = RecordingHandler::new();

    let report = TestHarness::new()
        .with_config(workflow.scheduler.clone())
        .with_event_handler(handler.clone())
        .execute_and_assert_failure(&workflow.dag)
        .await;

    let fetch = report.record("fetch").unwrap();
    assert_eq!(fetch.attempts(), 2);
    match fetch.error() {
        Some(TaskError::CommandFailed { code, stderr }) => {
            assert_eq!(*code, 7);
            assert_eq!(stderr.trim(), "unreachable");
        }
        other => panic!("expected CommandFailed, got {:?}", other),
    }
    assert!(matches!(
        report.error("parse"),
        Some(TaskError::UpstreamFailed(id)) if id.as_str() == "fetch"
    ));
    assert_eq!(report.state("independent"), Some(TaskState::Done));
}

#[tokio::test]
async fn test_command_timeout_from_yaml() {
    let file = write_workflow(
        r#"
id: slow
name: Slow
tasks:
  - id: hang
    type: command
    command: sleep
    args: ["10"]
    timeout_secs: 1
    retry:
      max_attempts: 1
"#,
    );
    let workflow = WorkflowBuilder::from_file(file.path()).unwrap();

    let report = TestHarness::new()
        .execute(&workflow.dag)
        .await
        .unwrap();

    assert!(matches!(
        report.error("hang"),
        Some(TaskError::Timeout(d)) if *d == Duration::from_secs(1)
    ));
    assert!(report.duration < Duration::from_secs(5));
}

#[test]
fn test_cyclic_workflow_rejected() {
    let file = write_workflow(
        r#"
id: cyclic
name: Cyclic
tasks:
  - id: a
    type: command
    command: "true"
    depends_on: [c]
  - id: b
    type: command
    command: "true"
    depends_on: [a]
  - id: c
    type: command
    command: "true"
    depends_on: [b]
"#,
    );

    let result = WorkflowBuilder::from_file(file.path());

    assert!(matches!(
        result,
        Err(ConfigError::InvalidDag(DagError::CycleDetected(_)))
    ));
}

#[test]
fn test_invalid_reference_rejected_before_build() {
    let file = write_workflow(
        r#"
id: typo
name: Typo
tasks:
  - id: ask
    type: prompt
    prompt: "hello"
    depends_on: [serach]
"#,
    );

    let err = YamlLoader::load_workflow(file.path()).unwrap_err();

    assert!(matches!(err, ConfigError::InvalidConfig(_)));
    assert!(err.to_string().contains("serach"));
}
