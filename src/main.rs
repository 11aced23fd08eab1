//! handoff - run DAG workflows with an operator in the loop.
//!
//! Usage:
//!   handoff run <WORKFLOW>        Run a workflow, asking questions on the terminal
//!   handoff validate <WORKFLOW>.. Validate workflow files without running
//!   handoff plan <WORKFLOW>       Show the tasks in dependency order

use clap::{Parser, Subcommand};
use handoff::{
    Event, EventBus, EventHandler, FailurePolicy, Scheduler, StdinRespondent, TaskState,
    WorkflowBuilder,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// handoff - a DAG task scheduler with a hand-off queue for operator input
#[derive(Parser)]
#[command(name = "handoff")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow to completion
    Run {
        /// Path to the workflow YAML file
        #[arg(value_name = "WORKFLOW")]
        workflow: PathBuf,

        /// Maximum concurrent task bodies (overrides the workflow file)
        #[arg(short = 'p', long)]
        pool_size: Option<usize>,

        /// Seconds to wait for each operator answer (default: no limit)
        #[arg(long, value_name = "SECS")]
        interaction_timeout: Option<u64>,

        /// Fail every dependent of a failed task instead of running it
        #[arg(long)]
        fail_dependents: bool,
    },

    /// Validate workflow files without running
    Validate {
        /// Paths to workflow YAML files
        #[arg(value_name = "WORKFLOW", required = true)]
        workflows: Vec<PathBuf>,
    },

    /// Show the tasks of a workflow in dependency order
    Plan {
        /// Path to the workflow YAML file
        #[arg(value_name = "WORKFLOW")]
        workflow: PathBuf,
    },
}

/// Simple logging event handler that reports task progress.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::RunStarted {
                dag_id,
                run_id,
                task_count,
                ..
            } => {
                info!("Run of '{}' started with {} task(s) (run: {})", dag_id, task_count, run_id);
            }
            Event::RunCompleted {
                dag_id,
                success,
                duration,
                ..
            } => {
                if *success {
                    info!("Run of '{}' completed successfully in {:?}", dag_id, duration);
                } else {
                    error!("Run of '{}' finished with failures after {:?}", dag_id, duration);
                }
            }
            Event::TaskStarted {
                task_id, attempt, ..
            } => {
                if *attempt > 1 {
                    info!("  Task '{}' started (attempt {})", task_id, attempt);
                } else {
                    info!("  Task '{}' started", task_id);
                }
            }
            Event::TaskRetrying {
                task_id,
                attempt,
                max_attempts,
                delay,
                ..
            } => {
                warn!(
                    "  Task '{}' attempt {}/{} failed, retrying in {:?}",
                    task_id, attempt, max_attempts, delay
                );
            }
            Event::InteractionRequested { task_id, .. } => {
                info!("  Task '{}' waiting for operator", task_id);
            }
            Event::TaskCompleted {
                task_id, duration, ..
            } => {
                info!("  Task '{}' completed in {:?}", task_id, duration);
            }
            Event::TaskFailed { task_id, error, .. } => {
                warn!("  Task '{}' failed: {}", task_id, error);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout is for prompts and results.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workflow,
            pool_size,
            interaction_timeout,
            fail_dependents,
        } => {
            run_workflow(workflow, pool_size, interaction_timeout, fail_dependents).await?;
        }
        Commands::Validate { workflows } => {
            validate_workflows(workflows)?;
        }
        Commands::Plan { workflow } => {
            plan_workflow(workflow)?;
        }
    }

    Ok(())
}

/// Run a workflow with the terminal as the respondent.
async fn run_workflow(
    path: PathBuf,
    pool_size: Option<usize>,
    interaction_timeout: Option<u64>,
    fail_dependents: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading workflow from: {}", path.display());
    let workflow = WorkflowBuilder::from_file(&path)?;

    let mut config = workflow.scheduler;
    if let Some(size) = pool_size {
        config = config.with_pool_size(size);
    }
    if let Some(secs) = interaction_timeout {
        config = config.with_interaction_timeout(Some(Duration::from_secs(secs)));
    }
    if fail_dependents {
        config = config.with_failure_policy(FailurePolicy::FailDependents);
    }

    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let scheduler = Scheduler::new(config).with_event_bus(event_bus);
    let bridge = scheduler.spawn_bridge(Arc::new(StdinRespondent::new()));

    let report = tokio::select! {
        report = scheduler.run(&workflow.dag, &bridge) => report?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning run");
            return Err("run interrupted".into());
        }
    };
    bridge.shutdown().await;

    println!();
    println!("Results for '{}':", workflow.dag.name());
    for record in report.records() {
        match record.state() {
            TaskState::Done => {
                let result = record
                    .result()
                    .map(handoff::execution::render_payload)
                    .unwrap_or_default();
                println!("  {} [done] {}", record.id(), result.trim());
            }
            state => {
                let error = record.error().map(|e| e.to_string()).unwrap_or_default();
                println!("  {} [{:?}] {}", record.id(), state, error);
            }
        }
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(format!("{} task(s) failed", report.failed_count()).into())
    }
}

/// Validate workflow files without running.
fn validate_workflows(paths: Vec<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let mut failures = 0;

    for path in &paths {
        match WorkflowBuilder::from_file(path) {
            Ok(workflow) => {
                info!(
                    "{}: OK ({}, {} task(s))",
                    path.display(),
                    workflow.dag.id(),
                    workflow.dag.len()
                );
            }
            Err(e) => {
                error!("{}: {}", path.display(), e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(format!("{} of {} workflow(s) invalid", failures, paths.len()).into());
    }
    Ok(())
}

/// Print the tasks of a workflow in dependency order.
fn plan_workflow(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let workflow = WorkflowBuilder::from_file(&path)?;
    let dag = &workflow.dag;
    let config = &workflow.scheduler;

    println!("Workflow: {} ({})", dag.name(), dag.id());
    println!(
        "  Pool size: {}, failure policy: {:?}, retry: {} attempt(s)",
        config.pool_size, config.failure_policy, config.retry.max_attempts
    );
    match config.interaction_timeout {
        Some(timeout) => println!("  Interaction timeout: {:?}", timeout),
        None => println!("  Interaction timeout: none"),
    }
    println!("  Tasks: {}", dag.len());

    for task_id in dag.topological_sort()? {
        let kind = match dag.get_task(&task_id) {
            Some(node) if node.task.kind().requires_interaction() => " [interaction]",
            _ => "",
        };
        let deps = dag.dependencies(&task_id);
        if deps.is_empty() {
            println!("    - {}{}", task_id, kind);
        } else {
            let dep_names: Vec<&str> = deps.iter().map(|d| d.as_str()).collect();
            println!(
                "    - {}{} (depends on: {})",
                task_id,
                kind,
                dep_names.join(", ")
            );
        }
    }

    Ok(())
}
