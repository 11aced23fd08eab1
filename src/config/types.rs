//! Configuration type definitions.
//!
//! Serde structures for YAML workflow files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::execution::FailurePolicy;

/// A workflow file: one DAG plus the scheduler settings to run it with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow identifier, used as the DAG id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    pub description: Option<String>,
    /// Scheduler overrides. Missing fields keep their defaults.
    #[serde(default)]
    pub scheduler: SchedulerSection,
    /// Task definitions.
    pub tasks: Vec<TaskConfig>,
}

/// `scheduler:` section of a workflow file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub pool_size: Option<usize>,
    pub failure_policy: Option<FailurePolicy>,
    /// Respondent timeout per interaction. Omit to wait indefinitely.
    pub interaction_timeout_secs: Option<u64>,
    pub queue_capacity: Option<usize>,
    /// Default retry policy for every task.
    pub retry: Option<RetryConfig>,
}

/// Task configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task identifier (unique within the workflow).
    pub id: String,
    /// Task type and configuration.
    #[serde(flatten)]
    pub task_type: TaskTypeConfig,
    /// Dependencies on other tasks in this workflow.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Retry policy for this task, overriding the scheduler default.
    pub retry: Option<RetryConfig>,
}

/// Task type configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TaskTypeConfig {
    /// External command.
    #[serde(rename = "command")]
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        environment: BTreeMap<String, String>,
        working_dir: Option<String>,
        timeout_secs: Option<u64>,
    },
    /// Question answered by the respondent.
    #[serde(rename = "prompt")]
    Prompt {
        /// Text shown to the respondent; `{{task_id}}` inserts an upstream result.
        prompt: String,
    },
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub condition: RetryConditionConfig,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    10_000
}

/// Retry condition configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryConditionConfig {
    /// Always retry on failure.
    #[default]
    Always,
    /// Only retry on transient errors.
    TransientOnly,
    /// Never retry.
    Never,
}
