//! YAML workflow parsing.
//!
//! Parses workflow definitions and checks everything that can be checked
//! without building the DAG. Cycles are reported by the DAG builder.

use std::collections::HashSet;
use std::path::Path;

use crate::execution::PromptTask;

use super::error::ConfigError;
use super::types::{RetryConfig, TaskTypeConfig, WorkflowConfig};

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load a workflow from a file.
    pub fn load_workflow(path: impl AsRef<Path>) -> Result<WorkflowConfig, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse_workflow(&content)
    }

    /// Parse a workflow from a YAML string.
    pub fn parse_workflow(yaml: &str) -> Result<WorkflowConfig, ConfigError> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml)?;
        Self::validate_workflow(&config)?;
        Ok(config)
    }

    fn validate_workflow(config: &WorkflowConfig) -> Result<(), ConfigError> {
        if config.id.is_empty() {
            return Err(ConfigError::MissingField("id".into()));
        }
        if config.name.is_empty() {
            return Err(ConfigError::MissingField("name".into()));
        }

        let scheduler = &config.scheduler;
        if scheduler.pool_size == Some(0) {
            return Err(ConfigError::InvalidConfig("pool_size cannot be zero".into()));
        }
        if scheduler.queue_capacity == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "queue_capacity cannot be zero".into(),
            ));
        }
        if scheduler.interaction_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "interaction_timeout_secs cannot be zero; omit it to wait indefinitely".into(),
            ));
        }
        if let Some(retry) = &scheduler.retry {
            Self::validate_retry("scheduler", retry)?;
        }

        let mut task_ids: HashSet<&str> = HashSet::new();
        for task in &config.tasks {
            if task.id.is_empty() {
                return Err(ConfigError::MissingField("tasks[].id".into()));
            }
            if !task_ids.insert(&task.id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate task id: {}",
                    task.id
                )));
            }
        }

        for task in &config.tasks {
            let mut seen_deps = HashSet::new();
            for dep in &task.depends_on {
                if dep == &task.id {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' cannot depend on itself",
                        task.id
                    )));
                }
                if !task_ids.contains(dep.as_str()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' depends on unknown task '{}'",
                        task.id, dep
                    )));
                }
                if !seen_deps.insert(dep.as_str()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' has duplicate dependency '{}'",
                        task.id, dep
                    )));
                }
            }

            if let Some(retry) = &task.retry {
                Self::validate_retry(&task.id, retry)?;
            }

            match &task.task_type {
                TaskTypeConfig::Command {
                    command,
                    timeout_secs,
                    ..
                } => {
                    if command.is_empty() {
                        return Err(ConfigError::MissingField(format!(
                            "tasks[{}].command",
                            task.id
                        )));
                    }
                    if *timeout_secs == Some(0) {
                        return Err(ConfigError::InvalidConfig(format!(
                            "task '{}' timeout_secs cannot be zero",
                            task.id
                        )));
                    }
                }
                TaskTypeConfig::Prompt { prompt } => {
                    // Placeholders may only read results the task waits for.
                    let template = PromptTask::new(&task.id, prompt);
                    for name in template.placeholders() {
                        if !seen_deps.contains(name) {
                            return Err(ConfigError::InvalidConfig(format!(
                                "task '{}' prompt references '{}' which is not in depends_on",
                                task.id, name
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn validate_retry(owner: &str, retry: &RetryConfig) -> Result<(), ConfigError> {
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(format!(
                "{}: retry.max_attempts must be at least 1",
                owner
            )));
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "{}: retry.multiplier must be a finite number >= 1",
                owner
            )));
        }
        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "{}: retry.max_delay_ms must not be less than base_delay_ms",
                owner
            )));
        }
        Ok(())
    }
}
