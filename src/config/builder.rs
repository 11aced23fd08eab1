//! Workflow builder from YAML configuration.
//!
//! Converts a [`WorkflowConfig`] into a runnable DAG plus the scheduler
//! settings it asked for.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::dag::{Dag, DagBuilder};
use crate::core::retry::{RetryCondition, RetryPolicy};
use crate::core::task::Task;
use crate::execution::{CommandTask, PromptTask, SchedulerConfig};

use super::error::ConfigError;
use super::types::{RetryConditionConfig, RetryConfig, TaskConfig, TaskTypeConfig, WorkflowConfig};
use super::yaml::YamlLoader;

/// A DAG ready to run and the scheduler configuration for it.
pub struct Workflow {
    pub dag: Dag,
    pub scheduler: SchedulerConfig,
}

/// Builder for creating workflows from YAML configuration.
pub struct WorkflowBuilder;

impl WorkflowBuilder {
    /// Load, validate and build a workflow file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Workflow, ConfigError> {
        let config = YamlLoader::load_workflow(path)?;
        Self::build(config)
    }

    /// Build a workflow from a parsed config.
    pub fn build(config: WorkflowConfig) -> Result<Workflow, ConfigError> {
        let mut dag_builder = DagBuilder::new(&config.id, &config.name);

        // Tasks may depend on tasks listed after them, so edges come second.
        for task_config in &config.tasks {
            dag_builder = dag_builder.add_task(Self::build_task(task_config));
        }
        for task_config in &config.tasks {
            for dep in &task_config.depends_on {
                dag_builder = dag_builder.add_dependency(&task_config.id, dep);
            }
        }

        let dag = dag_builder.build()?;
        let scheduler = Self::build_scheduler_config(&config);

        Ok(Workflow { dag, scheduler })
    }

    fn build_scheduler_config(config: &WorkflowConfig) -> SchedulerConfig {
        let section = &config.scheduler;
        let mut scheduler = SchedulerConfig::default();

        if let Some(pool_size) = section.pool_size {
            scheduler = scheduler.with_pool_size(pool_size);
        }
        if let Some(policy) = section.failure_policy {
            scheduler = scheduler.with_failure_policy(policy);
        }
        if let Some(secs) = section.interaction_timeout_secs {
            scheduler = scheduler.with_interaction_timeout(Some(Duration::from_secs(secs)));
        }
        if let Some(capacity) = section.queue_capacity {
            scheduler = scheduler.with_queue_capacity(capacity);
        }
        if let Some(retry) = &section.retry {
            scheduler = scheduler.with_retry(Self::build_retry_policy(retry));
        }

        scheduler
    }

    fn build_task(config: &TaskConfig) -> Arc<dyn Task> {
        let retry = config.retry.as_ref().map(Self::build_retry_policy);

        match &config.task_type {
            TaskTypeConfig::Command {
                command,
                args,
                environment,
                working_dir,
                timeout_secs,
            } => {
                let mut builder = CommandTask::builder(command)
                    .name(&config.id)
                    .args(args.iter().cloned());

                for (key, value) in environment {
                    builder = builder.env(key, value);
                }
                if let Some(dir) = working_dir {
                    builder = builder.working_dir(dir);
                }
                if let Some(secs) = timeout_secs {
                    builder = builder.timeout(Duration::from_secs(*secs));
                }
                if let Some(policy) = retry {
                    builder = builder.retry_policy(policy);
                }

                Arc::new(builder.build())
            }
            TaskTypeConfig::Prompt { prompt } => {
                let mut task = PromptTask::new(&config.id, prompt);
                if let Some(policy) = retry {
                    task = task.with_retry_policy(policy);
                }
                Arc::new(task)
            }
        }
    }

    /// Build a RetryPolicy from RetryConfig.
    fn build_retry_policy(config: &RetryConfig) -> RetryPolicy {
        let condition = match config.condition {
            RetryConditionConfig::Always => RetryCondition::Always,
            RetryConditionConfig::TransientOnly => RetryCondition::TransientOnly,
            RetryConditionConfig::Never => RetryCondition::Never,
        };

        RetryPolicy::exponential(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
        .with_multiplier(config.multiplier)
        .with_condition(condition)
    }
}
