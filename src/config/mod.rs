//! Configuration loading and parsing.
//!
//! This module provides YAML-based workflow definitions.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{Workflow, WorkflowBuilder};
pub use error::ConfigError;
pub use types::{
    RetryConditionConfig, RetryConfig, SchedulerSection, TaskConfig, TaskTypeConfig,
    WorkflowConfig,
};
pub use yaml::YamlLoader;
