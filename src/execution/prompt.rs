//! Interaction task that renders a question for the respondent.
//!
//! A [`PromptTask`] body renders its template and returns the text as the
//! interaction payload. `{{task_id}}` placeholders are replaced with that
//! upstream task's result: strings verbatim, other values as compact JSON.
//! A placeholder whose upstream produced no result (it failed) renders empty.

use async_trait::async_trait;
use serde_json::Value;

use crate::core::context::TaskContext;
use crate::core::retry::RetryPolicy;
use crate::core::task::{Task, TaskError, TaskKind};

/// A task whose answer comes from the external respondent.
#[derive(Debug, Clone)]
pub struct PromptTask {
    name: String,
    template: String,
    retry_policy: Option<RetryPolicy>,
}

impl PromptTask {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            retry_policy: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Task IDs referenced by the template, in order of appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut found = Vec::new();
        let mut rest = self.template.as_str();
        while let Some(open) = rest.find("{{") {
            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                break;
            };
            let name = after[..close].trim();
            if !name.is_empty() && !found.contains(&name) {
                found.push(name);
            }
            rest = &after[close + 2..];
        }
        found
    }

    /// Render the template against upstream results.
    pub fn render(&self, ctx: &TaskContext) -> String {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(open) = rest.find("{{") {
            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                break;
            };
            out.push_str(&rest[..open]);
            match ctx.upstream(after[..close].trim()) {
                Some(Value::String(s)) => out.push_str(s),
                Some(Value::Null) | None => {}
                Some(other) => out.push_str(&other.to_string()),
            }
            rest = &after[close + 2..];
        }
        out.push_str(rest);
        out
    }
}

#[async_trait]
impl Task for PromptTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Value, TaskError> {
        Ok(Value::String(self.render(ctx)))
    }

    fn kind(&self) -> TaskKind {
        TaskKind::InteractionRequired
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry_policy.clone()
    }

    fn description(&self) -> Option<&str> {
        Some(&self.template)
    }
}
