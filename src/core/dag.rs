//! Directed Acyclic Graph (DAG) for task dependencies.
//!
//! A DAG defines the execution order of tasks based on their dependencies.
//! It is assembled with [`DagBuilder`] and validated once; after
//! [`DagBuilder::build`] returns, the graph and every task's dependency set
//! are fixed.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use thiserror::Error;

use super::task::Task;
use super::types::{DagId, TaskId};

/// Errors that can occur when constructing a DAG.
#[derive(Debug, Error)]
pub enum DagError {
    /// A cycle was detected in the graph.
    #[error("cycle detected involving task: {0}")]
    CycleDetected(TaskId),

    /// A dependency references a task that doesn't exist.
    #[error("missing dependency: task '{from}' depends on non-existent task '{to}'")]
    MissingDependency { from: TaskId, to: TaskId },

    /// Attempted to add a duplicate task.
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskId),

    /// Task not found in the DAG.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
}

/// A node in the DAG representing a task.
#[derive(Clone)]
pub struct TaskNode {
    /// The task ID.
    pub id: TaskId,

    /// The task implementation.
    pub task: Arc<dyn Task>,
}

/// A Directed Acyclic Graph of tasks.
#[derive(Clone)]
pub struct Dag {
    /// Unique identifier for this DAG.
    id: DagId,

    /// Human-readable name.
    name: String,

    /// Task nodes indexed by ID.
    nodes: HashMap<TaskId, TaskNode>,

    /// Task IDs in insertion order.
    order: Vec<TaskId>,

    /// Edges: task_id -> tasks it depends on.
    dependencies: HashMap<TaskId, Vec<TaskId>>,

    /// Reverse edges: task_id -> tasks that depend on it.
    dependents: HashMap<TaskId, Vec<TaskId>>,
}

impl Dag {
    fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: DagId::new(id),
            name: name.into(),
            nodes: HashMap::new(),
            order: Vec::new(),
            dependencies: HashMap::new(),
            dependents: HashMap::new(),
        }
    }

    /// Get the DAG ID.
    pub fn id(&self) -> &DagId {
        &self.id
    }

    /// Get the DAG name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the DAG is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get the number of tasks in the DAG.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    fn add_task(&mut self, task: Arc<dyn Task>) -> Result<TaskId, DagError> {
        let id = TaskId::new(task.name());
        if self.nodes.contains_key(&id) {
            return Err(DagError::DuplicateTask(id));
        }

        self.nodes.insert(
            id.clone(),
            TaskNode {
                id: id.clone(),
                task,
            },
        );
        self.order.push(id.clone());
        self.dependencies.insert(id.clone(), Vec::new());
        self.dependents.insert(id.clone(), Vec::new());
        Ok(id)
    }

    /// `from` depends on `to` (to must complete before from).
    fn add_dependency(&mut self, from: &TaskId, to: &TaskId) -> Result<(), DagError> {
        if !self.nodes.contains_key(from) {
            return Err(DagError::TaskNotFound(from.clone()));
        }
        if !self.nodes.contains_key(to) {
            return Err(DagError::MissingDependency {
                from: from.clone(),
                to: to.clone(),
            });
        }

        let deps = self.dependencies.entry(from.clone()).or_default();
        if deps.contains(to) {
            return Ok(());
        }
        deps.push(to.clone());
        self.dependents
            .entry(to.clone())
            .or_default()
            .push(from.clone());

        Ok(())
    }

    /// Get a task node by ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    /// Get the dependencies of a task.
    pub fn dependencies(&self, id: &TaskId) -> &[TaskId] {
        self.dependencies
            .get(id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Get tasks that depend on the given task (downstream tasks).
    pub fn dependents(&self, id: &TaskId) -> &[TaskId] {
        self.dependents.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Number of dependencies of a task.
    pub fn in_degree(&self, id: &TaskId) -> usize {
        self.dependencies(id).len()
    }

    /// Tasks with no dependencies, in insertion order.
    pub fn roots(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|id| self.in_degree(id) == 0)
            .cloned()
            .collect()
    }

    /// All task IDs in insertion order.
    pub fn task_ids(&self) -> &[TaskId] {
        &self.order
    }

    /// Return tasks in topological order.
    ///
    /// Returns an error if a cycle is detected.
    pub fn topological_sort(&self) -> Result<Vec<TaskId>, DagError> {
        // Kahn's algorithm
        let mut in_degree: HashMap<&TaskId, usize> = self
            .order
            .iter()
            .map(|id| (id, self.in_degree(id)))
            .collect();

        let mut queue: VecDeque<&TaskId> = self
            .order
            .iter()
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut result = Vec::with_capacity(self.order.len());

        while let Some(id) = queue.pop_front() {
            result.push(id.clone());

            for next in self.dependents(id) {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }

        if result.len() != self.order.len() {
            let cycle_node = self
                .order
                .iter()
                .find(|id| in_degree.get(id).is_some_and(|d| *d > 0))
                .cloned()
                .unwrap_or_else(|| self.order[0].clone());
            return Err(DagError::CycleDetected(cycle_node));
        }

        Ok(result)
    }

    /// Validate the DAG structure.
    pub fn validate(&self) -> Result<(), DagError> {
        for (from, deps) in &self.dependencies {
            for to in deps {
                if !self.nodes.contains_key(to) {
                    return Err(DagError::MissingDependency {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
        }

        self.topological_sort()?;

        Ok(())
    }
}

/// Builder for constructing DAGs fluently.
///
/// The first error encountered while adding tasks or edges is kept and
/// returned from [`build`](Self::build).
pub struct DagBuilder {
    dag: Dag,
    error: Option<DagError>,
}

impl DagBuilder {
    /// Create a new DAG builder.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            dag: Dag::new(id, name),
            error: None,
        }
    }

    fn record(&mut self, result: Result<(), DagError>) {
        if let Err(e) = result {
            self.error.get_or_insert(e);
        }
    }

    /// Add a task to the DAG.
    pub fn add_task(mut self, task: Arc<dyn Task>) -> Self {
        let result = self.dag.add_task(task).map(|_| ());
        self.record(result);
        self
    }

    /// Add a task with dependencies.
    ///
    /// Dependencies must already have been added.
    pub fn add_task_with_deps(mut self, task: Arc<dyn Task>, depends_on: &[&str]) -> Self {
        match self.dag.add_task(task) {
            Ok(task_id) => {
                for dep in depends_on {
                    let result = self.dag.add_dependency(&task_id, &TaskId::new(*dep));
                    self.record(result);
                }
            }
            Err(e) => self.record(Err(e)),
        }
        self
    }

    /// Add a dependency between tasks: `from` runs after `to`.
    pub fn add_dependency(mut self, from: &str, to: &str) -> Self {
        let result = self
            .dag
            .add_dependency(&TaskId::new(from), &TaskId::new(to));
        self.record(result);
        self
    }

    /// Build the DAG, validating it in the process.
    pub fn build(self) -> Result<Dag, DagError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.dag.validate()?;
        Ok(self.dag)
    }
}
