//! Core building blocks: identifiers, the task trait, task state, the
//! dependency graph and retry policy.

pub mod context;
pub mod dag;
pub mod retry;
pub mod state;
pub mod task;
pub mod types;
