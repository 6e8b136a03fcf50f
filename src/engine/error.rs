// ABOUTME: Error types for pipeline execution engine operations
// ABOUTME: Defines the errors raised while loading and ticking a tracked token

use thiserror::Error;

/// Errors surfaced by the engine.
///
/// Cloneable so a memoized task outcome can be handed to every caller that
/// pulled the task during the same tick. An abort is not an error; it is
/// recorded on the token instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Task execution failed: {task_id} ({kind}) - {message}")]
    TaskExecution {
        task_id: String,
        kind: String,
        message: String,
    },

    #[error("Unknown task kind '{kind}' for task {task_id}")]
    UnknownTaskKind { task_id: String, kind: String },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Invalid task configuration: {task_id} - {reason}")]
    InvalidConfiguration { task_id: String, reason: String },

    #[error("Insight key '{insight_key}' of kind '{kind}' is already owned by kind '{owner}'")]
    InsightKeyConflict {
        kind: String,
        insight_key: String,
        owner: String,
    },

    #[error("Invalid pipeline: {message}")]
    InvalidPipeline { message: String },
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
