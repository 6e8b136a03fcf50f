// ABOUTME: Error types for token snapshot and pipeline template parsing
// ABOUTME: Defines parse failures and the validation findings reported for templates

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Empty pipeline: no stages defined")]
    EmptyPipeline,

    #[error("Stage '{stage}' owns no tasks")]
    EmptyStage { stage: String },

    #[error("Duplicate stage id: {stage}")]
    DuplicateStage { stage: String },

    #[error("Stage '{stage}' owns unknown task '{task}'")]
    UnknownStageTask { stage: String, task: String },

    #[error("Task '{task}' is owned by stages '{first}' and '{second}'")]
    TaskInMultipleStages {
        task: String,
        first: String,
        second: String,
    },

    #[error("Stage '{stage}' waits on unknown task '{prerequisite}'")]
    UnknownPrerequisite { stage: String, prerequisite: String },

    #[error("Unsupported task kind '{kind}' in task '{task}'. Supported kinds: {supported_kinds:?}")]
    UnsupportedTaskKind {
        task: String,
        kind: String,
        supported_kinds: Vec<String>,
    },

    #[error("Invalid task configuration for '{task}': {reason}")]
    InvalidTaskConfig { task: String, reason: String },

    #[error("Tasks '{first}' and '{second}' both publish insight '{insight_key}'")]
    DuplicateInsightKey {
        insight_key: String,
        first: String,
        second: String,
    },

    #[error("Task '{task}' is not owned by any stage")]
    UnownedTask { task: String },

    #[error("Current stage index {index} is out of range for {stages} stages")]
    StageIndexOutOfRange { index: usize, stages: usize },
}

pub type Result<T> = std::result::Result<T, ParserError>;
