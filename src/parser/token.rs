// ABOUTME: Persisted data model for tracked tokens, their stages and their tasks
// ABOUTME: Defines the snapshot shape exchanged with stores and the JSON/YAML round-trip

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

use super::error::{ParserError, Result};
use crate::engine::{StageState, TaskState};

/// Identity of the token a tick is evaluating.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRef {
    pub uuid: Uuid,
    pub chain_id: u64,
    pub address: String,
}

impl fmt::Display for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.address)
    }
}

/// Repetition budget and cadence of a task.
///
/// `interval` absent means the task is lazy: it only runs when pulled or on
/// its stage's tick and never asks to be woken up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repetitions {
    #[serde(default)]
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<u32>,
    /// Seconds between runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Filled from the map key when a template omits it.
    #[serde(default)]
    pub task_id: String,
    pub kind: String,
    #[serde(default)]
    pub state: TaskState,
    #[serde(default)]
    pub repetitions: Repetitions,
    /// Extra seconds added before the second run only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_execution_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl TaskRecord {
    pub fn new(task_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            kind: kind.into(),
            state: TaskState::default(),
            repetitions: Repetitions::default(),
            delay: None,
            daemon: None,
            scheduled_execution_time: None,
            config: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage_id: String,
    /// Absent on a fresh template; derived from the prerequisites on load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StageState>,
    pub task_ids: Vec<String>,
    #[serde(default)]
    pub prerequisite_tasks: Vec<String>,
}

impl StageRecord {
    pub fn new(stage_id: impl Into<String>, task_ids: Vec<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            state: None,
            task_ids,
            prerequisite_tasks: Vec::new(),
        }
    }
}

fn default_tracking() -> bool {
    true
}

/// Snapshot of one token's evaluation, loaded before a tick and persisted after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedToken {
    pub uuid: Uuid,
    pub chain_id: u64,
    pub address: String,
    #[serde(default = "default_tracking")]
    pub tracking: bool,
    #[serde(default)]
    pub aborted: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub current_stage_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_execution_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_execution_time: Option<DateTime<Utc>>,
    pub pipeline: Vec<StageRecord>,
    pub tasks: IndexMap<String, TaskRecord>,
    #[serde(default)]
    pub insights: IndexMap<String, serde_json::Value>,
}

impl TrackedToken {
    pub fn token_ref(&self) -> TokenRef {
        TokenRef {
            uuid: self.uuid,
            chain_id: self.chain_id,
            address: self.address.clone(),
        }
    }

    pub fn current_stage(&self) -> Option<&StageRecord> {
        self.pipeline.get(self.current_stage_index)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut token: TrackedToken = serde_json::from_str(content)?;
        token.fill_task_ids()?;
        Ok(token)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut token: TrackedToken = serde_yaml::from_str(content)?;
        token.fill_task_ids()?;
        Ok(token)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Load a snapshot from disk, choosing the format by extension
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    fn fill_task_ids(&mut self) -> Result<()> {
        fill_task_ids(&mut self.tasks)
    }
}

/// Copy map keys into records that omit `taskId` and reject mismatches.
pub(crate) fn fill_task_ids(tasks: &mut IndexMap<String, TaskRecord>) -> Result<()> {
    for (key, record) in tasks.iter_mut() {
        if record.task_id.is_empty() {
            record.task_id = key.clone();
        } else if record.task_id != *key {
            return Err(ParserError::InvalidFormat(format!(
                "task '{}' is stored under key '{}'",
                record.task_id, key
            )));
        }
    }
    Ok(())
}
