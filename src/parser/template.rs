// ABOUTME: Pipeline templates describing the stages and tasks applied to newly tracked tokens
// ABOUTME: Parses template YAML and instantiates fresh tracked-token snapshots from it

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use super::error::{ParserError, Result, ValidationError};
use super::token::{fill_task_ids, StageRecord, TaskRecord, TrackedToken};
use crate::engine::StageState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTemplate {
    pub name: String,
    pub description: Option<String>,
    pub pipeline: Vec<StageRecord>,
    pub tasks: IndexMap<String, TaskRecord>,
}

impl PipelineTemplate {
    /// Parse template from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ParserError::IoError)?;
        Self::from_yaml(&content)
    }

    /// Parse template from YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut template: PipelineTemplate =
            serde_yaml::from_str(content).map_err(ParserError::YamlError)?;

        fill_task_ids(&mut template.tasks)?;
        template.validate_structure()?;

        Ok(template)
    }

    fn validate_structure(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ParserError::InvalidFormat(
                "template name cannot be empty".to_string(),
            ));
        }
        if self.pipeline.is_empty() {
            return Err(ParserError::ValidationError(ValidationError::EmptyPipeline));
        }
        Ok(())
    }

    pub fn stage_ids(&self) -> Vec<String> {
        self.pipeline
            .iter()
            .map(|stage| stage.stage_id.clone())
            .collect()
    }

    pub fn get_task(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.get(task_id)
    }

    /// Stage that owns `task_id`, if any
    pub fn owning_stage(&self, task_id: &str) -> Option<&StageRecord> {
        self.pipeline
            .iter()
            .find(|stage| stage.task_ids.iter().any(|id| id == task_id))
    }

    /// Fresh snapshot for a newly tracked token, due immediately
    pub fn instantiate(&self, chain_id: u64, address: &str, now: DateTime<Utc>) -> TrackedToken {
        let pipeline = self
            .pipeline
            .iter()
            .map(|stage| StageRecord {
                state: Some(
                    stage
                        .state
                        .unwrap_or_else(|| StageState::initial(&stage.prerequisite_tasks)),
                ),
                ..stage.clone()
            })
            .collect();

        TrackedToken {
            uuid: Uuid::new_v4(),
            chain_id,
            address: address.to_string(),
            tracking: true,
            aborted: false,
            completed: false,
            current_stage_index: 0,
            scheduled_execution_time: Some(now),
            latest_execution_time: None,
            pipeline,
            tasks: self.tasks.clone(),
            insights: IndexMap::new(),
        }
    }
}
