// ABOUTME: Validation of pipeline templates and tracked-token snapshots
// ABOUTME: Checks stage ownership, prerequisites, task kinds, task configs and insight key collisions

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

use super::error::ValidationError;
use super::template::PipelineTemplate;
use super::token::{StageRecord, TaskRecord, TrackedToken};
use crate::tasks::TaskRegistry;

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
    pub is_valid: bool,
}

pub struct TemplateValidator<'a> {
    registry: &'a TaskRegistry,
    strict_mode: bool,
}

impl<'a> TemplateValidator<'a> {
    pub fn new(registry: &'a TaskRegistry) -> Self {
        Self {
            registry,
            strict_mode: false,
        }
    }

    /// In strict mode, tasks no stage owns are errors instead of warnings
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Validate a pipeline template
    pub fn validate(&self, template: &PipelineTemplate) -> ValidationReport {
        let mut report = ValidationReport::new();
        self.validate_graph(&template.pipeline, &template.tasks, &mut report);
        report.is_valid = report.errors.is_empty();
        report
    }

    /// Validate a persisted snapshot before it is ticked
    pub fn validate_token(&self, token: &TrackedToken) -> ValidationReport {
        let mut report = ValidationReport::new();
        self.validate_graph(&token.pipeline, &token.tasks, &mut report);

        if !token.pipeline.is_empty() && token.current_stage_index >= token.pipeline.len() {
            report.errors.push(ValidationError::StageIndexOutOfRange {
                index: token.current_stage_index,
                stages: token.pipeline.len(),
            });
        }

        report.is_valid = report.errors.is_empty();
        report
    }

    fn validate_graph(
        &self,
        pipeline: &[StageRecord],
        tasks: &IndexMap<String, TaskRecord>,
        report: &mut ValidationReport,
    ) {
        if pipeline.is_empty() {
            report.errors.push(ValidationError::EmptyPipeline);
            return;
        }

        let owners = self.validate_stages(pipeline, tasks, report);
        self.validate_prerequisites(pipeline, tasks, &owners, report);
        self.validate_tasks(tasks, report);
        self.validate_insight_keys(tasks, report);
        self.check_unowned_tasks(tasks, &owners, report);
    }

    /// Stage ids, ownership and task existence. Returns task id -> owning stage index.
    fn validate_stages(
        &self,
        pipeline: &[StageRecord],
        tasks: &IndexMap<String, TaskRecord>,
        report: &mut ValidationReport,
    ) -> HashMap<String, usize> {
        let mut stage_ids = HashSet::new();
        let mut owners: HashMap<String, usize> = HashMap::new();

        for (index, stage) in pipeline.iter().enumerate() {
            if !stage_ids.insert(stage.stage_id.as_str()) {
                report.errors.push(ValidationError::DuplicateStage {
                    stage: stage.stage_id.clone(),
                });
            }
            if stage.task_ids.is_empty() {
                report.errors.push(ValidationError::EmptyStage {
                    stage: stage.stage_id.clone(),
                });
            }

            for task_id in &stage.task_ids {
                if !tasks.contains_key(task_id) {
                    report.errors.push(ValidationError::UnknownStageTask {
                        stage: stage.stage_id.clone(),
                        task: task_id.clone(),
                    });
                    continue;
                }
                if let Some(&first) = owners.get(task_id) {
                    report.errors.push(ValidationError::TaskInMultipleStages {
                        task: task_id.clone(),
                        first: pipeline[first].stage_id.clone(),
                        second: stage.stage_id.clone(),
                    });
                } else {
                    owners.insert(task_id.clone(), index);
                }
            }
        }

        owners
    }

    fn validate_prerequisites(
        &self,
        pipeline: &[StageRecord],
        tasks: &IndexMap<String, TaskRecord>,
        owners: &HashMap<String, usize>,
        report: &mut ValidationReport,
    ) {
        for (index, stage) in pipeline.iter().enumerate() {
            for prerequisite in &stage.prerequisite_tasks {
                if !tasks.contains_key(prerequisite) {
                    report.errors.push(ValidationError::UnknownPrerequisite {
                        stage: stage.stage_id.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                    continue;
                }
                match owners.get(prerequisite) {
                    Some(&owner) if owner >= index => report.warnings.push(format!(
                        "Stage '{}' waits on task '{}' which only activates in stage '{}'",
                        stage.stage_id, prerequisite, pipeline[owner].stage_id
                    )),
                    None => report.warnings.push(format!(
                        "Stage '{}' waits on task '{}' which no stage activates",
                        stage.stage_id, prerequisite
                    )),
                    _ => {}
                }
            }
        }
    }

    /// Kind support and per-kind config checks
    fn validate_tasks(&self, tasks: &IndexMap<String, TaskRecord>, report: &mut ValidationReport) {
        for (task_id, record) in tasks {
            if self.registry.get_implementation(&record.kind).is_none() {
                report.errors.push(ValidationError::UnsupportedTaskKind {
                    task: task_id.clone(),
                    kind: record.kind.clone(),
                    supported_kinds: self
                        .registry
                        .supported_kinds()
                        .into_iter()
                        .map(|kind| kind.to_string())
                        .collect(),
                });
                continue;
            }

            if let Err(e) = self
                .registry
                .validate_task_config(task_id, &record.kind, &record.config)
            {
                report.errors.push(ValidationError::InvalidTaskConfig {
                    task: task_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Each insight key may be published by one task only
    fn validate_insight_keys(
        &self,
        tasks: &IndexMap<String, TaskRecord>,
        report: &mut ValidationReport,
    ) {
        let mut publishers: HashMap<&str, &str> = HashMap::new();
        for (task_id, record) in tasks {
            let Some(implementation) = self.registry.get_implementation(&record.kind) else {
                continue;
            };
            let insight_key = implementation.insight_key();
            if let Some(first) = publishers.insert(insight_key, task_id.as_str()) {
                report.errors.push(ValidationError::DuplicateInsightKey {
                    insight_key: insight_key.to_string(),
                    first: first.to_string(),
                    second: task_id.clone(),
                });
            }
        }
    }

    fn check_unowned_tasks(
        &self,
        tasks: &IndexMap<String, TaskRecord>,
        owners: &HashMap<String, usize>,
        report: &mut ValidationReport,
    ) {
        for task_id in tasks.keys() {
            if owners.contains_key(task_id) {
                continue;
            }
            if self.strict_mode {
                report.errors.push(ValidationError::UnownedTask {
                    task: task_id.clone(),
                });
            } else {
                report.warnings.push(format!(
                    "Task '{}' is not owned by any stage and only runs when pulled",
                    task_id
                ));
            }
        }
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            is_valid: true,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
