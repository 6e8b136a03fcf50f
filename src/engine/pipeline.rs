// ABOUTME: Pipeline run driving one token's ordered stages through a tick
// ABOUTME: Loads a snapshot, runs the current stage, advances at most one stage and emits the next snapshot

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::clock::Clock;
use super::context::{ContextExecutor, TaskMap};
use super::error::{ExecutionError, Result};
use super::stage::{StageGate, StageState};
use crate::parser::TrackedToken;
use crate::tasks::TaskRegistry;

pub struct PipelineRun {
    token: TrackedToken,
    stages: Vec<StageGate>,
    tasks: Arc<TaskMap>,
    current_stage_index: usize,
    clock: Arc<dyn Clock>,
    last_tick: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Rehydrate the runtime graph of a tracked token
    pub fn load(
        token: TrackedToken,
        registry: &TaskRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        check_structure(&token)?;

        let mut tasks = TaskMap::new();
        for record in token.tasks.values() {
            tasks.insert(registry.build(record.clone(), &token.insights)?);
        }

        let stages = token
            .pipeline
            .iter()
            .map(|record| StageGate::new(record, &tasks))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Loaded token {} with {} stages and {} tasks",
            token.uuid,
            stages.len(),
            tasks.len()
        );

        Ok(Self {
            current_stage_index: token.current_stage_index,
            token,
            stages,
            tasks: Arc::new(tasks),
            clock,
            last_tick: None,
        })
    }

    pub fn current_stage_index(&self) -> usize {
        self.current_stage_index
    }

    pub fn current_stage(&self) -> Option<&StageGate> {
        self.stages.get(self.current_stage_index)
    }

    pub fn stages(&self) -> &[StageGate] {
        &self.stages
    }

    pub fn tasks(&self) -> &TaskMap {
        &self.tasks
    }

    /// Last stage reached and DONE
    pub fn is_completed(&self) -> bool {
        self.current_stage_index + 1 == self.stages.len()
            && self
                .current_stage()
                .is_some_and(|stage| stage.state() == StageState::Done)
    }

    pub fn is_aborted(&self) -> bool {
        self.token.aborted || self.tasks.iter().any(|task| task.is_aborted())
    }

    /// Run one tick.
    ///
    /// On error the in-memory run may be partially advanced and must not be
    /// persisted.
    #[instrument(
        name = "pipeline_tick",
        skip(self),
        fields(token = %self.token.uuid, stage_index = self.current_stage_index)
    )]
    pub async fn execute(&mut self) -> Result<()> {
        if self.is_completed() {
            debug!("Token {} already completed, nothing to run", self.token.uuid);
            return Ok(());
        }

        let now = self.clock.now();
        self.last_tick = Some(now);
        let context = ContextExecutor::new(self.token.token_ref(), Arc::clone(&self.tasks), now);

        let index = self.current_stage_index;
        let stage = self
            .stages
            .get_mut(index)
            .ok_or_else(|| ExecutionError::InvalidPipeline {
                message: format!("current stage index {} is out of range", index),
            })?;
        stage.execute(&context).await?;

        if let Some(next) = self.stages.get_mut(index + 1) {
            next.attempt_unlock(&context);
            if next.state() == StageState::Unlocked {
                self.current_stage_index = index + 1;
                info!(
                    "Token {} advanced to stage {} ({})",
                    self.token.uuid,
                    self.current_stage_index,
                    next.stage_id()
                );
            }
        }

        if self.is_aborted() {
            warn!("Token {} aborted during tick", self.token.uuid);
        } else if self.is_completed() {
            info!("Token {} completed its pipeline", self.token.uuid);
        }
        Ok(())
    }

    /// Build the snapshot to persist.
    ///
    /// `scheduledExecutionTime` is the earliest wake-up among alive non-lazy
    /// tasks, or absent when none asks for one.
    pub fn result(&self) -> TrackedToken {
        let completed = self.is_completed();
        let aborted = self.is_aborted();

        let mut insights = self.token.insights.clone();
        for task in self.tasks.iter() {
            if let Some(insight) = task.insight() {
                insights.insert(task.insight_key().to_string(), insight);
            }
        }

        let scheduled_execution_time = self
            .tasks
            .iter()
            .filter_map(|task| task.pending_execution_time())
            .min();

        TrackedToken {
            uuid: self.token.uuid,
            chain_id: self.token.chain_id,
            address: self.token.address.clone(),
            tracking: !completed && !aborted,
            aborted,
            completed,
            current_stage_index: self.current_stage_index,
            scheduled_execution_time,
            latest_execution_time: Some(self.last_tick.unwrap_or_else(|| self.clock.now())),
            pipeline: self.stages.iter().map(StageGate::to_record).collect(),
            tasks: self
                .tasks
                .iter()
                .map(|task| (task.task_id().to_string(), task.to_record()))
                .collect(),
            insights,
        }
    }
}

/// Structural invariants every snapshot must satisfy before it is run.
fn check_structure(token: &TrackedToken) -> Result<()> {
    if token.pipeline.is_empty() {
        return Err(ExecutionError::InvalidPipeline {
            message: format!("token {} has no stages", token.uuid),
        });
    }
    if token.current_stage_index >= token.pipeline.len() {
        return Err(ExecutionError::InvalidPipeline {
            message: format!(
                "current stage index {} is out of range for {} stages",
                token.current_stage_index,
                token.pipeline.len()
            ),
        });
    }

    let mut owned = HashSet::new();
    for stage in &token.pipeline {
        for task_id in stage.task_ids.iter().chain(&stage.prerequisite_tasks) {
            if !token.tasks.contains_key(task_id) {
                return Err(ExecutionError::InvalidPipeline {
                    message: format!(
                        "stage '{}' references unknown task '{}'",
                        stage.stage_id, task_id
                    ),
                });
            }
        }
        for task_id in &stage.task_ids {
            if !owned.insert(task_id.as_str()) {
                return Err(ExecutionError::InvalidPipeline {
                    message: format!("task '{}' is owned by more than one stage", task_id),
                });
            }
        }
    }
    Ok(())
}

/// Load, run one tick and return the snapshot to persist
pub async fn tick(
    token: TrackedToken,
    registry: &TaskRegistry,
    clock: Arc<dyn Clock>,
) -> Result<TrackedToken> {
    let mut run = PipelineRun::load(token, registry, clock)?;
    run.execute().await?;
    Ok(run.result())
}
