// ABOUTME: Stage gate grouping tasks behind a set of prerequisite tasks
// ABOUTME: Unlocks on completed prerequisites and aggregates owned task states into a stage state

use futures::future;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::context::{ContextExecutor, TaskLookup, TaskMap};
use super::error::{ExecutionError, Result};
use super::task::{TaskState, TaskUnit};
use crate::parser::StageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageState {
    Locked,
    Unlocked,
    InProgress,
    Halted,
    Done,
}

impl StageState {
    /// State of a stage that was never persisted
    pub fn initial(prerequisite_tasks: &[String]) -> Self {
        if prerequisite_tasks.is_empty() {
            StageState::Unlocked
        } else {
            StageState::Locked
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StageState::Halted | StageState::Done)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageState::Locked => "LOCKED",
            StageState::Unlocked => "UNLOCKED",
            StageState::InProgress => "IN_PROGRESS",
            StageState::Halted => "HALTED",
            StageState::Done => "DONE",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct StageGate {
    stage_id: String,
    state: StageState,
    prerequisite_tasks: Vec<String>,
    tasks: Vec<Arc<TaskUnit>>,
}

impl StageGate {
    /// Build a gate over already-loaded task units.
    ///
    /// An UNLOCKED stage activates its PENDING tasks straight away.
    pub fn new(record: &StageRecord, units: &TaskMap) -> Result<Self> {
        let tasks = record
            .task_ids
            .iter()
            .map(|task_id| {
                units
                    .get(task_id)
                    .cloned()
                    .ok_or_else(|| ExecutionError::InvalidPipeline {
                        message: format!(
                            "stage '{}' owns unknown task '{}'",
                            record.stage_id, task_id
                        ),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let state = record
            .state
            .unwrap_or_else(|| StageState::initial(&record.prerequisite_tasks));

        let gate = Self {
            stage_id: record.stage_id.clone(),
            state,
            prerequisite_tasks: record.prerequisite_tasks.clone(),
            tasks,
        };
        if gate.state == StageState::Unlocked {
            gate.activate_tasks();
        }
        Ok(gate)
    }

    pub fn stage_id(&self) -> &str {
        &self.stage_id
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn prerequisite_tasks(&self) -> &[String] {
        &self.prerequisite_tasks
    }

    pub fn tasks(&self) -> &[Arc<TaskUnit>] {
        &self.tasks
    }

    fn activate_tasks(&self) {
        for task in &self.tasks {
            task.activate();
        }
    }

    fn transition(&mut self, next: StageState) {
        if self.state != next {
            info!("Stage {}: {} -> {}", self.stage_id, self.state, next);
            self.state = next;
        }
    }

    /// Unlock when every prerequisite task is DONE. Returns true on transition.
    pub fn attempt_unlock(&mut self, lookup: &dyn TaskLookup) -> bool {
        if self.state != StageState::Locked {
            return false;
        }
        let blocked: Vec<&str> = self
            .prerequisite_tasks
            .iter()
            .filter(|task_id| !lookup.is_task_completed(task_id))
            .map(String::as_str)
            .collect();
        if !blocked.is_empty() {
            debug!("Stage {} still waiting on {:?}", self.stage_id, blocked);
            return false;
        }
        self.transition(StageState::Unlocked);
        self.activate_tasks();
        true
    }

    /// Run the owned tasks that are due and fold their states into the stage state
    #[instrument(name = "stage_execute", skip(self, context), fields(stage_id = %self.stage_id))]
    pub async fn execute(&mut self, context: &ContextExecutor) -> Result<()> {
        let now = context.now();
        let mut expired = false;
        for task in &self.tasks {
            expired |= task.expire(now);
        }

        let selected: Vec<String> = self
            .tasks
            .iter()
            .filter(|task| task.should_execute(now))
            .map(|task| task.task_id().to_string())
            .collect();

        if selected.is_empty() && !expired {
            debug!("Stage {} has no task due", self.stage_id);
            return Ok(());
        }

        if matches!(self.state, StageState::Locked | StageState::Unlocked) {
            self.transition(StageState::InProgress);
        }

        info!(
            "Executing stage {} with {} tasks: {:?}",
            self.stage_id,
            selected.len(),
            selected
        );
        future::try_join_all(selected.iter().map(|task_id| context.execute(task_id))).await?;

        if !self.state.is_terminal() {
            if self.all_tasks_in(TaskState::Disactivated) {
                self.transition(StageState::Halted);
            } else if self.all_tasks_in(TaskState::Done) {
                self.transition(StageState::Done);
            }
        }
        Ok(())
    }

    fn all_tasks_in(&self, state: TaskState) -> bool {
        self.tasks.iter().all(|task| task.state() == state)
    }

    pub fn to_record(&self) -> StageRecord {
        StageRecord {
            stage_id: self.stage_id.clone(),
            state: Some(self.state),
            task_ids: self
                .tasks
                .iter()
                .map(|task| task.task_id().to_string())
                .collect(),
            prerequisite_tasks: self.prerequisite_tasks.clone(),
        }
    }
}
