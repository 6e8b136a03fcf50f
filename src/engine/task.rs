// ABOUTME: Task unit state machine with repetition budget and scheduling policy
// ABOUTME: Runs one check per tick and exposes the task's latest insight to its peers

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, instrument, warn};

use super::context::{ContextExecutor, TaskLookup};
use super::error::{ExecutionError, Result};
use crate::parser::{Repetitions, TaskRecord, TokenRef};
use crate::tasks::TaskImplementation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    #[default]
    Pending,
    Activated,
    InProgress,
    Done,
    Disactivated,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "PENDING",
            TaskState::Activated => "ACTIVATED",
            TaskState::InProgress => "IN_PROGRESS",
            TaskState::Done => "DONE",
            TaskState::Disactivated => "DISACTIVATED",
            TaskState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckOutcome {
    Done,
    Halted,
}

#[derive(Debug, Clone)]
struct TaskRuntime {
    state: TaskState,
    repetitions: Repetitions,
    delay: Option<u64>,
    daemon: Option<bool>,
    scheduled_execution_time: Option<DateTime<Utc>>,
    insight: Option<serde_json::Value>,
    abort_reason: Option<String>,
}

impl TaskRuntime {
    fn is_lazy(&self) -> bool {
        self.repetitions.interval.is_none()
    }

    fn is_daemon(&self) -> bool {
        self.daemon.unwrap_or(false)
    }

    fn is_alive(&self) -> bool {
        matches!(self.state, TaskState::Activated | TaskState::InProgress)
            || (self.is_daemon() && self.state != TaskState::Disactivated)
    }

    fn should_not_repeat(&self, now: DateTime<Utc>) -> bool {
        if self.is_lazy() || self.is_daemon() {
            return false;
        }
        let deadline_passed = self
            .repetitions
            .deadline
            .is_some_and(|deadline| now >= deadline);
        deadline_passed || self.repetitions.repeat.unwrap_or(0) <= self.repetitions.count
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_execution_time.map_or(true, |at| at <= now)
    }

    fn should_execute(&self, now: DateTime<Utc>) -> bool {
        self.is_alive() && self.is_due(now) && !self.should_not_repeat(now)
    }

    /// Forces an exhausted task out of the alive set. Returns true on transition.
    fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_alive() && self.should_not_repeat(now) {
            self.state = TaskState::Disactivated;
            return true;
        }
        false
    }

    /// Next wake-up after a run; the delay applies only after the first run.
    fn next_execution_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let interval = self.repetitions.interval?;
        let delay = if self.repetitions.count == 1 {
            self.delay.unwrap_or(0)
        } else {
            0
        };
        let seconds = i64::try_from(delay.saturating_add(interval)).ok()?;
        now.checked_add_signed(Duration::try_seconds(seconds)?)
    }
}

/// One named check inside a token's pipeline.
pub struct TaskUnit {
    task_id: String,
    kind: String,
    config: serde_json::Value,
    implementation: Arc<dyn TaskImplementation>,
    runtime: Mutex<TaskRuntime>,
}

impl fmt::Debug for TaskUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskUnit")
            .field("task_id", &self.task_id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl TaskUnit {
    /// Rehydrate a unit from its persisted record and the insight its kind last published
    pub fn new(
        record: TaskRecord,
        implementation: Arc<dyn TaskImplementation>,
        previous_insight: Option<serde_json::Value>,
    ) -> Self {
        let runtime = TaskRuntime {
            state: record.state,
            repetitions: record.repetitions,
            delay: record.delay,
            daemon: record.daemon,
            scheduled_execution_time: record.scheduled_execution_time,
            insight: previous_insight,
            abort_reason: None,
        };

        Self {
            task_id: record.task_id,
            kind: record.kind,
            config: record.config,
            implementation,
            runtime: Mutex::new(runtime),
        }
    }

    // The lock is never held across an await point.
    fn runtime(&self) -> MutexGuard<'_, TaskRuntime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    pub fn insight_key(&self) -> &'static str {
        self.implementation.insight_key()
    }

    pub fn state(&self) -> TaskState {
        self.runtime().state
    }

    pub fn count(&self) -> u32 {
        self.runtime().repetitions.count
    }

    pub fn is_lazy(&self) -> bool {
        self.runtime().is_lazy()
    }

    pub fn is_daemon(&self) -> bool {
        self.runtime().is_daemon()
    }

    /// True while ACTIVATED or IN_PROGRESS, or for a daemon that was not disactivated
    pub fn is_alive(&self) -> bool {
        self.runtime().is_alive()
    }

    pub fn is_completed(&self) -> bool {
        self.state() == TaskState::Done
    }

    pub fn is_aborted(&self) -> bool {
        self.runtime().abort_reason.is_some()
    }

    pub fn abort_reason(&self) -> Option<String> {
        self.runtime().abort_reason.clone()
    }

    /// Budget spent or deadline passed; never true for lazy or daemon tasks
    pub fn should_not_repeat(&self, now: DateTime<Utc>) -> bool {
        self.runtime().should_not_repeat(now)
    }

    pub fn should_execute(&self, now: DateTime<Utc>) -> bool {
        self.runtime().should_execute(now)
    }

    /// Scheduled wake-up as persisted; lazy tasks never carry one
    pub fn scheduled_execution_time(&self) -> Option<DateTime<Utc>> {
        let runtime = self.runtime();
        if runtime.is_lazy() {
            None
        } else {
            runtime.scheduled_execution_time
        }
    }

    /// Wake-up that should drive the token's next tick, if any
    pub fn pending_execution_time(&self) -> Option<DateTime<Utc>> {
        let runtime = self.runtime();
        if runtime.is_alive() && !runtime.is_lazy() {
            runtime.scheduled_execution_time
        } else {
            None
        }
    }

    pub fn insight(&self) -> Option<serde_json::Value> {
        self.runtime().insight.clone()
    }

    /// PENDING -> ACTIVATED; any other state is left alone
    pub fn activate(&self) -> bool {
        let mut runtime = self.runtime();
        if runtime.state == TaskState::Pending {
            runtime.state = TaskState::Activated;
            debug!("Task {} activated", self.task_id);
            return true;
        }
        false
    }

    pub(crate) fn expire(&self, now: DateTime<Utc>) -> bool {
        let expired = self.runtime().expire(now);
        if expired {
            debug!("Task {} exhausted its repetition budget", self.task_id);
        }
        expired
    }

    pub fn to_record(&self) -> TaskRecord {
        let runtime = self.runtime();
        TaskRecord {
            task_id: self.task_id.clone(),
            kind: self.kind.clone(),
            state: runtime.state,
            repetitions: runtime.repetitions.clone(),
            delay: runtime.delay,
            daemon: runtime.daemon,
            scheduled_execution_time: if runtime.is_lazy() {
                None
            } else {
                runtime.scheduled_execution_time
            },
            config: self.config.clone(),
        }
    }

    /// Run at most one check for this tick.
    ///
    /// Call through [`ContextExecutor::execute`] so concurrent pulls share
    /// one run.
    #[instrument(
        name = "task_tick",
        skip(self, context),
        fields(task_id = %self.task_id, kind = %self.kind)
    )]
    pub async fn tick(&self, context: &ContextExecutor) -> Result<()> {
        let now = context.now();
        let previous_insight = {
            let mut runtime = self.runtime();
            if runtime.expire(now) {
                debug!("Task {} exhausted its repetition budget", self.task_id);
            }
            if !runtime.should_execute(now) {
                debug!("Task {} not due (state: {})", self.task_id, runtime.state);
                return Ok(());
            }
            runtime.state = TaskState::InProgress;
            runtime.insight.clone()
        };

        info!("Executing task: {} (kind: {})", self.task_id, self.kind);

        let mut scope = CheckScope::new(self, context, previous_insight);
        if let Err(e) = self.implementation.check(&mut scope).await {
            self.runtime().state = TaskState::Failed;
            let error = ExecutionError::TaskExecution {
                task_id: self.task_id.clone(),
                kind: self.kind.clone(),
                message: format!("{:#}", e),
            };
            error!("Task {} failed: {}", self.task_id, error);
            return Err(error);
        }
        let CheckScope {
            outcome,
            published,
            abort_reason,
            ..
        } = scope;

        let mut runtime = self.runtime();
        if let Some(insight) = published {
            runtime.insight = Some(insight);
        }
        if let Some(reason) = abort_reason {
            warn!("Task {} aborted the pipeline: {}", self.task_id, reason);
            runtime.abort_reason = Some(reason);
        }
        match outcome {
            Some(CheckOutcome::Done) => runtime.state = TaskState::Done,
            Some(CheckOutcome::Halted) => runtime.state = TaskState::Disactivated,
            None => {}
        }
        runtime.repetitions.count = runtime.repetitions.count.saturating_add(1);
        runtime.scheduled_execution_time = runtime.next_execution_time(now);
        runtime.expire(now);

        info!(
            "Task {} finished run {} with state {}",
            self.task_id, runtime.repetitions.count, runtime.state
        );
        Ok(())
    }
}

/// Handle a check uses to read its inputs and report its outcome.
///
/// Outcome calls are last-one-wins; a check that reports nothing stays
/// IN_PROGRESS and keeps repeating.
pub struct CheckScope<'a> {
    unit: &'a TaskUnit,
    context: &'a ContextExecutor,
    previous_insight: Option<serde_json::Value>,
    outcome: Option<CheckOutcome>,
    published: Option<serde_json::Value>,
    abort_reason: Option<String>,
}

impl<'a> CheckScope<'a> {
    fn new(
        unit: &'a TaskUnit,
        context: &'a ContextExecutor,
        previous_insight: Option<serde_json::Value>,
    ) -> Self {
        Self {
            unit,
            context,
            previous_insight,
            outcome: None,
            published: None,
            abort_reason: None,
        }
    }

    pub fn task_id(&self) -> &str {
        self.unit.task_id()
    }

    pub fn token(&self) -> &TokenRef {
        self.context.token()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.context.now()
    }

    /// Deserialize this task's config; a missing config reads as `{}`
    pub fn config<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let value = match self.unit.config() {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other.clone(),
        };
        Ok(serde_json::from_value(value)?)
    }

    /// Insight this task published on an earlier run
    pub fn previous_insight(&self) -> Option<&serde_json::Value> {
        self.previous_insight.as_ref()
    }

    /// Pull another task for this tick and read its insight
    pub async fn latest_insight(&self, task_id: &str) -> Result<Option<serde_json::Value>> {
        self.context.get_latest_insight(task_id).await
    }

    pub fn is_task_active(&self, task_id: &str) -> bool {
        self.context.is_task_active(task_id)
    }

    pub fn is_task_completed(&self, task_id: &str) -> bool {
        self.context.is_task_completed(task_id)
    }

    pub fn publish(&mut self, insight: serde_json::Value) {
        self.published = Some(insight);
    }

    pub fn complete(&mut self) {
        self.outcome = Some(CheckOutcome::Done);
    }

    pub fn halt(&mut self) {
        self.outcome = Some(CheckOutcome::Halted);
    }

    /// Raise the token-wide abort flag
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.abort_reason = Some(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn runtime(state: TaskState) -> TaskRuntime {
        TaskRuntime {
            state,
            repetitions: Repetitions::default(),
            delay: None,
            daemon: None,
            scheduled_execution_time: None,
            insight: None,
            abort_reason: None,
        }
    }

    #[test]
    fn test_lazy_task_never_exhausts() {
        let mut lazy = runtime(TaskState::Activated);
        lazy.repetitions.count = 50;
        lazy.repetitions.repeat = Some(1);
        lazy.repetitions.deadline = Some(at(0));

        assert!(lazy.is_lazy());
        assert!(!lazy.should_not_repeat(at(100)));
        assert!(lazy.next_execution_time(at(100)).is_none());
    }

    #[test]
    fn test_daemon_never_exhausts() {
        let mut daemon = runtime(TaskState::Done);
        daemon.daemon = Some(true);
        daemon.repetitions.interval = Some(30);
        daemon.repetitions.repeat = Some(1);
        daemon.repetitions.count = 9;

        assert!(daemon.is_alive());
        assert!(!daemon.should_not_repeat(at(0)));
    }

    #[test]
    fn test_missing_repeat_means_zero_runs() {
        let mut task = runtime(TaskState::Activated);
        task.repetitions.interval = Some(30);

        assert!(task.should_not_repeat(at(0)));
        assert!(!task.should_execute(at(0)));
    }

    #[test]
    fn test_deadline_exhausts_budget() {
        let mut task = runtime(TaskState::Activated);
        task.repetitions.interval = Some(30);
        task.repetitions.repeat = Some(10);
        task.repetitions.deadline = Some(at(60));

        assert!(!task.should_not_repeat(at(59)));
        assert!(task.should_not_repeat(at(60)));
    }

    #[test]
    fn test_should_execute_respects_schedule() {
        let mut task = runtime(TaskState::Activated);
        task.repetitions.interval = Some(30);
        task.repetitions.repeat = Some(3);
        task.scheduled_execution_time = Some(at(30));

        assert!(!task.should_execute(at(29)));
        assert!(task.should_execute(at(30)));
    }

    #[test]
    fn test_only_alive_states_execute() {
        for state in [
            TaskState::Pending,
            TaskState::Done,
            TaskState::Disactivated,
            TaskState::Failed,
        ] {
            let mut task = runtime(state);
            task.repetitions.interval = Some(30);
            task.repetitions.repeat = Some(3);
            assert!(!task.should_execute(at(0)), "{} should not execute", state);
        }
    }

    #[test]
    fn test_delay_applies_after_first_run_only() {
        let mut task = runtime(TaskState::InProgress);
        task.repetitions.interval = Some(30);
        task.delay = Some(120);

        task.repetitions.count = 1;
        assert_eq!(task.next_execution_time(at(0)), Some(at(150)));

        task.repetitions.count = 2;
        assert_eq!(task.next_execution_time(at(0)), Some(at(30)));
    }

    #[test]
    fn test_expire_keeps_done_non_daemon_task() {
        let mut task = runtime(TaskState::Done);
        task.repetitions.interval = Some(30);

        assert!(!task.expire(at(0)));
        assert_eq!(task.state, TaskState::Done);
    }

    #[test]
    fn test_expire_disactivates_exhausted_alive_task() {
        let mut task = runtime(TaskState::InProgress);
        task.repetitions.interval = Some(30);
        task.repetitions.repeat = Some(2);
        task.repetitions.count = 2;

        assert!(task.expire(at(0)));
        assert_eq!(task.state, TaskState::Disactivated);
    }

    #[test]
    fn test_task_state_serializes_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskState::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
        assert_eq!(
            serde_json::from_str::<TaskState>("\"DISACTIVATED\"").unwrap(),
            TaskState::Disactivated
        );
    }
}
