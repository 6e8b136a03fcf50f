// ABOUTME: Per-tick execution context shared by every task of one token
// ABOUTME: Memoizes task runs so a task executes at most once per tick however often it is pulled

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::debug;

use super::error::{ExecutionError, Result};
use super::task::TaskUnit;
use crate::parser::TokenRef;

/// Read-only view of task liveness used by stage gates and checks.
pub trait TaskLookup {
    fn is_task_completed(&self, task_id: &str) -> bool;
    fn is_task_active(&self, task_id: &str) -> bool;
}

/// All task units of one token, keyed by task id in pipeline order.
#[derive(Debug, Default)]
pub struct TaskMap {
    tasks: IndexMap<String, Arc<TaskUnit>>,
}

impl TaskMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, unit: TaskUnit) -> Arc<TaskUnit> {
        let unit = Arc::new(unit);
        self.tasks
            .insert(unit.task_id().to_string(), Arc::clone(&unit));
        unit
    }

    pub fn get(&self, task_id: &str) -> Option<&Arc<TaskUnit>> {
        self.tasks.get(task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TaskUnit>> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl TaskLookup for TaskMap {
    fn is_task_completed(&self, task_id: &str) -> bool {
        self.get(task_id).is_some_and(|unit| unit.is_completed())
    }

    fn is_task_active(&self, task_id: &str) -> bool {
        self.get(task_id).is_some_and(|unit| unit.is_alive())
    }
}

type Execution = Arc<OnceCell<Result<()>>>;

/// Scope of a single tick for a single token.
pub struct ContextExecutor {
    token: TokenRef,
    tasks: Arc<TaskMap>,
    now: DateTime<Utc>,
    executions: Mutex<HashMap<String, Execution>>,
}

impl ContextExecutor {
    pub fn new(token: TokenRef, tasks: Arc<TaskMap>, now: DateTime<Utc>) -> Self {
        Self {
            token,
            tasks,
            now,
            executions: Mutex::new(HashMap::new()),
        }
    }

    pub fn token(&self) -> &TokenRef {
        &self.token
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn tasks(&self) -> &TaskMap {
        &self.tasks
    }

    /// Ids of the tasks pulled so far during this tick
    pub fn executed_tasks(&self) -> Vec<String> {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn execution(&self, task_id: &str) -> Execution {
        let mut executions = self.executions.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(executions.entry(task_id.to_string()).or_default())
    }

    /// Tick a task once for this context.
    ///
    /// Later and concurrent callers await the first run and receive the same
    /// outcome. A task that pulls itself, directly or through a cycle, never
    /// resolves.
    pub fn execute<'a>(&'a self, task_id: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            let unit = self
                .tasks
                .get(task_id)
                .cloned()
                .ok_or_else(|| ExecutionError::TaskNotFound {
                    task_id: task_id.to_string(),
                })?;

            let execution = self.execution(task_id);
            let outcome = execution
                .get_or_init(|| async {
                    debug!("First pull of task {} in this tick", task_id);
                    unit.tick(self).await
                })
                .await;
            outcome.clone()
        }
        .boxed()
    }

    /// Execute `task_id` for this tick, then read the insight it holds
    pub async fn get_latest_insight(&self, task_id: &str) -> Result<Option<serde_json::Value>> {
        self.execute(task_id).await?;
        let unit = self
            .tasks
            .get(task_id)
            .ok_or_else(|| ExecutionError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        Ok(unit.insight())
    }
}

impl TaskLookup for ContextExecutor {
    fn is_task_completed(&self, task_id: &str) -> bool {
        self.tasks.is_task_completed(task_id)
    }

    fn is_task_active(&self, task_id: &str) -> bool {
        self.tasks.is_task_active(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::task::CheckScope;
    use crate::engine::TaskState;
    use crate::parser::TaskRecord;
    use crate::tasks::TaskImplementation;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingTask {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TaskImplementation for CountingTask {
        fn kind(&self) -> &'static str {
            "counting"
        }

        fn insight_key(&self) -> &'static str {
            "counting"
        }

        fn validate_config(&self, _task_id: &str, _config: &serde_json::Value) -> Result<()> {
            Ok(())
        }

        async fn check(&self, scope: &mut CheckScope<'_>) -> anyhow::Result<()> {
            let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::task::yield_now().await;
            scope.publish(serde_json::json!({ "calls": calls }));
            Ok(())
        }
    }

    fn context_with(task_id: &str, calls: Arc<AtomicUsize>) -> ContextExecutor {
        let mut record = TaskRecord::new(task_id, "counting");
        record.state = TaskState::Activated;

        let mut tasks = TaskMap::new();
        tasks.insert(TaskUnit::new(record, Arc::new(CountingTask { calls }), None));

        let token = TokenRef {
            uuid: Uuid::new_v4(),
            chain_id: 1,
            address: "0xabc".to_string(),
        };
        ContextExecutor::new(
            token,
            Arc::new(tasks),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_concurrent_pulls_share_one_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let context = context_with("sensor", Arc::clone(&calls));

        let (a, b, c) = tokio::join!(
            context.execute("sensor"),
            context.get_latest_insight("sensor"),
            context.execute("sensor"),
        );

        assert!(a.is_ok());
        assert_eq!(b.unwrap(), Some(serde_json::json!({ "calls": 1 })));
        assert!(c.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(context.executed_tasks(), vec!["sensor".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_task_is_reported() {
        let context = context_with("sensor", Arc::new(AtomicUsize::new(0)));

        let result = context.get_latest_insight("ghost").await;
        assert_eq!(
            result,
            Err(ExecutionError::TaskNotFound {
                task_id: "ghost".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_lookup_reflects_task_state() {
        let context = context_with("sensor", Arc::new(AtomicUsize::new(0)));

        assert!(context.is_task_active("sensor"));
        assert!(!context.is_task_completed("sensor"));
        assert!(!context.is_task_active("ghost"));
    }
}
