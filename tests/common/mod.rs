// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides a tracked-token builder, scripted task kinds and a fixed test clock

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use tokenwatch::engine::{CheckScope, ExecutionError, ManualClock, StageState, TaskState};
use tokenwatch::parser::{StageRecord, TaskRecord, TrackedToken};
use tokenwatch::tasks::{TaskImplementation, TaskRegistry};

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(epoch()))
}

/// What a scripted check does each time it runs.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Publish a run counter and report nothing
    Idle,
    Complete,
    Halt,
    Abort(String),
    Fail(String),
    /// Pull another task's insight, republish it, then complete
    Pull(String),
}

pub struct ScriptedTask {
    kind: &'static str,
    behaviour: Behaviour,
    calls: Arc<AtomicUsize>,
}

impl ScriptedTask {
    pub fn new(kind: &'static str, behaviour: Behaviour) -> Self {
        Self {
            kind,
            behaviour,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl TaskImplementation for ScriptedTask {
    fn kind(&self) -> &'static str {
        self.kind
    }

    // Each scripted kind owns the insight key named after it.
    fn insight_key(&self) -> &'static str {
        self.kind
    }

    fn validate_config(
        &self,
        _task_id: &str,
        _config: &serde_json::Value,
    ) -> Result<(), ExecutionError> {
        Ok(())
    }

    async fn check(&self, scope: &mut CheckScope<'_>) -> anyhow::Result<()> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::task::yield_now().await;

        match &self.behaviour {
            Behaviour::Idle => scope.publish(serde_json::json!({ "calls": calls })),
            Behaviour::Complete => {
                scope.publish(serde_json::json!({ "calls": calls }));
                scope.complete();
            }
            Behaviour::Halt => scope.halt(),
            Behaviour::Abort(reason) => scope.abort(reason.clone()),
            Behaviour::Fail(message) => anyhow::bail!("{}", message),
            Behaviour::Pull(upstream) => {
                let insight = scope.latest_insight(upstream).await?;
                scope.publish(serde_json::json!({ "upstream": insight }));
                scope.complete();
            }
        }
        Ok(())
    }
}

/// Registry holding the given scripted kinds. Returns each kind's call counter.
pub fn scripted_registry(
    kinds: Vec<ScriptedTask>,
) -> (TaskRegistry, IndexMap<&'static str, Arc<AtomicUsize>>) {
    let mut registry = TaskRegistry::empty();
    let mut counters = IndexMap::new();
    for task in kinds {
        counters.insert(task.kind, task.calls());
        registry.register(Arc::new(task)).unwrap();
    }
    (registry, counters)
}

pub fn calls(counters: &IndexMap<&'static str, Arc<AtomicUsize>>, kind: &str) -> usize {
    counters[kind].load(Ordering::SeqCst)
}

pub struct TestTokenBuilder {
    pipeline: Vec<StageRecord>,
    tasks: IndexMap<String, TaskRecord>,
    insights: IndexMap<String, serde_json::Value>,
    current_stage_index: usize,
}

impl TestTokenBuilder {
    pub fn new() -> Self {
        Self {
            pipeline: Vec::new(),
            tasks: IndexMap::new(),
            insights: IndexMap::new(),
            current_stage_index: 0,
        }
    }

    pub fn stage(mut self, stage_id: &str, task_ids: &[&str], prerequisites: &[&str]) -> Self {
        let mut record =
            StageRecord::new(stage_id, task_ids.iter().map(|id| id.to_string()).collect());
        record.prerequisite_tasks = prerequisites.iter().map(|id| id.to_string()).collect();
        self.pipeline.push(record);
        self
    }

    pub fn stage_in(mut self, stage_id: &str, task_ids: &[&str], state: StageState) -> Self {
        let mut record =
            StageRecord::new(stage_id, task_ids.iter().map(|id| id.to_string()).collect());
        record.state = Some(state);
        self.pipeline.push(record);
        self
    }

    pub fn task(mut self, record: TaskRecord) -> Self {
        self.tasks.insert(record.task_id.clone(), record);
        self
    }

    /// Lazy task with default repetitions
    pub fn lazy(self, task_id: &str, kind: &str) -> Self {
        self.task(TaskRecord::new(task_id, kind))
    }

    pub fn insight(mut self, key: &str, value: serde_json::Value) -> Self {
        self.insights.insert(key.to_string(), value);
        self
    }

    pub fn at_stage(mut self, index: usize) -> Self {
        self.current_stage_index = index;
        self
    }

    pub fn build(self) -> TrackedToken {
        TrackedToken {
            uuid: Uuid::new_v4(),
            chain_id: 1,
            address: "0xabc".to_string(),
            tracking: true,
            aborted: false,
            completed: false,
            current_stage_index: self.current_stage_index,
            scheduled_execution_time: None,
            latest_execution_time: None,
            pipeline: self.pipeline,
            tasks: self.tasks,
            insights: self.insights,
        }
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-lazy task with an interval and repeat budget
pub fn repeating(task_id: &str, kind: &str, repeat: u32, interval: u64) -> TaskRecord {
    let mut record = TaskRecord::new(task_id, kind);
    record.repetitions.repeat = Some(repeat);
    record.repetitions.interval = Some(interval);
    record
}

pub fn with_state(mut record: TaskRecord, state: TaskState) -> TaskRecord {
    record.state = state;
    record
}

pub fn as_daemon(mut record: TaskRecord) -> TaskRecord {
    record.daemon = Some(true);
    record
}
