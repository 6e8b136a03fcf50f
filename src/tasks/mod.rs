// ABOUTME: Task kinds that evaluate a token and the registry resolving kind names to them
// ABOUTME: Contains the contract audit, liquidity watch and holder distribution checks

pub mod contract;
pub mod holders;
pub mod liquidity;
pub mod source;

pub use source::{
    ContractInfo, HolderInfo, HttpDataSource, LiquidityInfo, StaticDataSource, TokenDataSource,
};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use crate::engine::error::{ExecutionError, Result};
use crate::engine::{CheckScope, TaskUnit};
use crate::parser::TaskRecord;

/// Behaviour behind a task kind.
///
/// A check reports through its [`CheckScope`]: publish an insight, then
/// complete, halt or abort. Returning `Err` fails the task and the tick.
#[async_trait]
pub trait TaskImplementation: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Key of the token-level insight this kind owns
    fn insight_key(&self) -> &'static str;

    fn validate_config(&self, task_id: &str, config: &serde_json::Value) -> Result<()>;

    async fn check(&self, scope: &mut CheckScope<'_>) -> anyhow::Result<()>;
}

/// Deserialize a task config, treating a missing config as `{}`
pub(crate) fn parse_config<T: DeserializeOwned>(
    task_id: &str,
    config: &serde_json::Value,
) -> Result<T> {
    let value = match config {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(value).map_err(|e| ExecutionError::InvalidConfiguration {
        task_id: task_id.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn check_ratio(task_id: &str, field: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ExecutionError::InvalidConfiguration {
            task_id: task_id.to_string(),
            reason: format!("{} must be between 0 and 1, got {}", field, value),
        });
    }
    Ok(())
}

pub struct TaskRegistry {
    implementations: HashMap<String, Arc<dyn TaskImplementation>>,
}

impl TaskRegistry {
    /// Registry with no kinds registered
    pub fn empty() -> Self {
        Self {
            implementations: HashMap::new(),
        }
    }

    /// Registry with the built-in kinds reading from `source`
    pub fn new(source: Arc<dyn TokenDataSource>) -> Self {
        let mut registry = Self::empty();

        let built_ins: [Arc<dyn TaskImplementation>; 3] = [
            Arc::new(contract::ContractAuditTask::new(Arc::clone(&source))),
            Arc::new(liquidity::LiquidityWatchTask::new(Arc::clone(&source))),
            Arc::new(holders::HolderDistributionTask::new(source)),
        ];
        for implementation in built_ins {
            let kind = implementation.kind();
            if let Err(e) = registry.register(implementation) {
                error!("Built-in task kind '{}' not registered: {}", kind, e);
                debug_assert!(false, "built-in insight keys clash: {}", e);
            }
        }

        registry
    }

    /// Register a kind, replacing any previous registration of the same kind.
    ///
    /// Fails when another kind already owns the same insight key.
    pub fn register(&mut self, implementation: Arc<dyn TaskImplementation>) -> Result<()> {
        let kind = implementation.kind();
        let insight_key = implementation.insight_key();
        if let Some(owner) = self
            .implementations
            .values()
            .find(|existing| existing.insight_key() == insight_key && existing.kind() != kind)
        {
            return Err(ExecutionError::InsightKeyConflict {
                kind: kind.to_string(),
                insight_key: insight_key.to_string(),
                owner: owner.kind().to_string(),
            });
        }
        self.implementations.insert(kind.to_string(), implementation);
        Ok(())
    }

    pub fn get_implementation(&self, kind: &str) -> Option<Arc<dyn TaskImplementation>> {
        self.implementations.get(kind).cloned()
    }

    pub fn validate_task_config(
        &self,
        task_id: &str,
        kind: &str,
        config: &serde_json::Value,
    ) -> Result<()> {
        match self.get_implementation(kind) {
            Some(implementation) => implementation.validate_config(task_id, config),
            None => Err(ExecutionError::UnknownTaskKind {
                task_id: task_id.to_string(),
                kind: kind.to_string(),
            }),
        }
    }

    /// Rehydrate a task unit, handing it the insight its kind last published
    pub fn build(
        &self,
        record: TaskRecord,
        insights: &IndexMap<String, serde_json::Value>,
    ) -> Result<TaskUnit> {
        let implementation =
            self.get_implementation(&record.kind)
                .ok_or_else(|| ExecutionError::UnknownTaskKind {
                    task_id: record.task_id.clone(),
                    kind: record.kind.clone(),
                })?;
        let previous_insight = insights.get(implementation.insight_key()).cloned();
        Ok(TaskUnit::new(record, implementation, previous_insight))
    }

    pub fn supported_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.implementations.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Insight key owned by each registered kind
    pub fn insight_keys(&self) -> Vec<(&str, &'static str)> {
        let mut keys: Vec<(&str, &'static str)> = self
            .implementations
            .iter()
            .map(|(kind, implementation)| (kind.as_str(), implementation.insight_key()))
            .collect();
        keys.sort_unstable();
        keys
    }
}
