// ABOUTME: Holder distribution task measuring supply concentration among top holders
// ABOUTME: Pulls the contract audit insight first and halts when that audit is no longer running

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::{check_ratio, parse_config, TaskImplementation, TokenDataSource};
use crate::engine::error::{ExecutionError, Result};
use crate::engine::CheckScope;

pub const KIND: &str = "holder_distribution";
pub const INSIGHT_KEY: &str = "holders";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct HolderDistributionConfig {
    /// Task id of the contract audit this check depends on
    pub contract_task: String,
    pub max_top10_ratio: f64,
}

impl Default for HolderDistributionConfig {
    fn default() -> Self {
        Self {
            contract_task: "contract_audit".to_string(),
            max_top10_ratio: 0.5,
        }
    }
}

pub struct HolderDistributionTask {
    source: Arc<dyn TokenDataSource>,
}

impl HolderDistributionTask {
    pub fn new(source: Arc<dyn TokenDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl TaskImplementation for HolderDistributionTask {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn insight_key(&self) -> &'static str {
        INSIGHT_KEY
    }

    fn validate_config(&self, task_id: &str, config: &serde_json::Value) -> Result<()> {
        let config: HolderDistributionConfig = parse_config(task_id, config)?;
        if config.contract_task.trim().is_empty() {
            return Err(ExecutionError::InvalidConfiguration {
                task_id: task_id.to_string(),
                reason: "contractTask cannot be empty".to_string(),
            });
        }
        if config.contract_task == task_id {
            return Err(ExecutionError::InvalidConfiguration {
                task_id: task_id.to_string(),
                reason: "contractTask cannot refer to the task itself".to_string(),
            });
        }
        check_ratio(task_id, "maxTop10Ratio", config.max_top10_ratio)
    }

    async fn check(&self, scope: &mut CheckScope<'_>) -> anyhow::Result<()> {
        let config: HolderDistributionConfig = scope.config()?;
        let upstream = config.contract_task.as_str();

        if !scope.is_task_active(upstream) && !scope.is_task_completed(upstream) {
            info!("Contract task {} is no longer running, halting {}", upstream, scope.task_id());
            scope.halt();
            return Ok(());
        }

        if scope.latest_insight(upstream).await?.is_none() {
            debug!("Waiting for contract insight from {}", upstream);
            return Ok(());
        }

        let Some(holders) = self.source.holders(scope.token()).await? else {
            debug!("No holder data yet for {}", scope.token());
            return Ok(());
        };

        scope.publish(serde_json::to_value(&holders)?);
        if holders.top10_ratio <= config.max_top10_ratio {
            scope.complete();
        }
        Ok(())
    }
}
