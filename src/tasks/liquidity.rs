// ABOUTME: Liquidity watch task tracking pool depth and lock ratio across ticks
// ABOUTME: Aborts the token when liquidity collapses between two observations

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{check_ratio, parse_config, LiquidityInfo, TaskImplementation, TokenDataSource};
use crate::engine::error::{ExecutionError, Result};
use crate::engine::CheckScope;

pub const KIND: &str = "liquidity_watch";
pub const INSIGHT_KEY: &str = "liquidity";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct LiquidityWatchConfig {
    pub min_liquidity_usd: f64,
    pub min_locked_ratio: f64,
    /// Largest tolerated fall relative to the previous observation
    pub max_drop_ratio: f64,
}

impl Default for LiquidityWatchConfig {
    fn default() -> Self {
        Self {
            min_liquidity_usd: 10_000.0,
            min_locked_ratio: 0.8,
            max_drop_ratio: 0.5,
        }
    }
}

pub struct LiquidityWatchTask {
    source: Arc<dyn TokenDataSource>,
}

impl LiquidityWatchTask {
    pub fn new(source: Arc<dyn TokenDataSource>) -> Self {
        Self { source }
    }
}

/// Relative fall from `previous` to `current`; zero when nothing to compare
fn drop_ratio(previous: &LiquidityInfo, current: &LiquidityInfo) -> f64 {
    if previous.usd <= 0.0 {
        return 0.0;
    }
    ((previous.usd - current.usd) / previous.usd).max(0.0)
}

#[async_trait]
impl TaskImplementation for LiquidityWatchTask {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn insight_key(&self) -> &'static str {
        INSIGHT_KEY
    }

    fn validate_config(&self, task_id: &str, config: &serde_json::Value) -> Result<()> {
        let config: LiquidityWatchConfig = parse_config(task_id, config)?;
        if config.min_liquidity_usd < 0.0 {
            return Err(ExecutionError::InvalidConfiguration {
                task_id: task_id.to_string(),
                reason: "minLiquidityUsd cannot be negative".to_string(),
            });
        }
        check_ratio(task_id, "minLockedRatio", config.min_locked_ratio)?;
        check_ratio(task_id, "maxDropRatio", config.max_drop_ratio)
    }

    async fn check(&self, scope: &mut CheckScope<'_>) -> anyhow::Result<()> {
        let config: LiquidityWatchConfig = scope.config()?;

        let Some(current) = self.source.liquidity(scope.token()).await? else {
            debug!("No liquidity data yet for {}", scope.token());
            return Ok(());
        };

        let previous = scope
            .previous_insight()
            .and_then(|value| serde_json::from_value::<LiquidityInfo>(value.clone()).ok());

        scope.publish(serde_json::to_value(&current)?);

        if let Some(previous) = previous {
            let dropped = drop_ratio(&previous, &current);
            if dropped > config.max_drop_ratio {
                scope.abort(format!(
                    "liquidity fell {:.0}% from ${:.2} to ${:.2}",
                    dropped * 100.0,
                    previous.usd,
                    current.usd
                ));
                return Ok(());
            }
        }

        if current.usd >= config.min_liquidity_usd
            && current.locked_ratio >= config.min_locked_ratio
        {
            scope.complete();
        }
        Ok(())
    }
}
