// ABOUTME: Contract audit task checking verification, mint authority and honeypot flags
// ABOUTME: Publishes the contract insight and aborts the token when the contract is a honeypot

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::{parse_config, TaskImplementation, TokenDataSource};
use crate::engine::error::Result;
use crate::engine::CheckScope;

pub const KIND: &str = "contract_audit";
pub const INSIGHT_KEY: &str = "contract";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContractAuditConfig {
    /// Keep checking until the source code is verified
    #[serde(default = "default_require_verified")]
    pub require_verified: bool,
    /// Tolerate a contract whose owner can still mint
    #[serde(default)]
    pub allow_mintable: bool,
}

fn default_require_verified() -> bool {
    true
}

impl Default for ContractAuditConfig {
    fn default() -> Self {
        Self {
            require_verified: default_require_verified(),
            allow_mintable: false,
        }
    }
}

pub struct ContractAuditTask {
    source: Arc<dyn TokenDataSource>,
}

impl ContractAuditTask {
    pub fn new(source: Arc<dyn TokenDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl TaskImplementation for ContractAuditTask {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn insight_key(&self) -> &'static str {
        INSIGHT_KEY
    }

    fn validate_config(&self, task_id: &str, config: &serde_json::Value) -> Result<()> {
        parse_config::<ContractAuditConfig>(task_id, config).map(|_| ())
    }

    async fn check(&self, scope: &mut CheckScope<'_>) -> anyhow::Result<()> {
        let config: ContractAuditConfig = scope.config()?;

        let Some(info) = self.source.contract(scope.token()).await? else {
            debug!("No contract metadata yet for {}", scope.token());
            return Ok(());
        };

        scope.publish(serde_json::to_value(&info)?);

        if info.honeypot {
            scope.abort(format!("contract {} is a honeypot", scope.token()));
            return Ok(());
        }
        if info.mintable && !config.allow_mintable {
            info!("Contract {} keeps mint authority, halting audit", scope.token());
            scope.halt();
            return Ok(());
        }
        if config.require_verified && !info.verified {
            debug!("Contract {} not verified yet", scope.token());
            return Ok(());
        }

        scope.complete();
        Ok(())
    }
}
