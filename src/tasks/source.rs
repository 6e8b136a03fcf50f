// ABOUTME: Market and contract data sources consulted by the built-in task kinds
// ABOUTME: Provides an HTTP-backed source and a fixture-backed static source

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::parser::TokenRef;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub mintable: bool,
    #[serde(default)]
    pub ownership_renounced: bool,
    #[serde(default)]
    pub honeypot: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityInfo {
    pub usd: f64,
    /// Share of pool tokens that are locked, 0..=1
    #[serde(default)]
    pub locked_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderInfo {
    pub holder_count: u64,
    /// Supply share held by the ten largest holders, 0..=1
    pub top10_ratio: f64,
}

/// Read side of token market data. `Ok(None)` means not available yet.
#[async_trait]
pub trait TokenDataSource: Send + Sync {
    async fn contract(&self, token: &TokenRef) -> anyhow::Result<Option<ContractInfo>>;
    async fn liquidity(&self, token: &TokenRef) -> anyhow::Result<Option<LiquidityInfo>>;
    async fn holders(&self, token: &TokenRef) -> anyhow::Result<Option<HolderInfo>>;
}

/// Everything known about one token in a fixture file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenFixture {
    pub chain_id: u64,
    pub address: String,
    #[serde(default)]
    pub contract: Option<ContractInfo>,
    #[serde(default)]
    pub liquidity: Option<LiquidityInfo>,
    #[serde(default)]
    pub holders: Option<HolderInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FixtureFile {
    #[serde(default)]
    tokens: Vec<TokenFixture>,
}

fn fixture_key(chain_id: u64, address: &str) -> String {
    format!("{}:{}", chain_id, address.to_lowercase())
}

/// In-memory source, loadable from a YAML fixture file and editable between ticks.
#[derive(Debug, Default)]
pub struct StaticDataSource {
    tokens: RwLock<HashMap<String, TokenFixture>>,
}

impl StaticDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let file: FixtureFile =
            serde_yaml::from_str(content).context("Failed to parse fixture YAML")?;
        let source = Self::new();
        for fixture in file.tokens {
            source.insert(fixture);
        }
        Ok(source)
    }

    pub async fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read fixtures from {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn insert(&self, fixture: TokenFixture) {
        let key = fixture_key(fixture.chain_id, &fixture.address);
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, fixture);
    }

    fn update(&self, chain_id: u64, address: &str, apply: impl FnOnce(&mut TokenFixture)) {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        let fixture = tokens
            .entry(fixture_key(chain_id, address))
            .or_insert_with(|| TokenFixture {
                chain_id,
                address: address.to_string(),
                ..TokenFixture::default()
            });
        apply(fixture);
    }

    pub fn set_contract(&self, chain_id: u64, address: &str, info: ContractInfo) {
        self.update(chain_id, address, |fixture| fixture.contract = Some(info));
    }

    pub fn set_liquidity(&self, chain_id: u64, address: &str, info: LiquidityInfo) {
        self.update(chain_id, address, |fixture| fixture.liquidity = Some(info));
    }

    pub fn set_holders(&self, chain_id: u64, address: &str, info: HolderInfo) {
        self.update(chain_id, address, |fixture| fixture.holders = Some(info));
    }

    fn lookup<T>(
        &self,
        token: &TokenRef,
        pick: impl FnOnce(&TokenFixture) -> Option<T>,
    ) -> Option<T> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&fixture_key(token.chain_id, &token.address))
            .and_then(pick)
    }
}

#[async_trait]
impl TokenDataSource for StaticDataSource {
    async fn contract(&self, token: &TokenRef) -> anyhow::Result<Option<ContractInfo>> {
        Ok(self.lookup(token, |fixture| fixture.contract.clone()))
    }

    async fn liquidity(&self, token: &TokenRef) -> anyhow::Result<Option<LiquidityInfo>> {
        Ok(self.lookup(token, |fixture| fixture.liquidity.clone()))
    }

    async fn holders(&self, token: &TokenRef) -> anyhow::Result<Option<HolderInfo>> {
        Ok(self.lookup(token, |fixture| fixture.holders.clone()))
    }
}

/// Source backed by a token data HTTP API.
///
/// Resources live at `{base_url}/tokens/{chainId}/{address}/{resource}`; a 404
/// reads as "not available yet".
pub struct HttpDataSource {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpDataSource {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid data source URL '{}'", base_url))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            bail!("Data source URL '{}' must be an http(s) base URL", base_url);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Each path segment is percent-encoded, so an address cannot escape its segment.
    fn resource_url(&self, token: &TokenRef, resource: &str) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        let chain_id = token.chain_id.to_string();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Data source URL '{}' cannot hold a path", self.base_url))?
            .pop_if_empty()
            .extend(["tokens", chain_id.as_str(), token.address.as_str(), resource]);
        Ok(url)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        token: &TokenRef,
        resource: &str,
    ) -> anyhow::Result<Option<T>> {
        let url = self.resource_url(token, resource)?;
        debug!("Fetching {}", url);

        let mut request = self.client.get(url.clone());
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = response
            .error_for_status()
            .with_context(|| format!("Data source rejected {} request", resource))?;
        let body = response
            .json::<T>()
            .await
            .with_context(|| format!("Invalid {} payload from {}", resource, url))?;
        Ok(Some(body))
    }
}

#[async_trait]
impl TokenDataSource for HttpDataSource {
    async fn contract(&self, token: &TokenRef) -> anyhow::Result<Option<ContractInfo>> {
        self.fetch(token, "contract").await
    }

    async fn liquidity(&self, token: &TokenRef) -> anyhow::Result<Option<LiquidityInfo>> {
        self.fetch(token, "liquidity").await
    }

    async fn holders(&self, token: &TokenRef) -> anyhow::Result<Option<HolderInfo>> {
        self.fetch(token, "holders").await
    }
}
