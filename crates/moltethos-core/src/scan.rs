//! 8004scan explorer client.
//!
//! Reads agent listings for the configured chain and turns them into
//! per-token reputation statistics. The statistics map is cached for
//! `scan.cache_ttl_secs`; explorer failures degrade to an empty map.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::Mutex;

use crate::{
    config::{ScanConfig, Secret},
    Error, Result,
};

const STATS_PAGE_SIZE: u32 = 200;

fn token_id_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected token_id {other}"))),
    }
}

/// One agent as listed by the explorer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScanAgent {
    #[serde(deserialize_with = "token_id_string")]
    pub token_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub total_feedbacks: Option<u64>,
    pub total_score: Option<f64>,
    pub average_score: Option<f64>,
    pub is_verified: Option<bool>,
    pub star_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentPage {
    pub items: Vec<ScanAgent>,
    pub total: u64,
}

/// Reputation summary for one token id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStats {
    pub total_feedbacks: u64,
    pub total_score: f64,
    pub average_score: f64,
    pub is_verified: bool,
    pub star_count: u64,
    pub name: String,
    pub description: String,
    pub image_url: Option<String>,
}

impl From<ScanAgent> for AgentStats {
    fn from(agent: ScanAgent) -> Self {
        Self {
            total_feedbacks: agent.total_feedbacks.unwrap_or_default(),
            total_score: agent.total_score.unwrap_or_default(),
            average_score: agent.average_score.unwrap_or_default(),
            is_verified: agent.is_verified.unwrap_or_default(),
            star_count: agent.star_count.unwrap_or_default(),
            name: agent.name.unwrap_or_default(),
            description: agent.description.unwrap_or_default(),
            image_url: agent.image_url,
        }
    }
}

type StatsMap = BTreeMap<String, AgentStats>;

#[derive(Debug)]
struct CachedStats {
    fetched_at: Instant,
    stats: StatsMap,
}

#[derive(Debug)]
pub struct ScanClient {
    client: Client,
    base_url: String,
    api_key: Option<Secret>,
    chain: String,
    ttl: Duration,
    cache: Mutex<Option<CachedStats>>,
}

impl ScanClient {
    pub fn from_config(config: &ScanConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            chain: config.chain.clone(),
            ttl: Duration::from_secs(config.cache_ttl_secs),
            cache: Mutex::new(None),
        })
    }

    /// Agents listed for the configured chain.
    ///
    /// # Errors
    ///
    /// `Error::Http` on transport failures or a non-success status.
    pub async fn monad_agents(&self, limit: u32) -> Result<AgentPage> {
        let request = self
            .client
            .get(format!("{}/agents", self.base_url))
            .query(&[("chainId", self.chain.clone()), ("limit", limit.to_string())]);
        let request = match &self.api_key {
            Some(key) => request.header("X-Access-Token", key.expose()),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!("8004scan answered {status}")));
        }
        response
            .json::<AgentPage>()
            .await
            .map_err(|e| Error::ParseError(format!("8004scan returned malformed listing: {e}")))
    }

    /// Statistics for every listed agent, keyed by token id.
    ///
    /// Never fails: explorer errors are logged and yield an empty map.
    pub async fn all_stats(&self) -> StatsMap {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return cached.stats.clone();
            }
        }

        match self.monad_agents(STATS_PAGE_SIZE).await {
            Ok(page) => {
                let stats: StatsMap = page
                    .items
                    .into_iter()
                    .map(|agent| (agent.token_id.clone(), AgentStats::from(agent)))
                    .collect();
                *cache = Some(CachedStats {
                    fetched_at: Instant::now(),
                    stats: stats.clone(),
                });
                stats
            }
            Err(e) => {
                tracing::warn!(error = %e, "8004scan fetch failed");
                StatsMap::new()
            }
        }
    }

    /// Statistics for one token id, if the explorer lists it.
    pub async fn agent_stats(&self, token_id: &str) -> Option<AgentStats> {
        self.all_stats().await.remove(token_id)
    }
}
