use log::info;
use serde_json::Value;
use std::sync::Arc;

use crate::cache::{LoadMode, MarketCache};
use crate::client::ApiClient;
use crate::config::Chain;
use crate::domain::{MarketInfo, MarketRegistry, TokenInfo};
use crate::errors::{EngineError, EngineResult};

pub mod oracle;

// ==================================================
// MARKET REGISTRY LOADER
// ==================================================
//
// Markets come from the indexer, token metadata from the REST API. Both
// go through the TTL cache under their own loading-mode namespace so a
// REST-sourced row can never satisfy an indexer read.

const MARKETS_KEY: &str = "markets";
const TOKENS_KEY: &str = "tokens";

pub struct MarketLoader {
    api: Arc<ApiClient>,
    cache: MarketCache,
    chain: Chain,
    ttl_ms: u64,
}

impl MarketLoader {
    pub fn new(api: Arc<ApiClient>, cache: MarketCache, chain: Chain, ttl_secs: u64) -> Self {
        Self {
            api,
            cache,
            chain,
            ttl_ms: ttl_secs * 1000,
        }
    }

    pub async fn load_registry(&self) -> EngineResult<MarketRegistry> {
        let markets = self.load_markets().await?;
        let tokens = self.load_tokens().await?;
        info!(
            "📚 Market registry loaded: {} markets, {} tokens",
            markets.len(),
            tokens.len()
        );
        Ok(MarketRegistry::new(markets, tokens))
    }

    async fn load_markets(&self) -> EngineResult<Vec<MarketInfo>> {
        let cache_key = format!("{}:{MARKETS_KEY}", self.chain.as_str());

        if let Some(cached) = self.cache.get(LoadMode::Indexer, &cache_key).await {
            if let Ok(markets) = serde_json::from_value::<Vec<MarketInfo>>(cached) {
                return Ok(markets);
            }
        }

        let markets = self.api.get_markets(self.chain).await?;
        let value =
            serde_json::to_value(&markets).map_err(|e| EngineError::Transport(e.to_string()))?;
        self.cache
            .set(LoadMode::Indexer, &cache_key, value, self.ttl_ms)
            .await;
        Ok(markets)
    }

    async fn load_tokens(&self) -> EngineResult<Vec<TokenInfo>> {
        let cache_key = format!("{}:{TOKENS_KEY}", self.chain.as_str());

        if let Some(cached) = self.cache.get(LoadMode::Rest, &cache_key).await {
            if let Ok(tokens) = serde_json::from_value::<Vec<TokenInfo>>(cached) {
                return Ok(tokens);
            }
        }

        let response = self.api.request(self.chain, "/tokens", &[]).await?;
        let tokens = parse_tokens(&response)?;
        let value =
            serde_json::to_value(&tokens).map_err(|e| EngineError::Transport(e.to_string()))?;
        self.cache
            .set(LoadMode::Rest, &cache_key, value, self.ttl_ms)
            .await;
        Ok(tokens)
    }
}

fn parse_tokens(response: &Value) -> EngineResult<Vec<TokenInfo>> {
    let rows = response
        .get("tokens")
        .cloned()
        .unwrap_or_else(|| response.clone());
    serde_json::from_value(rows).map_err(|e| EngineError::Transport(e.to_string()))
}
