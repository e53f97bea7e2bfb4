use ethers::types::H256;
use serde_json::{json, Value};

use super::ApiClient;
use crate::config::Chain;
use crate::domain::{FundingRate, MarketInfo, TradeAction};
use crate::errors::{EngineError, EngineResult};

// ==================================================
// INDEXER QUERIES (subsquid GraphQL)
// ==================================================

const MARKETS_QUERY: &str = r#"
query Markets($limit: Int!) {
  marketInfos(limit: $limit) {
    marketToken
    indexToken
    longToken
    shortToken
    name
  }
}"#;

const TRADE_ACTION_QUERY: &str = r#"
query TradeAction($orderKey: String!) {
  tradeActions(where: { orderKey_eq: $orderKey }, limit: 1) {
    eventName
    orderKey
    executionPrice
    sizeDeltaUsd
    positionFeeAmount
    collateralTokenPriceMin
    reason
  }
}"#;

const FUNDING_RATES_QUERY: &str = r#"
query FundingRates($market: String!, $limit: Int!) {
  fundingRates(
    where: { marketToken_eq: $market }
    orderBy: timestamp_DESC
    limit: $limit
  ) {
    marketToken
    fundingRateLong
    fundingRateShort
  }
}"#;

fn data_field(value: Value, field: &str) -> EngineResult<Value> {
    value
        .get("data")
        .and_then(|d| d.get(field))
        .cloned()
        .ok_or_else(|| EngineError::Transport(format!("graphql response missing data.{field}")))
}

impl ApiClient {
    pub async fn get_markets(&self, chain: Chain) -> EngineResult<Vec<MarketInfo>> {
        let response = self
            .graphql(chain, MARKETS_QUERY, json!({ "limit": 1000 }))
            .await?;
        let rows = data_field(response, "marketInfos")?;
        serde_json::from_value(rows).map_err(|e| EngineError::Transport(e.to_string()))
    }

    /// Look up the trade action matching an order key. `None` means the
    /// indexer has not seen the execution yet — the caller falls back to
    /// the chunked log scan.
    pub async fn get_trade_action(
        &self,
        chain: Chain,
        order_key: H256,
    ) -> EngineResult<Option<TradeAction>> {
        let key = format!("{order_key:#x}");
        let response = self
            .graphql(chain, TRADE_ACTION_QUERY, json!({ "orderKey": key }))
            .await?;
        let rows: Vec<TradeAction> = serde_json::from_value(data_field(response, "tradeActions")?)
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        Ok(rows.into_iter().next())
    }

    pub async fn get_funding_rates(
        &self,
        chain: Chain,
        market: &str,
        limit: u32,
    ) -> EngineResult<Vec<FundingRate>> {
        let response = self
            .graphql(
                chain,
                FUNDING_RATES_QUERY,
                json!({ "market": market, "limit": limit }),
            )
            .await?;
        let rows = data_field(response, "fundingRates")?;
        serde_json::from_value(rows).map_err(|e| EngineError::Transport(e.to_string()))
    }
}
