use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::{EngineError, EngineResult};

pub mod order;

// ==================================================
// TOKENS + MARKETS
// ==================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub decimals: u32,
    #[serde(default)]
    pub synthetic: bool,
}

/// One GM market. Keyed by its market token address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInfo {
    #[serde(rename = "marketToken")]
    pub market_token: Address,
    #[serde(rename = "indexToken")]
    pub index_token: Address,
    #[serde(rename = "longToken")]
    pub long_token: Address,
    #[serde(rename = "shortToken")]
    pub short_token: Address,
    #[serde(default)]
    pub name: String,
}

/// Snapshot of the currently known market set plus token metadata.
/// Plain data — the order builder reads it, never refreshes it.
#[derive(Debug, Clone, Default)]
pub struct MarketRegistry {
    markets: HashMap<Address, MarketInfo>,
    tokens: HashMap<Address, TokenInfo>,
}

impl MarketRegistry {
    pub fn new(markets: Vec<MarketInfo>, tokens: Vec<TokenInfo>) -> Self {
        Self {
            markets: markets.into_iter().map(|m| (m.market_token, m)).collect(),
            tokens: tokens.into_iter().map(|t| (t.address, t)).collect(),
        }
    }

    pub fn resolve(&self, market_key: Address) -> EngineResult<&MarketInfo> {
        self.markets
            .get(&market_key)
            .ok_or_else(|| EngineError::MarketNotFound(format!("{market_key:?}")))
    }

    pub fn token(&self, address: Address) -> EngineResult<&TokenInfo> {
        self.tokens
            .get(&address)
            .ok_or_else(|| EngineError::MarketNotFound(format!("token {address:?}")))
    }

    pub fn markets(&self) -> impl Iterator<Item = &MarketInfo> {
        self.markets.values()
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

// ==================================================
// ORACLE PRICES
// ==================================================

/// Min/max quote pair, 30-decimal convention (price decimals are
/// 30 - token decimals so price * amount lands on 30).
#[derive(Debug, Clone, Copy)]
pub struct OraclePrice {
    pub min: U256,
    pub max: U256,
}

impl OraclePrice {
    /// Mark price: the median of the min/max quote.
    pub fn mid(&self) -> U256 {
        crate::numeric::median_price(self.min, self.max)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OracleSnapshot {
    prices: HashMap<Address, OraclePrice>,
    pub fetched_at_ms: u128,
}

impl OracleSnapshot {
    pub fn new(prices: HashMap<Address, OraclePrice>, fetched_at_ms: u128) -> Self {
        Self {
            prices,
            fetched_at_ms,
        }
    }

    pub fn price_for(&self, token: Address) -> EngineResult<OraclePrice> {
        self.prices
            .get(&token)
            .copied()
            .ok_or_else(|| EngineError::PriceUnavailable(format!("{token:?}")))
    }

    pub fn insert(&mut self, token: Address, price: OraclePrice) {
        self.prices.insert(token, price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

// ==================================================
// REST / INDEXER DTOS
// ==================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Ticker {
    #[serde(rename = "tokenAddress")]
    pub token_address: Address,
    #[serde(rename = "tokenSymbol", default)]
    pub token_symbol: String,
    #[serde(rename = "minPrice")]
    pub min_price: String,
    #[serde(rename = "maxPrice")]
    pub max_price: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl Candle {
    pub fn datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.timestamp, 0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundingRate {
    #[serde(rename = "marketToken")]
    pub market_token: Address,
    #[serde(rename = "fundingRateLong")]
    pub funding_rate_long: Decimal,
    #[serde(rename = "fundingRateShort")]
    pub funding_rate_short: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApyInfo {
    #[serde(rename = "marketToken")]
    pub market_token: Address,
    pub apy: Decimal,
}

/// One row from the indexer's trade-action table, matched by order key.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeAction {
    #[serde(rename = "eventName")]
    pub event_name: String,
    #[serde(rename = "orderKey")]
    pub order_key: String,
    #[serde(rename = "executionPrice", default)]
    pub execution_price: Option<String>,
    #[serde(rename = "sizeDeltaUsd", default)]
    pub size_delta_usd: Option<String>,
    #[serde(rename = "positionFeeAmount", default)]
    pub position_fee_amount: Option<String>,
    /// Min collateral price at execution; fee amount × this price lands
    /// on the 30-decimal USD convention.
    #[serde(rename = "collateralTokenPriceMin", default)]
    pub collateral_token_price_min: Option<String>,
    #[serde(rename = "reason", default)]
    pub reason: Option<String>,
}
