use ethers::types::U256;
use log::warn;
use std::collections::HashMap;
use std::sync::Arc;

use crate::client::ApiClient;
use crate::config::Chain;
use crate::domain::{OraclePrice, OracleSnapshot, Ticker};
use crate::errors::EngineResult;

// ==================================================
// ORACLE SNAPSHOT
// ==================================================
//
// Live min/max quotes from the signed-price REST API. A malformed ticker
// is skipped, not fatal — downstream lookups surface PriceUnavailable for
// tokens that did not make it into the snapshot.

pub async fn fetch_snapshot(api: &Arc<ApiClient>, chain: Chain) -> EngineResult<OracleSnapshot> {
    let tickers = api.get_tickers(chain).await?;
    Ok(snapshot_from_tickers(&tickers, now_ms()))
}

pub fn snapshot_from_tickers(tickers: &[Ticker], fetched_at_ms: u128) -> OracleSnapshot {
    let mut prices = HashMap::new();

    for ticker in tickers {
        let min = U256::from_dec_str(&ticker.min_price);
        let max = U256::from_dec_str(&ticker.max_price);
        match (min, max) {
            (Ok(min), Ok(max)) if min <= max => {
                prices.insert(ticker.token_address, OraclePrice { min, max });
            }
            _ => warn!(
                "skipping malformed ticker for {} ({:?})",
                ticker.token_symbol, ticker.token_address
            ),
        }
    }

    OracleSnapshot::new(prices, fetched_at_ms)
}

fn now_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis()
}
