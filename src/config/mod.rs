use clap::Parser;
use ethers::types::Address;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::{EngineError, EngineResult};

/* =======================
SUPPORTED CHAINS
======================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Arbitrum,
    Avalanche,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Arbitrum => "arbitrum",
            Chain::Avalanche => "avalanche",
        }
    }
}

impl FromStr for Chain {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "arbitrum" => Ok(Chain::Arbitrum),
            "avalanche" => Ok(Chain::Avalanche),
            other => Err(EngineError::Configuration(format!(
                "unsupported chain: {other}"
            ))),
        }
    }
}

/* =======================
CONTRACT ADDRESSES
======================= */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractAddresses {
    pub exchange_router: Address,
    pub data_store: Address,
    pub event_emitter: Address,
    pub order_vault: Address,
    pub deposit_vault: Address,
    pub withdrawal_vault: Address,
    /// Wrapped native token (WETH on Arbitrum, WAVAX on Avalanche).
    pub wnt: Address,
    pub usdc: Address,
}

/* =======================
PER-CHAIN CONFIG
======================= */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    /// REST market-data API, primary then optional backup.
    pub oracle_url: String,
    pub oracle_backup_url: Option<String>,
    /// GraphQL indexer endpoint.
    pub subsquid_url: String,
    /// Provider's maximum eth_getLogs block span, used to size scan windows.
    pub block_range_limit: u64,
    pub contracts: ContractAddresses,
}

/* =======================
GAS MONITOR CONFIG
======================= */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasMonitorConfig {
    pub enabled: bool,
    /// Native balance (in USD) below which we warn.
    pub warning_usd: Decimal,
    /// Native balance (in USD) below which orders are blocked.
    pub critical_usd: Decimal,
    /// If true, critical balance raises a typed error; otherwise a
    /// rejected result is returned without submitting.
    pub raise_on_critical: bool,
    /// Safety multiplier applied to re-derived gas estimates.
    pub gas_safety_multiplier: f64,
    /// Consecutive submission failures before the session pauses.
    pub max_consecutive_failures: u32,
    /// Realized gas cost (USD) above which a high-cost warning is logged.
    pub high_cost_warn_usd: Decimal,
}

impl Default for GasMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warning_usd: dec!(5),
            critical_usd: dec!(1),
            raise_on_critical: false,
            gas_safety_multiplier: 1.2,
            max_consecutive_failures: 3,
            high_cost_warn_usd: dec!(2),
        }
    }
}

/* =======================
TRADING DEFAULTS
======================= */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Default slippage tolerance in percent.
    pub slippage_percent: Decimal,
    /// Default execution-fee buffer for standalone orders.
    pub execution_buffer: f64,
    /// Extra multiplier applied to each SLTP leg's fee on top of the
    /// primary buffer. Multicall batching burns more gas per order.
    pub sltp_fee_multiplier: f64,
    /// Market cache TTL in seconds.
    pub market_cache_ttl_secs: u64,
    /// HTTP retry count per endpoint.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds (doubles per attempt).
    pub retry_base_delay_ms: u64,
    /// Receipt wait timeout in seconds.
    pub receipt_timeout_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            slippage_percent: dec!(0.3),
            execution_buffer: 2.0,
            sltp_fee_multiplier: 3.0,
            market_cache_ttl_secs: 300,
            max_retries: 3,
            retry_base_delay_ms: 500,
            receipt_timeout_secs: 120,
        }
    }
}

/* =======================
WALLET CONFIG
======================= */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Account that receives positions and refunds. The private key itself
    /// stays in the environment, never in the config file.
    pub account: Option<Address>,
}

/* =======================
CLI ARGS
======================= */

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Chain to operate on
    #[arg(long, default_value = "arbitrum")]
    pub chain: String,

    /// Creation tx hash to reconcile instead of running the monitor loop
    #[arg(long)]
    pub reconcile: Option<String>,
}

/* =======================
MAIN CONFIG
======================= */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub chains: HashMap<Chain, ChainConfig>,
    pub gas_monitor: GasMonitorConfig,
    pub trading: TradingConfig,
    pub wallet: WalletConfig,
}

fn addr(s: &str) -> Address {
    s.parse().expect("static address literal")
}

impl Default for Config {
    fn default() -> Self {
        let mut chains = HashMap::new();

        chains.insert(
            Chain::Arbitrum,
            ChainConfig {
                chain_id: 42161,
                rpc_url: "https://arb1.arbitrum.io/rpc".to_string(),
                oracle_url: "https://arbitrum-api.gmxinfra.io".to_string(),
                oracle_backup_url: Some("https://arbitrum-api.gmxinfra2.io".to_string()),
                subsquid_url: "https://gmx.squids.live/gmx-synthetics-arbitrum:live/api/graphql"
                    .to_string(),
                block_range_limit: 10_000,
                contracts: ContractAddresses {
                    exchange_router: addr("0x5aC4e27341e4cCcb3e5FD62f9E62db2Adf43dd57"),
                    data_store: addr("0xFD70de6b91282D8017aA4E741e9Ae325CAb992d8"),
                    event_emitter: addr("0xC8ee91A54287DB53897056e12D9819156D3822Fb"),
                    order_vault: addr("0x31eF83a530Fde1B38EE9A18093A333D8Bbbc40D5"),
                    deposit_vault: addr("0xF89e77e8Dc11691C9e8757e84aaFbCD8A67d7A55"),
                    withdrawal_vault: addr("0x0628D46b5D145f183AdB6Ef1f2c97eD1C4701C55"),
                    wnt: addr("0x82aF49447D8a07e3bd95BD0d56f35241523fBab1"),
                    usdc: addr("0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
                },
            },
        );

        chains.insert(
            Chain::Avalanche,
            ChainConfig {
                chain_id: 43114,
                rpc_url: "https://api.avax.network/ext/bc/C/rpc".to_string(),
                oracle_url: "https://avalanche-api.gmxinfra.io".to_string(),
                oracle_backup_url: Some("https://avalanche-api.gmxinfra2.io".to_string()),
                subsquid_url: "https://gmx.squids.live/gmx-synthetics-avalanche:live/api/graphql"
                    .to_string(),
                block_range_limit: 2_048,
                contracts: ContractAddresses {
                    exchange_router: addr("0x2b76df209E1343da5698AF0f8757f6170162e78b"),
                    data_store: addr("0x2F0b22339414ADeD7D5F06f9D604c7fF5b2fe3f6"),
                    event_emitter: addr("0xDb17B211c34240B014ab6d61d4A31FA0C0e20c26"),
                    order_vault: addr("0xD3D60D22d415aD43b7e64b510D86A30f19B1B12C"),
                    deposit_vault: addr("0x90c670825d0C62ede1c5ee9571d6d9a17A722DFF"),
                    withdrawal_vault: addr("0xf5F30B10141E1F63FC11eD772931A8294a591996"),
                    wnt: addr("0xB31f66AA3C1e785363F0875A1B74E27b85FD66c7"),
                    usdc: addr("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"),
                },
            },
        );

        Self {
            chains,
            gas_monitor: GasMonitorConfig::default(),
            trading: TradingConfig::default(),
            wallet: WalletConfig { account: None },
        }
    }
}

/* =======================
LOAD / CREATE CONFIG
======================= */

impl Config {
    pub fn load(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            let cfg = Config::default();
            let content = serde_json::to_string_pretty(&cfg)?;
            std::fs::write(path, content)?;
            Ok(cfg)
        }
    }

    pub fn chain(&self, chain: Chain) -> EngineResult<&ChainConfig> {
        self.chains.get(&chain).ok_or_else(|| {
            EngineError::Configuration(format!("chain {} not configured", chain.as_str()))
        })
    }

    /// Reject malformed endpoint URLs up front instead of at first use.
    pub fn validate(&self) -> EngineResult<()> {
        for (chain, cfg) in &self.chains {
            let mut urls = vec![&cfg.rpc_url, &cfg.oracle_url, &cfg.subsquid_url];
            if let Some(backup) = &cfg.oracle_backup_url {
                urls.push(backup);
            }
            for raw in urls {
                url::Url::parse(raw).map_err(|e| {
                    EngineError::Configuration(format!(
                        "bad endpoint URL for {}: {raw}: {e}",
                        chain.as_str()
                    ))
                })?;
            }
        }
        Ok(())
    }
}

// ==================================================
// ENVIRONMENT HELPERS
// ==================================================

impl Config {
    /// RPC URL override from the environment, falling back to the file.
    pub fn rpc_url(&self, chain: Chain) -> EngineResult<String> {
        if let Ok(url) = env::var("RPC_URL") {
            return Ok(url);
        }
        Ok(self.chain(chain)?.rpc_url.clone())
    }

    pub fn private_key() -> EngineResult<String> {
        env::var("PRIVATE_KEY")
            .map_err(|_| EngineError::Configuration("PRIVATE_KEY missing in .env".to_string()))
    }

    pub fn is_read_only() -> bool {
        env::var("READ_ONLY")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false)
    }
}
