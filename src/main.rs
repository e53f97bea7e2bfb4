use gmx_v2_execution_engine::*;

use anyhow::Result;
use clap::Parser;
use ethers::providers::{Http, Provider};
use ethers::types::H256;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use cache::MarketCache;
use client::{ApiClient, HttpTransport};
use config::{Args, Chain, Config};
use contracts::DataStore;
use fees::GasLimits;
use market::MarketLoader;
use monitor::{GasMonitor, TransactionSigner};
use orders::OrderBuilder;
use reconcile::{IndexerTradeActions, Reconciler};
use wallet::{RpcGateway, WalletSigner};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    info!("🚀 Starting GMX V2 execution engine");

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    config.validate()?;
    let chain: Chain = args.chain.parse()?;
    let chain_cfg = config.chain(chain)?.clone();

    // ===============================
    // PROVIDER + GATEWAY
    // ===============================
    let rpc_url = config.rpc_url(chain)?;
    let provider = Arc::new(Provider::<Http>::try_from(rpc_url.as_str())?);
    let receipt_timeout = Duration::from_secs(config.trading.receipt_timeout_secs);
    let gateway = RpcGateway::new(
        provider.clone(),
        chain_cfg.contracts.data_store,
        receipt_timeout,
    );

    // ===============================
    // API CLIENT + MARKET DATA
    // ===============================
    let transport = Arc::new(HttpTransport::new(HTTP_TIMEOUT));
    let api = Arc::new(ApiClient::from_config(&config, transport));

    let loader = MarketLoader::new(
        api.clone(),
        MarketCache::new(),
        chain,
        config.trading.market_cache_ttl_secs,
    );
    let registry = loader.load_registry().await?;
    let oracle = market::oracle::fetch_snapshot(&api, chain).await?;
    info!("📈 Oracle snapshot: {} prices", oracle.len());

    // ===============================
    // RECONCILE-ONLY PATH
    // ===============================
    if let Some(hash) = &args.reconcile {
        let tx_hash: H256 = hash.parse()?;
        let reconciler = Reconciler::new(
            gateway,
            IndexerTradeActions::new(api.clone(), chain),
            registry,
            chain_cfg.contracts.event_emitter,
            chain_cfg.block_range_limit,
        );
        let order = reconciler.reconcile(tx_hash).await?;
        info!("📋 Order {:?} status: {:?}", tx_hash, order.status);
        if let Some(filled) = order.filled_usd {
            info!(
                "   filled ${filled}, average price {}",
                order
                    .average_price
                    .map(|p| format!("${p}"))
                    .unwrap_or_else(|| "unknown".to_string())
            );
        }
        if let Some(reason) = &order.cancel_reason {
            info!("   reason: {reason}");
        }
        return Ok(());
    }

    // ===============================
    // GAS MODEL
    // ===============================
    let data_store = DataStore::new(chain_cfg.contracts.data_store, provider.clone());
    let gas_limits = match fees::load_gas_limits(&data_store).await {
        Ok(limits) => limits,
        Err(e) => {
            warn!("⚠️ DataStore unreachable ({e}), using default gas limits");
            GasLimits::defaults()
        }
    };
    let gas_price = gateway.gas_price().await?;
    info!("⛽ Gas price {} wei", gas_price);

    let rating = fees::validate_buffer(config.trading.execution_buffer);
    info!(
        "🧮 Execution buffer {}x rated {:?}",
        config.trading.execution_buffer, rating
    );

    // ===============================
    // WALLET + CIRCUIT BREAKER
    // ===============================
    if Config::is_read_only() {
        info!("👓 READ_ONLY set — market data loaded, skipping wallet checks");
        return Ok(());
    }

    let private_key = Config::private_key()?;
    let signer = WalletSigner::new(provider.as_ref().clone(), &private_key, chain_cfg.chain_id)?;
    let account = config.wallet.account.unwrap_or_else(|| signer.address());
    info!("🔑 Trading account {:?}", account);

    let wnt = chain_cfg.contracts.wnt;
    let native_price = oracle
        .price_for(wnt)
        .ok()
        .map(|quote| {
            let decimals = registry.token(wnt).map(|t| t.decimals).unwrap_or(18);
            numeric::price_to_decimal(quote.mid(), decimals)
        })
        .transpose()?;

    let gas_monitor = GasMonitor::new(gateway, config.gas_monitor.clone());
    if let Some(price) = native_price {
        let check = gas_monitor.check_balance(account, price).await?;
        info!(
            "💰 Gas balance ${:.2} ({:?})",
            check.balance_usd, check.level
        );
    } else {
        warn!("⚠️ No oracle quote for the native token, skipping balance check");
    }

    let allowance = Arc::new(RpcGateway::new(
        provider.clone(),
        chain_cfg.contracts.data_store,
        receipt_timeout,
    ));
    let mut builder = OrderBuilder::new(
        registry,
        oracle,
        gas_limits,
        gas_price,
        chain_cfg.contracts.clone(),
        account,
        allowance,
    );
    if let Ok(code) = std::env::var("REFERRAL_CODE") {
        builder = builder.with_referral_code(contracts::parse_referral_code(&code)?);
        info!("🏷️ Referral code attached");
    }
    info!(
        "✅ Engine ready: {} markets, builder and circuit breaker armed",
        builder.registry().len()
    );

    Ok(())
}
