use async_trait::async_trait;
use ethers::types::{Address, Log, TransactionReceipt, H256, U256};
use log::{info, warn};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::client::ApiClient;
use crate::config::Chain;
use crate::domain::order::{Order, OrderFee, OrderStatus};
use crate::domain::{MarketRegistry, TradeAction};
use crate::errors::{EngineError, EngineResult};
use crate::numeric;

pub mod events;
pub mod logscan;

pub use events::{LifecycleKind, OrderEvent};

// ==================================================
// ORDER RECONCILER
// ==================================================
//
// Drives an order record Open -> {Closed, Cancelled, Failed}, all
// terminal, from three sources in preference order: cached record,
// indexer trade action, chunked on-chain log scan. When every source
// comes up empty the record stays Open for the caller to poll again.

#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn receipt(&self, tx_hash: H256) -> EngineResult<Option<TransactionReceipt>>;
    async fn latest_block(&self) -> EngineResult<u64>;
    async fn logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> EngineResult<Vec<Log>>;
    /// DataStore order-list membership: true while the keeper has not
    /// executed or cancelled the order.
    async fn order_pending(&self, order_key: H256) -> EngineResult<bool>;
}

#[async_trait]
pub trait TradeActionSource: Send + Sync {
    async fn trade_action(&self, order_key: H256) -> EngineResult<Option<TradeAction>>;
}

/// Indexer-backed trade actions for one chain.
pub struct IndexerTradeActions {
    api: Arc<ApiClient>,
    chain: Chain,
}

impl IndexerTradeActions {
    pub fn new(api: Arc<ApiClient>, chain: Chain) -> Self {
        Self { api, chain }
    }
}

#[async_trait]
impl TradeActionSource for IndexerTradeActions {
    async fn trade_action(&self, order_key: H256) -> EngineResult<Option<TradeAction>> {
        self.api.get_trade_action(self.chain, order_key).await
    }
}

/// What a settlement source resolved an order to, before it is folded
/// into the cached record.
#[derive(Debug, Clone)]
struct Settlement {
    kind: LifecycleKind,
    execution_price: Option<U256>,
    size_delta_usd: Option<U256>,
    fee_usd: Option<Decimal>,
    reason: Option<String>,
}

impl Settlement {
    fn from_event(event: &OrderEvent) -> Self {
        Self {
            kind: event.kind,
            execution_price: event.execution_price,
            size_delta_usd: event.size_delta_usd,
            fee_usd: None,
            reason: event.reason.clone(),
        }
    }

    fn from_trade_action(action: &TradeAction) -> Option<Self> {
        let kind = match action.event_name.as_str() {
            "OrderExecuted" => LifecycleKind::Executed,
            "OrderCancelled" => LifecycleKind::Cancelled,
            "OrderFrozen" => LifecycleKind::Frozen,
            other => {
                warn!("⚠️ Ignoring trade action with event {other}");
                return None;
            }
        };

        let parse = |s: &Option<String>| s.as_deref().and_then(|v| U256::from_dec_str(v).ok());
        let fee_usd = parse(&action.position_fee_amount)
            .zip(parse(&action.collateral_token_price_min))
            .and_then(|(amount, price)| amount.checked_mul(price))
            .and_then(|wire| numeric::from_fixed(wire, 30).ok());

        Some(Self {
            kind,
            execution_price: parse(&action.execution_price),
            size_delta_usd: parse(&action.size_delta_usd),
            fee_usd,
            reason: action.reason.clone(),
        })
    }
}

pub struct Reconciler<R: ChainReader, S: TradeActionSource> {
    reader: R,
    indexer: S,
    registry: MarketRegistry,
    event_emitter: Address,
    block_range_limit: u64,
    orders: Mutex<HashMap<H256, Order>>,
}

impl<R: ChainReader, S: TradeActionSource> Reconciler<R, S> {
    pub fn new(
        reader: R,
        indexer: S,
        registry: MarketRegistry,
        event_emitter: Address,
        block_range_limit: u64,
    ) -> Self {
        Self {
            reader,
            indexer,
            registry,
            event_emitter,
            block_range_limit,
            orders: Mutex::new(HashMap::new()),
        }
    }

    /// Register a freshly submitted order so later polls start from its
    /// cached record instead of the receipt.
    pub async fn track(&self, order: Order) {
        self.orders.lock().await.insert(order.tx_hash, order);
    }

    pub async fn order(&self, tx_hash: H256) -> Option<Order> {
        self.orders.lock().await.get(&tx_hash).cloned()
    }

    /// Resolve the current status of the order created by `tx_hash`.
    pub async fn reconcile(&self, tx_hash: H256) -> EngineResult<Order> {
        let mut orders = self.orders.lock().await;

        let mut order = match orders.get(&tx_hash) {
            // Terminal records are immutable; return as-is.
            Some(order) if order.status.is_terminal() => return Ok(order.clone()),
            Some(order) => order.clone(),
            None => {
                let order = self.bootstrap(tx_hash).await?;
                orders.insert(tx_hash, order.clone());
                if order.status.is_terminal() {
                    return Ok(order);
                }
                order
            }
        };

        let Some(order_key) = order.order_key else {
            // No key means no way to match events; possibly lost, still
            // reported open rather than guessed at.
            info!("❓ Order {tx_hash:?} has no key yet, leaving open");
            return Ok(order);
        };

        // Still sitting in the keeper's queue?
        match self.reader.order_pending(order_key).await {
            Ok(true) => return Ok(order),
            Ok(false) => {}
            Err(e) => warn!("⚠️ Pending probe failed for {order_key:?}, continuing: {e}"),
        }

        let settlement = match self.settle(order_key, order.created_block).await {
            Some(settlement) => settlement,
            None => {
                info!(
                    "❓ No terminal event for order {order_key:?} after indexer and log scan; \
                     still open"
                );
                return Ok(order);
            }
        };

        self.apply(&mut order, &settlement);
        orders.insert(tx_hash, order.clone());
        Ok(order)
    }

    /// Indexer first, chunked log scan as the fallback.
    async fn settle(&self, order_key: H256, from_block: u64) -> Option<Settlement> {
        match self.indexer.trade_action(order_key).await {
            Ok(Some(action)) => {
                if let Some(settlement) = Settlement::from_trade_action(&action) {
                    return Some(settlement);
                }
            }
            Ok(None) => info!("🔍 Indexer has no trade action for {order_key:?}, scanning logs"),
            Err(e) => warn!("⚠️ Indexer lookup failed, falling back to log scan: {e}"),
        }

        let to_block = match self.reader.latest_block().await {
            Ok(block) => block,
            Err(e) => {
                warn!("⚠️ Cannot resolve latest block for scan: {e}");
                return None;
            }
        };

        match logscan::scan_for_order_event(
            &self.reader,
            self.event_emitter,
            order_key,
            from_block,
            to_block,
            self.block_range_limit,
        )
        .await
        {
            Ok(Some(event)) => Some(Settlement::from_event(&event)),
            Ok(None) => None,
            Err(e) => {
                warn!("⚠️ Log scan failed for {order_key:?}: {e}");
                None
            }
        }
    }

    fn apply(&self, order: &mut Order, settlement: &Settlement) {
        match settlement.kind {
            LifecycleKind::Executed => {
                if !order.transition(OrderStatus::Closed) {
                    return;
                }
                let filled = settlement
                    .size_delta_usd
                    .and_then(|size| numeric::from_fixed(size, numeric::USD_DECIMALS).ok())
                    .unwrap_or(order.size_usd);
                let remaining = (order.size_usd - filled).max(Decimal::ZERO);
                order.filled_usd = Some(filled);
                order.remaining_usd = Some(remaining);
                if remaining > Decimal::ZERO {
                    crate::logging::log_partial(filled, remaining);
                }
                order.average_price = settlement.execution_price.and_then(|price| {
                    let decimals = self.registry.token(order.index_token).ok()?.decimals;
                    numeric::price_to_decimal(price, decimals).ok()
                });
                if let Some(fee) = settlement.fee_usd {
                    // The gas placeholder served until now; the realized
                    // trading fee replaces it.
                    order.fee = OrderFee::Realized {
                        trading_fee_usd: fee,
                    };
                }
                crate::logging::log_success(&format!(
                    "Order {:?} executed, filled ${filled}",
                    order.tx_hash
                ));
            }
            LifecycleKind::Cancelled | LifecycleKind::Frozen => {
                if order.transition(OrderStatus::Cancelled) {
                    order.cancel_reason = settlement.reason.clone();
                    warn!(
                        "🚫 Order {:?} cancelled: {}",
                        order.tx_hash,
                        order.cancel_reason.as_deref().unwrap_or("no reason given")
                    );
                }
            }
        }
    }

    /// Rebuild a record from the creation receipt after a restart.
    async fn bootstrap(&self, tx_hash: H256) -> EngineResult<Order> {
        let receipt = self
            .reader
            .receipt(tx_hash)
            .await?
            .ok_or_else(|| EngineError::Rpc(format!("no receipt for {tx_hash:?}")))?;

        let created_block = receipt.block_number.map(|b| b.as_u64()).unwrap_or_default();
        let mut order = Order::submitted(
            tx_hash,
            Address::zero(),
            Address::zero(),
            Decimal::ZERO,
            U256::zero(),
            created_block,
        );

        let failed = receipt.status.map(|s| s.is_zero()).unwrap_or(false);
        if failed {
            order.transition(OrderStatus::Failed);
            order.cancel_reason = Some("creation transaction reverted".to_string());
            return Ok(order);
        }

        order.order_key = receipt.logs.iter().find_map(events::created_order_key);
        if order.order_key.is_none() {
            info!("❓ Receipt {tx_hash:?} succeeded but no order key found; leaving open");
        }
        Ok(order)
    }
}
