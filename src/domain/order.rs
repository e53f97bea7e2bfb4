use ethers::types::{Address, TransactionRequest, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==================================================
// ORDER INTENT
// ==================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn is_long(&self) -> bool {
        matches!(self, Direction::Long)
    }
}

/// What the caller wants built. Maps onto the wire order type together
/// with trigger information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Increase,
    Decrease,
    Swap,
}

/// GMX V2 on-chain `orderType` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    MarketSwap = 0,
    LimitSwap = 1,
    MarketIncrease = 2,
    LimitIncrease = 3,
    MarketDecrease = 4,
    LimitDecrease = 5,
    StopLossDecrease = 6,
}

impl OrderType {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Immutable input to order construction. Decimal fields are user-facing
/// values; conversion to wire integers happens inside the builder.
#[derive(Debug, Clone)]
pub struct OrderParams {
    pub market_key: Address,
    pub collateral_token: Address,
    pub index_token: Address,
    pub direction: Direction,
    /// Position size delta in USD.
    pub size_delta_usd: Decimal,
    /// Collateral delta in the collateral token's own units.
    pub collateral_delta: Decimal,
    /// Slippage tolerance in percent, e.g. 0.3 for 0.3%.
    pub slippage_percent: Decimal,
    pub swap_path: Vec<Address>,
    /// Execution-fee buffer multiplier applied on top of the base estimate.
    pub execution_buffer: f64,
    pub auto_cancel: bool,
}

// ==================================================
// SLTP SPECS
// ==================================================

/// Trigger spec: absolute price or percent away from the entry price.
/// The two are mutually exclusive by construction.
#[derive(Debug, Clone, Copy)]
pub enum TriggerSpec {
    Price(Decimal),
    PercentFromEntry(Decimal),
}

/// How much of the position a leg closes.
#[derive(Debug, Clone, Copy)]
pub enum CloseSpec {
    PercentOfPosition(Decimal),
    Usd(Decimal),
}

#[derive(Debug, Clone)]
pub struct SltpEntry {
    pub trigger: TriggerSpec,
    pub close: CloseSpec,
    pub auto_cancel: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SltpParams {
    pub stop_loss: Option<SltpEntry>,
    pub take_profit: Option<SltpEntry>,
}

/// Resolved decrease-leg amounts, ready for argument encoding.
#[derive(Debug, Clone, Copy)]
pub struct DecreaseAmounts {
    pub size_delta_usd: U256,
    pub collateral_delta: U256,
    pub trigger_price: U256,
    pub acceptable_price: U256,
    pub order_type: OrderType,
    pub is_full_close: bool,
}

// ==================================================
// BUILD RESULTS
// ==================================================

/// One unsigned, fully encoded transaction. Consumed by the gas monitor.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub tx: TransactionRequest,
    pub execution_fee: U256,
    pub acceptable_price: U256,
    pub mark_price: U256,
    pub gas_limit: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegKind {
    Primary,
    StopLoss,
    TakeProfit,
}

/// Aggregate of one bundled SLTP transaction. Read-only once built.
#[derive(Debug, Clone)]
pub struct SltpOrderResult {
    pub tx: TransactionRequest,
    pub total_execution_fee: U256,
    pub entry_price: U256,
    pub stop_loss_trigger: Option<U256>,
    pub take_profit_trigger: Option<U256>,
    pub leg_fees: Vec<(LegKind, U256)>,
    pub gas_limit: U256,
}

// ==================================================
// RECONCILIATION RECORD
// ==================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Closed,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Open)
    }
}

/// Fee attached to a reconciliation record. Starts as the gas-fee
/// placeholder from submission; rebuilt into the realized trading fee
/// once an execution is found.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderFee {
    GasPlaceholder { execution_fee_wei: U256 },
    Realized { trading_fee_usd: Decimal },
}

/// Order lifecycle record, identified by the creation transaction hash.
/// Mutated in place only by the reconciler, and never out of a terminal
/// status.
#[derive(Debug, Clone)]
pub struct Order {
    pub tx_hash: H256,
    pub status: OrderStatus,
    pub order_key: Option<H256>,
    pub market_key: Address,
    pub index_token: Address,
    pub size_usd: Decimal,
    pub filled_usd: Option<Decimal>,
    pub remaining_usd: Option<Decimal>,
    pub average_price: Option<Decimal>,
    pub fee: OrderFee,
    pub cancel_reason: Option<String>,
    pub created_block: u64,
}

impl Order {
    pub fn submitted(
        tx_hash: H256,
        market_key: Address,
        index_token: Address,
        size_usd: Decimal,
        execution_fee_wei: U256,
        created_block: u64,
    ) -> Self {
        Self {
            tx_hash,
            status: OrderStatus::Open,
            order_key: None,
            market_key,
            index_token,
            size_usd,
            filled_usd: None,
            remaining_usd: None,
            average_price: None,
            fee: OrderFee::GasPlaceholder { execution_fee_wei },
            cancel_reason: None,
            created_block,
        }
    }

    /// Apply a new status. Returns false (and changes nothing) if the
    /// record is already terminal.
    pub fn transition(&mut self, status: OrderStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_order_type_values() {
        assert_eq!(OrderType::MarketSwap.as_u8(), 0);
        assert_eq!(OrderType::MarketIncrease.as_u8(), 2);
        assert_eq!(OrderType::MarketDecrease.as_u8(), 4);
        assert_eq!(OrderType::LimitDecrease.as_u8(), 5);
        assert_eq!(OrderType::StopLossDecrease.as_u8(), 6);
    }

    #[test]
    fn terminal_status_is_sticky() {
        let mut order = Order::submitted(
            H256::zero(),
            Address::zero(),
            Address::zero(),
            Decimal::from(100),
            U256::from(1u64),
            0,
        );
        assert!(order.transition(OrderStatus::Closed));
        assert!(!order.transition(OrderStatus::Cancelled));
        assert_eq!(order.status, OrderStatus::Closed);
    }

    #[test]
    fn open_is_not_terminal() {
        assert!(!OrderStatus::Open.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
    }
}
