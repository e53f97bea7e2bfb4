use ethers::providers::Middleware;
use ethers::types::{H256, U256};
use log::warn;

use crate::contracts::{self, DataStore};
use crate::domain::order::OrderKind;
use crate::errors::{EngineError, EngineResult};

// ==================================================
// EXECUTION FEE / GAS MODEL
// ==================================================
//
// Base fee mirrors the contract's own validation formula:
//   (order-kind gas limit + oracle count * per-oracle gas + base gas) * gas price
// The buffer is a straight multiply-then-truncate on top; the keeper keeps
// what it spends and the excess is refunded on-chain.

/// Fixed gas added to a transaction's limit for multicall dispatch.
pub const MULTICALL_GAS_OVERHEAD: u64 = 100_000;

/// Recommended buffer for standalone orders.
pub const RECOMMENDED_BUFFER: f64 = 2.0;

/// Recommended buffer for bundled SLTP orders.
pub const RECOMMENDED_SLTP_BUFFER: f64 = 2.5;

/// Gas-limit constants mirrored from the DataStore.
#[derive(Debug, Clone, Copy)]
pub struct GasLimits {
    pub increase_order: U256,
    pub decrease_order: U256,
    pub swap_order: U256,
    pub deposit: U256,
    pub withdrawal: U256,
    pub single_swap: U256,
    pub base_gas: U256,
    pub per_oracle_gas: U256,
}

impl GasLimits {
    /// Conservative fallbacks for when the DataStore is unreachable.
    pub fn defaults() -> Self {
        Self {
            increase_order: U256::from(4_000_000u64),
            decrease_order: U256::from(4_000_000u64),
            swap_order: U256::from(3_000_000u64),
            deposit: U256::from(2_500_000u64),
            withdrawal: U256::from(2_500_000u64),
            single_swap: U256::from(1_000_000u64),
            base_gas: U256::from(600_000u64),
            per_oracle_gas: U256::from(250_000u64),
        }
    }

    pub fn for_order_kind(&self, kind: OrderKind) -> U256 {
        match kind {
            OrderKind::Increase => self.increase_order,
            OrderKind::Decrease => self.decrease_order,
            OrderKind::Swap => self.swap_order,
        }
    }
}

/// Read the live gas-limit constants. Falls back to defaults per-key only
/// for the two estimate constants some deployments leave unset.
pub async fn load_gas_limits<M: Middleware>(data_store: &DataStore<M>) -> EngineResult<GasLimits> {
    let read = |key: H256| data_store.get_uint(key.into());

    let increase_order = read(contracts::increase_order_gas_limit_key())
        .call()
        .await
        .map_err(|e| EngineError::Rpc(e.to_string()))?;
    let decrease_order = read(contracts::decrease_order_gas_limit_key())
        .call()
        .await
        .map_err(|e| EngineError::Rpc(e.to_string()))?;
    let swap_order = read(contracts::swap_order_gas_limit_key())
        .call()
        .await
        .map_err(|e| EngineError::Rpc(e.to_string()))?;
    let deposit = read(contracts::deposit_gas_limit_key())
        .call()
        .await
        .map_err(|e| EngineError::Rpc(e.to_string()))?;
    let withdrawal = read(contracts::withdrawal_gas_limit_key())
        .call()
        .await
        .map_err(|e| EngineError::Rpc(e.to_string()))?;
    let single_swap = read(contracts::single_swap_gas_limit_key())
        .call()
        .await
        .map_err(|e| EngineError::Rpc(e.to_string()))?;

    let defaults = GasLimits::defaults();
    let base_gas = match read(contracts::estimated_gas_fee_base_key()).call().await {
        Ok(v) if !v.is_zero() => v,
        _ => defaults.base_gas,
    };
    let per_oracle_gas = match read(contracts::estimated_gas_fee_per_oracle_key())
        .call()
        .await
    {
        Ok(v) if !v.is_zero() => v,
        _ => defaults.per_oracle_gas,
    };

    Ok(GasLimits {
        increase_order,
        decrease_order,
        swap_order,
        deposit,
        withdrawal,
        single_swap,
        base_gas,
        per_oracle_gas,
    })
}

/// Base keeper fee in wei for one operation.
pub fn estimate_execution_fee(
    limits: &GasLimits,
    operation_gas: U256,
    oracle_count: u32,
    gas_price: U256,
) -> U256 {
    let total_gas = operation_gas + limits.per_oracle_gas * U256::from(oracle_count) + limits.base_gas;
    total_gas * gas_price
}

/// Apply the execution-fee buffer. Multiply-then-truncate at milli
/// precision, so `buffered_fee(base, 1.0) == base` holds exactly.
pub fn buffered_fee(base: U256, buffer: f64) -> U256 {
    let millis = if buffer.is_finite() && buffer > 0.0 {
        (buffer * 1000.0).round() as u64
    } else {
        warn!("invalid fee buffer {buffer}, using 1.0");
        1000
    };
    base * U256::from(millis) / U256::from(1000u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRating {
    /// Below 1.2x: the keeper will likely reject the order.
    Critical,
    /// Below 1.5x: risky under gas-price movement.
    Warning,
    Acceptable,
    /// 1.8-2.2x for standard orders, ~2.5x for bundled SLTP.
    Recommended,
}

/// Classify a buffer. Never fails — even absurd values only get a rating.
pub fn validate_buffer(buffer: f64) -> BufferRating {
    if !buffer.is_finite() || buffer < 1.2 {
        BufferRating::Critical
    } else if buffer < 1.5 {
        BufferRating::Warning
    } else if (1.8..=2.2).contains(&buffer) || (buffer - RECOMMENDED_SLTP_BUFFER).abs() < 0.05 {
        BufferRating::Recommended
    } else {
        BufferRating::Acceptable
    }
}
