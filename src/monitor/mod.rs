use async_trait::async_trait;
use ethers::types::{Address, TransactionReceipt, TransactionRequest, H256, U256};
use log::{error, info, warn};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::config::GasMonitorConfig;
use crate::domain::order::OrderResult;
use crate::errors::{EngineError, EngineResult};
use crate::fees;
use crate::numeric;

// ==================================================
// GAS MONITOR / CIRCUIT BREAKER
// ==================================================
//
// Session state machine: Active -> Paused(reason) -> Active, manual
// reset only. Execution failures come back as TradeExecutionResult
// values, never as Err — trading loops branch on the reason code
// instead of unwinding.

#[async_trait]
pub trait ChainGateway: Send + Sync {
    async fn native_balance(&self, account: Address) -> EngineResult<U256>;
    async fn estimate_gas(&self, tx: &TransactionRequest) -> EngineResult<U256>;
    async fn await_receipt(&self, tx_hash: H256) -> EngineResult<Option<TransactionReceipt>>;
}

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> Address;
    async fn submit(&self, tx: TransactionRequest) -> EngineResult<H256>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceLevel {
    Ok,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct GasCheckResult {
    pub level: BalanceLevel,
    pub balance_wei: U256,
    pub balance_usd: Decimal,
}

/// Re-derived gas estimate for one unsigned transaction. Accounting
/// only; the builder's limit is what goes on the wire.
#[derive(Debug, Clone, Copy)]
pub struct GasEstimate {
    pub raw: U256,
    pub padded: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    OutOfGas,
    Reverted,
    Rejected,
    Error,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::OutOfGas => "out_of_gas",
            FailureReason::Reverted => "reverted",
            FailureReason::Rejected => "rejected",
            FailureReason::Error => "error",
        }
    }
}

/// Outcome of one submission attempt. `success: false` with a reason is
/// the normal failure shape; callers never see an exception here.
#[derive(Debug, Clone)]
pub struct TradeExecutionResult {
    pub success: bool,
    pub tx_hash: Option<H256>,
    pub reason: Option<FailureReason>,
    pub detail: Option<String>,
    pub gas_used: Option<U256>,
    pub gas_cost_usd: Option<Decimal>,
}

impl TradeExecutionResult {
    fn success(tx_hash: H256, gas_used: Option<U256>, gas_cost_usd: Option<Decimal>) -> Self {
        Self {
            success: true,
            tx_hash: Some(tx_hash),
            reason: None,
            detail: None,
            gas_used,
            gas_cost_usd,
        }
    }

    fn failure(reason: FailureReason, detail: String, tx_hash: Option<H256>) -> Self {
        Self {
            success: false,
            tx_hash,
            reason: Some(reason),
            detail: Some(detail),
            gas_used: None,
            gas_cost_usd: None,
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    consecutive_failures: u32,
    paused_reason: Option<String>,
    last_failed_tx: Option<H256>,
}

pub struct GasMonitor<G: ChainGateway> {
    gateway: G,
    config: GasMonitorConfig,
    state: Mutex<SessionState>,
}

impl<G: ChainGateway> GasMonitor<G> {
    pub fn new(gateway: G, config: GasMonitorConfig) -> Self {
        Self {
            gateway,
            config,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.paused_reason.is_some()
    }

    /// Clear the paused state and the failure counter. The only way out
    /// of Paused.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures = 0;
        state.paused_reason = None;
        state.last_failed_tx = None;
        info!("🔄 Gas monitor reset, session active again");
    }

    /// Native balance against the configured USD thresholds.
    pub async fn check_balance(
        &self,
        account: Address,
        native_price_usd: Decimal,
    ) -> EngineResult<GasCheckResult> {
        let balance_wei = self.gateway.native_balance(account).await?;
        let balance_usd = numeric::from_fixed(balance_wei, 18)? * native_price_usd;

        let level = if balance_usd < self.config.critical_usd {
            BalanceLevel::Critical
        } else if balance_usd < self.config.warning_usd {
            BalanceLevel::Warning
        } else {
            BalanceLevel::Ok
        };

        Ok(GasCheckResult {
            level,
            balance_wei,
            balance_usd,
        })
    }

    /// Submit a built order through the signer, gated by the session
    /// state and the balance thresholds.
    pub async fn execute(
        &self,
        order: &OrderResult,
        signer: &dyn TransactionSigner,
        native_price_usd: Decimal,
    ) -> EngineResult<TradeExecutionResult> {
        // Gate on paused before touching the network.
        {
            let state = self.state.lock().await;
            if let Some(reason) = &state.paused_reason {
                let detail = self
                    .pause_diagnostic(reason, state.last_failed_tx, signer.address(), native_price_usd)
                    .await;
                crate::logging::log_rejection(&detail);
                return Ok(TradeExecutionResult::failure(
                    FailureReason::Rejected,
                    detail,
                    None,
                ));
            }
        }

        if self.config.enabled {
            let check = self.check_balance(signer.address(), native_price_usd).await?;
            match check.level {
                BalanceLevel::Critical => {
                    let detail = format!(
                        "critical_balance: ${:.2} below ${:.2} floor — top up gas before trading",
                        check.balance_usd, self.config.critical_usd
                    );
                    if self.config.raise_on_critical {
                        return Err(EngineError::InsufficientBalance {
                            required: self.config.critical_usd,
                            current: check.balance_usd,
                        });
                    }
                    crate::logging::log_rejection(&detail);
                    return Ok(TradeExecutionResult::failure(
                        FailureReason::Rejected,
                        detail,
                        None,
                    ));
                }
                BalanceLevel::Warning => warn!(
                    "⚠️ Gas balance low: ${:.2} (warning floor ${:.2})",
                    check.balance_usd, self.config.warning_usd
                ),
                BalanceLevel::Ok => {}
            }
        }

        if let Ok(estimate) = self.estimate(&order.tx).await {
            info!(
                "⛽ Gas estimate {} (padded {}), limit {}",
                estimate.raw, estimate.padded, order.gas_limit
            );
        }

        let result = self.submit_and_settle(order, signer, native_price_usd).await;
        self.record_outcome(&result).await;
        Ok(result)
    }

    /// Gas estimate for an unsigned transaction, padded by the safety
    /// multiplier.
    pub async fn estimate(&self, tx: &TransactionRequest) -> EngineResult<GasEstimate> {
        let raw = self.gateway.estimate_gas(tx).await?;
        let padded = fees::buffered_fee(raw, self.config.gas_safety_multiplier);
        Ok(GasEstimate { raw, padded })
    }

    async fn submit_and_settle(
        &self,
        order: &OrderResult,
        signer: &dyn TransactionSigner,
        native_price_usd: Decimal,
    ) -> TradeExecutionResult {
        let tx_hash = match signer.submit(order.tx.clone()).await {
            Ok(hash) => hash,
            Err(e) => {
                return TradeExecutionResult::failure(
                    FailureReason::Error,
                    format!("submission failed: {e}"),
                    None,
                )
            }
        };
        info!("📤 Submitted {:?}", tx_hash);

        let receipt = match self.gateway.await_receipt(tx_hash).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                return TradeExecutionResult::failure(
                    FailureReason::Error,
                    "no receipt before timeout".to_string(),
                    Some(tx_hash),
                )
            }
            Err(e) => {
                return TradeExecutionResult::failure(
                    FailureReason::Error,
                    format!("receipt wait failed: {e}"),
                    Some(tx_hash),
                )
            }
        };

        let succeeded = receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false);
        if !succeeded {
            // Gas used equal to the limit is the out-of-gas signature.
            let out_of_gas = receipt.gas_used.map(|g| g >= order.gas_limit).unwrap_or(false);
            let reason = if out_of_gas {
                FailureReason::OutOfGas
            } else {
                FailureReason::Reverted
            };
            error!("💥 Transaction {:?} failed: {}", tx_hash, reason.as_str());
            return TradeExecutionResult::failure(
                reason,
                format!("transaction {tx_hash:?} {}", reason.as_str()),
                Some(tx_hash),
            );
        }

        let gas_cost_usd = self.realized_cost_usd(&receipt, native_price_usd);
        if let Some(cost) = gas_cost_usd {
            if cost > self.config.high_cost_warn_usd {
                warn!(
                    "💸 High gas cost: ${:.2} (warn above ${:.2})",
                    cost, self.config.high_cost_warn_usd
                );
            } else {
                info!("⛽ Realized gas cost ${:.4}", cost);
            }
        }

        crate::logging::log_success(&format!("Order executed in {tx_hash:?}"));
        TradeExecutionResult::success(tx_hash, receipt.gas_used, gas_cost_usd)
    }

    async fn record_outcome(&self, result: &TradeExecutionResult) {
        let mut state = self.state.lock().await;
        if result.success {
            state.consecutive_failures = 0;
            return;
        }
        state.consecutive_failures += 1;
        state.last_failed_tx = result.tx_hash.or(state.last_failed_tx);
        if state.consecutive_failures >= self.config.max_consecutive_failures {
            let reason = format!(
                "{} consecutive submission failures",
                state.consecutive_failures
            );
            error!("🛑 Session paused: {}", reason);
            state.paused_reason = Some(reason);
        }
    }

    fn realized_cost_usd(
        &self,
        receipt: &TransactionReceipt,
        native_price_usd: Decimal,
    ) -> Option<Decimal> {
        let gas_used = receipt.gas_used?;
        let gas_price = receipt.effective_gas_price?;
        let wei = gas_used.checked_mul(gas_price)?;
        numeric::from_fixed(wei, 18)
            .ok()
            .map(|native| native * native_price_usd)
    }

    async fn pause_diagnostic(
        &self,
        reason: &str,
        last_failed_tx: Option<H256>,
        account: Address,
        native_price_usd: Decimal,
    ) -> String {
        let balance = match self.check_balance(account, native_price_usd).await {
            Ok(check) => format!("${:.2}", check.balance_usd),
            Err(_) => "unavailable".to_string(),
        };
        let last_tx = last_failed_tx
            .map(|h| format!("{h:?}"))
            .unwrap_or_else(|| "none".to_string());
        format!(
            "session paused ({reason}); balance {balance}, last failing tx {last_tx} — \
             top up gas or raise the execution buffer, then reset the monitor"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U64;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeGateway {
        balance_wei: U256,
        receipt_status: Option<u64>,
        receipt_gas_used: U256,
    }

    #[async_trait]
    impl ChainGateway for FakeGateway {
        async fn native_balance(&self, _account: Address) -> EngineResult<U256> {
            Ok(self.balance_wei)
        }

        async fn estimate_gas(&self, _tx: &TransactionRequest) -> EngineResult<U256> {
            Ok(U256::from(2_000_000u64))
        }

        async fn await_receipt(
            &self,
            tx_hash: H256,
        ) -> EngineResult<Option<TransactionReceipt>> {
            Ok(self.receipt_status.map(|status| TransactionReceipt {
                transaction_hash: tx_hash,
                status: Some(U64::from(status)),
                gas_used: Some(self.receipt_gas_used),
                effective_gas_price: Some(U256::from(100_000_000u64)),
                ..Default::default()
            }))
        }
    }

    struct CountingSigner {
        calls: AtomicU32,
        fail: bool,
    }

    impl CountingSigner {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransactionSigner for CountingSigner {
        fn address(&self) -> Address {
            Address::from_low_u64_be(0xbb)
        }

        async fn submit(&self, _tx: TransactionRequest) -> EngineResult<H256> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(EngineError::Rpc("nonce too low".to_string()))
            } else {
                Ok(H256::from_low_u64_be(0xfeed))
            }
        }
    }

    fn order() -> OrderResult {
        OrderResult {
            tx: TransactionRequest::new(),
            execution_fee: U256::from(1u64),
            acceptable_price: U256::zero(),
            mark_price: U256::zero(),
            gas_limit: U256::from(3_000_000u64),
        }
    }

    fn monitor(gateway: FakeGateway) -> GasMonitor<FakeGateway> {
        GasMonitor::new(gateway, GasMonitorConfig::default())
    }

    /// 1 ETH at $2000.
    fn healthy_gateway(receipt_status: Option<u64>) -> FakeGateway {
        FakeGateway {
            balance_wei: U256::from_dec_str("1000000000000000000").unwrap(),
            receipt_status,
            receipt_gas_used: U256::from(1_500_000u64),
        }
    }

    #[tokio::test]
    async fn fourth_submission_is_rejected_without_touching_the_signer() {
        let monitor = monitor(healthy_gateway(Some(1)));
        let signer = CountingSigner::new(true);

        for _ in 0..3 {
            let result = monitor.execute(&order(), &signer, dec!(2000)).await.unwrap();
            assert!(!result.success);
            assert_eq!(result.reason, Some(FailureReason::Error));
        }
        assert!(monitor.is_paused().await);
        assert_eq!(signer.calls(), 3);

        let fourth = monitor.execute(&order(), &signer, dec!(2000)).await.unwrap();
        assert!(!fourth.success);
        assert_eq!(fourth.reason, Some(FailureReason::Rejected));
        assert_eq!(signer.calls(), 3); // never reached the signer

        monitor.reset().await;
        assert!(!monitor.is_paused().await);
    }

    #[tokio::test]
    async fn critical_balance_rejects_before_submission() {
        // 0.0002 ETH at $2000 = $0.40, under the $1 floor.
        let monitor = monitor(FakeGateway {
            balance_wei: U256::from_dec_str("200000000000000").unwrap(),
            receipt_status: Some(1),
            receipt_gas_used: U256::zero(),
        });
        let signer = CountingSigner::new(false);

        let result = monitor.execute(&order(), &signer, dec!(2000)).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.reason, Some(FailureReason::Rejected));
        assert_eq!(signer.calls(), 0);
        assert!(!monitor.is_paused().await); // a rejection is not a failure
    }

    #[tokio::test]
    async fn balance_levels_follow_thresholds() {
        let monitor = monitor(healthy_gateway(Some(1)));
        let check = monitor
            .check_balance(Address::zero(), dec!(2000))
            .await
            .unwrap();
        assert_eq!(check.level, BalanceLevel::Ok);
        assert_eq!(check.balance_usd, dec!(2000));

        // 0.002 ETH = $4: warning band.
        let monitor = monitor_with_balance("2000000000000000");
        let check = monitor
            .check_balance(Address::zero(), dec!(2000))
            .await
            .unwrap();
        assert_eq!(check.level, BalanceLevel::Warning);
    }

    fn monitor_with_balance(wei: &str) -> GasMonitor<FakeGateway> {
        monitor(FakeGateway {
            balance_wei: U256::from_dec_str(wei).unwrap(),
            receipt_status: Some(1),
            receipt_gas_used: U256::zero(),
        })
    }

    #[tokio::test]
    async fn gas_estimate_pads_with_safety_multiplier() {
        let monitor = monitor(healthy_gateway(Some(1)));
        let estimate = monitor.estimate(&TransactionRequest::new()).await.unwrap();
        assert_eq!(estimate.raw, U256::from(2_000_000u64));
        // 1.2x default multiplier.
        assert_eq!(estimate.padded, U256::from(2_400_000u64));
    }

    #[tokio::test]
    async fn reverted_receipt_classifies_by_gas_used() {
        // Gas used below the limit: reverted.
        let monitor = monitor(healthy_gateway(Some(0)));
        let signer = CountingSigner::new(false);
        let result = monitor.execute(&order(), &signer, dec!(2000)).await.unwrap();
        assert_eq!(result.reason, Some(FailureReason::Reverted));

        // Gas used at the limit: out of gas.
        let monitor = self::monitor(FakeGateway {
            balance_wei: U256::from_dec_str("1000000000000000000").unwrap(),
            receipt_status: Some(0),
            receipt_gas_used: U256::from(3_000_000u64),
        });
        let result = monitor.execute(&order(), &signer, dec!(2000)).await.unwrap();
        assert_eq!(result.reason, Some(FailureReason::OutOfGas));
    }

    #[tokio::test]
    async fn success_resets_the_failure_counter() {
        let monitor = monitor(healthy_gateway(Some(1)));
        let failing = CountingSigner::new(true);
        let working = CountingSigner::new(false);

        monitor.execute(&order(), &failing, dec!(2000)).await.unwrap();
        monitor.execute(&order(), &failing, dec!(2000)).await.unwrap();
        let ok = monitor.execute(&order(), &working, dec!(2000)).await.unwrap();
        assert!(ok.success);
        assert!(ok.gas_cost_usd.is_some());

        // Two more failures stay under the threshold after the reset.
        monitor.execute(&order(), &failing, dec!(2000)).await.unwrap();
        monitor.execute(&order(), &failing, dec!(2000)).await.unwrap();
        assert!(!monitor.is_paused().await);
    }
}
