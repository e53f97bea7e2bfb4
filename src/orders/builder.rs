use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use std::sync::Arc;

use crate::config::ContractAddresses;
use crate::contracts::{
    CreateOrderCall, CreateOrderParams, CreateOrderParamsAddresses, CreateOrderParamsNumbers,
    MulticallCall, SendTokensCall, SendWntCall,
};
use crate::domain::order::{OrderKind, OrderParams, OrderResult, OrderType};
use crate::domain::{MarketRegistry, OracleSnapshot};
use crate::errors::{EngineError, EngineResult};
use crate::fees::{self, GasLimits, MULTICALL_GAS_OVERHEAD};
use crate::numeric;

// ==================================================
// ALLOWANCE SEAM
// ==================================================
//
// Constructor-injected so tests use a fake instead of a live provider.
// The builder only ever reads; approvals are the caller's problem.

#[async_trait]
pub trait AllowanceSource: Send + Sync {
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> EngineResult<U256>;
}

// ==================================================
// ORDER BUILDER
// ==================================================
//
// Turns user intent plus a market/oracle snapshot into one unsigned
// multicall transaction. Pure encoding — nothing is written to the
// network until the caller submits.

/// One order's slice of a multicall: its calls (fee funding first,
/// creation last), the native value they need, and its economics.
#[derive(Debug, Clone)]
pub(crate) struct BuiltLeg {
    pub calls: Vec<Bytes>,
    pub value: U256,
    pub execution_fee: U256,
    pub acceptable_price: U256,
    pub mark_price: U256,
}

pub struct OrderBuilder {
    registry: MarketRegistry,
    oracle: OracleSnapshot,
    gas_limits: GasLimits,
    gas_price: U256,
    contracts: ContractAddresses,
    account: Address,
    allowance: Arc<dyn AllowanceSource>,
    referral_code: [u8; 32],
}

impl OrderBuilder {
    pub fn new(
        registry: MarketRegistry,
        oracle: OracleSnapshot,
        gas_limits: GasLimits,
        gas_price: U256,
        contracts: ContractAddresses,
        account: Address,
        allowance: Arc<dyn AllowanceSource>,
    ) -> Self {
        Self {
            registry,
            oracle,
            gas_limits,
            gas_price,
            contracts,
            account,
            allowance,
            referral_code: [0u8; 32],
        }
    }

    /// Attach an affiliate referral code to every created order.
    pub fn with_referral_code(mut self, code: [u8; 32]) -> Self {
        self.referral_code = code;
        self
    }

    pub fn registry(&self) -> &MarketRegistry {
        &self.registry
    }

    pub fn oracle(&self) -> &OracleSnapshot {
        &self.oracle
    }

    pub(crate) fn gas_limits(&self) -> &GasLimits {
        &self.gas_limits
    }

    pub(crate) fn gas_price(&self) -> U256 {
        self.gas_price
    }

    pub(crate) fn contracts(&self) -> &ContractAddresses {
        &self.contracts
    }

    pub(crate) fn account(&self) -> Address {
        self.account
    }

    pub(crate) fn allowance_source(&self) -> &Arc<dyn AllowanceSource> {
        &self.allowance
    }

    /// Build one market order of the given kind.
    pub async fn build(&self, params: &OrderParams, kind: OrderKind) -> EngineResult<OrderResult> {
        let leg = self.build_checked_leg(params, kind).await?;
        let gas_limit = self.gas_limits.for_order_kind(kind) + U256::from(MULTICALL_GAS_OVERHEAD);

        Ok(OrderResult {
            tx: self.multicall_tx(leg.calls.clone(), leg.value, gas_limit),
            execution_fee: leg.execution_fee,
            acceptable_price: leg.acceptable_price,
            mark_price: leg.mark_price,
            gas_limit,
        })
    }

    /// Leg construction plus the allowance pre-flight for ERC-20
    /// collateral deposits.
    pub(crate) async fn build_checked_leg(
        &self,
        params: &OrderParams,
        kind: OrderKind,
    ) -> EngineResult<BuiltLeg> {
        let leg = self.build_leg(params, kind)?;

        let deposits_collateral = matches!(kind, OrderKind::Increase | OrderKind::Swap);
        if deposits_collateral && params.collateral_token != self.contracts.wnt {
            let required = self.collateral_amount(params)?;
            let current = self
                .allowance
                .allowance(
                    params.collateral_token,
                    self.account,
                    self.contracts.exchange_router,
                )
                .await?;
            if current < required {
                let token = self
                    .registry
                    .token(params.collateral_token)
                    .map(|t| t.symbol.clone())
                    .unwrap_or_else(|_| format!("{:?}", params.collateral_token));
                return Err(EngineError::InsufficientApproval {
                    token,
                    required,
                    current,
                });
            }
        }

        Ok(leg)
    }

    /// Pure encoding of one order leg. The multicall slice is always
    /// fee funding first and order creation last.
    pub(crate) fn build_leg(&self, params: &OrderParams, kind: OrderKind) -> EngineResult<BuiltLeg> {
        let market = self.registry.resolve(params.market_key)?;
        let quote = self.oracle.price_for(params.index_token)?;
        let mark_price = quote.mid();

        let acceptable_price = self.acceptable_price(params, kind, mark_price)?;
        let size_delta_usd = match kind {
            OrderKind::Swap => U256::zero(),
            _ => numeric::to_usd_30(params.size_delta_usd)?,
        };
        let collateral_amount = self.collateral_amount(params)?;

        let base_fee = fees::estimate_execution_fee(
            &self.gas_limits,
            self.gas_limits.for_order_kind(kind),
            self.oracle_price_count(params),
            self.gas_price,
        );
        let execution_fee = fees::buffered_fee(base_fee, params.execution_buffer);

        let is_native = params.collateral_token == self.contracts.wnt;
        let deposits_collateral = matches!(kind, OrderKind::Increase | OrderKind::Swap);

        let mut calls = Vec::with_capacity(3);
        let mut value = execution_fee;

        // Fund the keeper fee. Native collateral is folded into the same
        // sendWnt instead of a separate transfer.
        let wnt_amount = if is_native && deposits_collateral {
            value += collateral_amount;
            execution_fee + collateral_amount
        } else {
            execution_fee
        };
        calls.push(
            SendWntCall {
                receiver: self.contracts.order_vault,
                amount: wnt_amount,
            }
            .encode()
            .into(),
        );

        if deposits_collateral && !is_native {
            calls.push(
                SendTokensCall {
                    token: params.collateral_token,
                    receiver: self.contracts.order_vault,
                    amount: collateral_amount,
                }
                .encode()
                .into(),
            );
        }

        let order_type = match kind {
            OrderKind::Increase => OrderType::MarketIncrease,
            OrderKind::Decrease => OrderType::MarketDecrease,
            OrderKind::Swap => OrderType::MarketSwap,
        };

        let create = CreateOrderParams {
            addresses: CreateOrderParamsAddresses {
                receiver: self.account,
                cancellation_receiver: self.account,
                callback_contract: Address::zero(),
                ui_fee_receiver: Address::zero(),
                market: match kind {
                    OrderKind::Swap => Address::zero(),
                    _ => market.market_token,
                },
                initial_collateral_token: params.collateral_token,
                swap_path: params.swap_path.clone(),
            },
            numbers: CreateOrderParamsNumbers {
                size_delta_usd,
                initial_collateral_delta_amount: collateral_amount,
                trigger_price: U256::zero(),
                acceptable_price,
                execution_fee,
                callback_gas_limit: U256::zero(),
                min_output_amount: U256::zero(),
                valid_from_time: U256::zero(),
            },
            order_type: order_type.as_u8(),
            decrease_position_swap_type: 0,
            is_long: params.direction.is_long(),
            should_unwrap_native_token: is_native,
            auto_cancel: params.auto_cancel,
            referral_code: self.referral_code,
        };
        calls.push(CreateOrderCall { params: create }.encode().into());

        Ok(BuiltLeg {
            calls,
            value,
            execution_fee,
            acceptable_price,
            mark_price,
        })
    }

    /// Encode a fully resolved trigger-decrease order (SLTP legs).
    pub(crate) fn build_trigger_decrease_leg(
        &self,
        params: &OrderParams,
        amounts: &crate::domain::order::DecreaseAmounts,
        execution_fee: U256,
        auto_cancel: bool,
    ) -> EngineResult<BuiltLeg> {
        let market = self.registry.resolve(params.market_key)?;
        let quote = self.oracle.price_for(params.index_token)?;

        let calls = vec![
            SendWntCall {
                receiver: self.contracts.order_vault,
                amount: execution_fee,
            }
            .encode()
            .into(),
            CreateOrderCall {
                params: CreateOrderParams {
                    addresses: CreateOrderParamsAddresses {
                        receiver: self.account,
                        cancellation_receiver: self.account,
                        callback_contract: Address::zero(),
                        ui_fee_receiver: Address::zero(),
                        market: market.market_token,
                        initial_collateral_token: params.collateral_token,
                        swap_path: vec![],
                    },
                    numbers: CreateOrderParamsNumbers {
                        size_delta_usd: amounts.size_delta_usd,
                        initial_collateral_delta_amount: amounts.collateral_delta,
                        trigger_price: amounts.trigger_price,
                        acceptable_price: amounts.acceptable_price,
                        execution_fee,
                        callback_gas_limit: U256::zero(),
                        min_output_amount: U256::zero(),
                        valid_from_time: U256::zero(),
                    },
                    order_type: amounts.order_type.as_u8(),
                    decrease_position_swap_type: 0,
                    is_long: params.direction.is_long(),
                    should_unwrap_native_token: params.collateral_token == self.contracts.wnt,
                    auto_cancel,
                    referral_code: self.referral_code,
                },
            }
            .encode()
            .into(),
        ];

        Ok(BuiltLeg {
            calls,
            value: execution_fee,
            execution_fee,
            acceptable_price: amounts.acceptable_price,
            mark_price: quote.mid(),
        })
    }

    pub(crate) fn multicall_tx(
        &self,
        calls: Vec<Bytes>,
        value: U256,
        gas_limit: U256,
    ) -> TransactionRequest {
        TransactionRequest::new()
            .to(self.contracts.exchange_router)
            .data(Bytes::from(MulticallCall { data: calls }.encode()))
            .value(value)
            .gas(gas_limit)
    }

    /// Slippage is applied on the side that protects the trader:
    /// worse-for-trader when opening, the opposite when closing. Swaps
    /// carry no price protection at all.
    fn acceptable_price(
        &self,
        params: &OrderParams,
        kind: OrderKind,
        mark_price: U256,
    ) -> EngineResult<U256> {
        let is_long = params.direction.is_long();
        match kind {
            OrderKind::Swap => Ok(U256::zero()),
            OrderKind::Increase => {
                numeric::apply_slippage(mark_price, params.slippage_percent, is_long)
            }
            OrderKind::Decrease => {
                numeric::apply_slippage(mark_price, params.slippage_percent, !is_long)
            }
        }
    }

    fn collateral_amount(&self, params: &OrderParams) -> EngineResult<U256> {
        let decimals = self.registry.token(params.collateral_token)?.decimals;
        numeric::expand_decimals(params.collateral_delta, decimals)
    }

    /// Prices the keeper must fetch: index, long and short token, plus
    /// one per swap hop.
    fn oracle_price_count(&self, params: &OrderParams) -> u32 {
        3 + params.swap_path.len() as u32
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::order::Direction;
    use crate::domain::{MarketInfo, OraclePrice, TokenInfo};
    use ethers::abi::AbiDecode;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    pub(crate) const WETH: u64 = 0x11;
    pub(crate) const USDC: u64 = 0x22;
    pub(crate) const MARKET: u64 = 0x33;

    pub(crate) fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    pub(crate) struct FakeAllowance {
        pub amount: U256,
    }

    #[async_trait]
    impl AllowanceSource for FakeAllowance {
        async fn allowance(&self, _t: Address, _o: Address, _s: Address) -> EngineResult<U256> {
            Ok(self.amount)
        }
    }

    pub(crate) fn test_contracts() -> ContractAddresses {
        ContractAddresses {
            exchange_router: addr(0xa1),
            data_store: addr(0xa2),
            event_emitter: addr(0xa3),
            order_vault: addr(0xa4),
            deposit_vault: addr(0xa5),
            withdrawal_vault: addr(0xa6),
            wnt: addr(WETH),
            usdc: addr(USDC),
        }
    }

    /// $2000 ETH market with WETH (18 dec) and USDC (6 dec).
    pub(crate) fn test_builder(allowance: U256) -> OrderBuilder {
        let registry = MarketRegistry::new(
            vec![MarketInfo {
                market_token: addr(MARKET),
                index_token: addr(WETH),
                long_token: addr(WETH),
                short_token: addr(USDC),
                name: "ETH/USD [WETH-USDC]".to_string(),
            }],
            vec![
                TokenInfo {
                    address: addr(WETH),
                    symbol: "WETH".to_string(),
                    decimals: 18,
                    synthetic: false,
                },
                TokenInfo {
                    address: addr(USDC),
                    symbol: "USDC".to_string(),
                    decimals: 6,
                    synthetic: false,
                },
            ],
        );

        // 30 - 18 = 12 price decimals: $2000 -> 2000e12.
        let mut prices = HashMap::new();
        prices.insert(
            addr(WETH),
            OraclePrice {
                min: U256::from_dec_str("1999000000000000").unwrap(),
                max: U256::from_dec_str("2001000000000000").unwrap(),
            },
        );

        OrderBuilder::new(
            registry,
            OracleSnapshot::new(prices, 0),
            GasLimits::defaults(),
            U256::from(100_000_000u64), // 0.1 gwei
            test_contracts(),
            addr(0xbb),
            Arc::new(FakeAllowance { amount: allowance }),
        )
    }

    pub(crate) fn long_open_params(collateral_token: u64) -> OrderParams {
        OrderParams {
            market_key: addr(MARKET),
            collateral_token: addr(collateral_token),
            index_token: addr(WETH),
            direction: Direction::Long,
            size_delta_usd: dec!(100),
            collateral_delta: dec!(50),
            slippage_percent: dec!(0.3),
            swap_path: vec![],
            execution_buffer: 2.0,
            auto_cancel: false,
        }
    }

    fn decode_multicall(tx: &TransactionRequest) -> Vec<Bytes> {
        let data = tx.data.clone().expect("multicall data");
        MulticallCall::decode(data.as_ref()).expect("multicall").data
    }

    #[tokio::test]
    async fn long_open_rounds_acceptable_price_against_trader() {
        let builder = test_builder(U256::MAX);
        let result = builder
            .build(&long_open_params(USDC), OrderKind::Increase)
            .await
            .unwrap();

        let mark = U256::from_dec_str("2000000000000000").unwrap();
        assert_eq!(result.mark_price, mark);
        // Long open: price + slippage, so acceptable >= mark ($2000).
        assert!(result.acceptable_price >= mark);
        assert_eq!(
            result.acceptable_price,
            U256::from_dec_str("2006000000000000").unwrap()
        );
    }

    #[tokio::test]
    async fn usdc_collateral_encodes_50_notional_and_exact_size() {
        let builder = test_builder(U256::MAX);
        let result = builder
            .build(&long_open_params(USDC), OrderKind::Increase)
            .await
            .unwrap();

        let calls = decode_multicall(&result.tx);
        assert_eq!(calls.len(), 3); // sendWnt, sendTokens, createOrder

        let transfer = SendTokensCall::decode(calls[1].as_ref()).unwrap();
        assert_eq!(transfer.amount, U256::from(50_000_000u64)); // $50 in 6 dec

        let create = CreateOrderCall::decode(calls[2].as_ref()).unwrap();
        assert_eq!(
            create.params.numbers.size_delta_usd,
            U256::from_dec_str("100000000000000000000000000000000").unwrap()
        );
        assert!(create.params.is_long);
    }

    #[tokio::test]
    async fn native_collateral_folds_into_fee_funding() {
        let builder = test_builder(U256::zero());
        let mut params = long_open_params(WETH);
        params.collateral_delta = dec!(0.025); // 0.025 WETH

        let result = builder.build(&params, OrderKind::Increase).await.unwrap();
        let calls = decode_multicall(&result.tx);
        assert_eq!(calls.len(), 2); // no separate sendTokens

        let fund = SendWntCall::decode(calls[0].as_ref()).unwrap();
        let collateral = U256::from_dec_str("25000000000000000").unwrap();
        assert_eq!(fund.amount, result.execution_fee + collateral);
        assert_eq!(result.tx.value, Some(fund.amount));
    }

    #[tokio::test]
    async fn short_open_rounds_acceptable_price_down() {
        let builder = test_builder(U256::MAX);
        let mut params = long_open_params(USDC);
        params.direction = Direction::Short;

        let result = builder.build(&params, OrderKind::Increase).await.unwrap();
        assert!(result.acceptable_price < result.mark_price);
    }

    #[tokio::test]
    async fn decrease_flips_slippage_side_and_skips_transfer() {
        let builder = test_builder(U256::zero()); // no allowance needed to close
        let result = builder
            .build(&long_open_params(USDC), OrderKind::Decrease)
            .await
            .unwrap();

        assert!(result.acceptable_price < result.mark_price);
        let calls = decode_multicall(&result.tx);
        assert_eq!(calls.len(), 2);
        let create = CreateOrderCall::decode(calls[1].as_ref()).unwrap();
        assert_eq!(
            create.params.order_type,
            OrderType::MarketDecrease.as_u8()
        );
    }

    #[tokio::test]
    async fn swap_has_no_price_protection() {
        let builder = test_builder(U256::MAX);
        let mut params = long_open_params(USDC);
        params.swap_path = vec![addr(MARKET)];

        let result = builder.build(&params, OrderKind::Swap).await.unwrap();
        assert_eq!(result.acceptable_price, U256::zero());

        let calls = decode_multicall(&result.tx);
        let create = CreateOrderCall::decode(calls.last().unwrap().as_ref()).unwrap();
        assert_eq!(create.params.order_type, OrderType::MarketSwap.as_u8());
        assert_eq!(create.params.numbers.size_delta_usd, U256::zero());
        assert_eq!(create.params.addresses.swap_path, vec![addr(MARKET)]);
    }

    #[tokio::test]
    async fn insufficient_allowance_names_amounts_and_never_approves() {
        let builder = test_builder(U256::from(1_000_000u64)); // $1 approved
        let err = builder
            .build(&long_open_params(USDC), OrderKind::Increase)
            .await
            .unwrap_err();

        match err {
            EngineError::InsufficientApproval {
                token,
                required,
                current,
            } => {
                assert_eq!(token, "USDC");
                assert_eq!(required, U256::from(50_000_000u64));
                assert_eq!(current, U256::from(1_000_000u64));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unknown_market_fails_fast() {
        let builder = test_builder(U256::MAX);
        let mut params = long_open_params(USDC);
        params.market_key = addr(0xdead);
        let err = builder
            .build(&params, OrderKind::Increase)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MarketNotFound(_)));
    }

    #[tokio::test]
    async fn missing_oracle_price_fails_fast() {
        let builder = test_builder(U256::MAX);
        let mut params = long_open_params(USDC);
        params.index_token = addr(0xbeef);
        let err = builder
            .build(&params, OrderKind::Increase)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PriceUnavailable(_)));
    }
}
