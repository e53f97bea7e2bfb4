use ethers::abi::AbiEncode;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use rust_decimal::Decimal;

use super::builder::OrderBuilder;
use crate::contracts::{
    CreateDepositCall, CreateDepositParams, CreateWithdrawalCall, CreateWithdrawalParams,
    SendTokensCall, SendWntCall,
};
use crate::errors::{EngineError, EngineResult};
use crate::fees::{self, MULTICALL_GAS_OVERHEAD};
use crate::numeric;

// ==================================================
// LIQUIDITY BUILDERS
// ==================================================
//
// Deposits mint GM tokens from long/short token amounts; withdrawals
// burn them back. Same multicall shape as orders, but funds flow through
// the deposit/withdrawal vaults instead of the order vault.

/// GM (market) tokens always carry 18 decimals.
const MARKET_TOKEN_DECIMALS: u32 = 18;

#[derive(Debug, Clone)]
pub struct DepositParams {
    pub market_key: Address,
    /// Long-side token amount in token units; zero to deposit one-sided.
    pub long_amount: Decimal,
    /// Short-side token amount in token units; zero to deposit one-sided.
    pub short_amount: Decimal,
    /// Minimum GM tokens to accept, in 18-decimal units.
    pub min_market_tokens: U256,
    pub execution_buffer: f64,
}

#[derive(Debug, Clone)]
pub struct WithdrawalParams {
    pub market_key: Address,
    /// GM tokens to burn, in token units.
    pub market_token_amount: Decimal,
    pub min_long_token_amount: U256,
    pub min_short_token_amount: U256,
    pub execution_buffer: f64,
}

#[derive(Debug, Clone)]
pub struct LiquidityResult {
    pub tx: TransactionRequest,
    pub execution_fee: U256,
    pub gas_limit: U256,
}

pub struct LiquidityBuilder<'a> {
    builder: &'a OrderBuilder,
}

impl<'a> LiquidityBuilder<'a> {
    pub fn new(builder: &'a OrderBuilder) -> Self {
        Self { builder }
    }

    pub async fn build_deposit(&self, params: &DepositParams) -> EngineResult<LiquidityResult> {
        let market = self.builder.registry().resolve(params.market_key)?;
        let contracts = self.builder.contracts();

        let long_amount = self.token_amount(market.long_token, params.long_amount)?;
        let short_amount = self.token_amount(market.short_token, params.short_amount)?;
        if long_amount.is_zero() && short_amount.is_zero() {
            return Err(EngineError::Numeric(
                "deposit needs a non-zero long or short amount".to_string(),
            ));
        }

        let base_fee = fees::estimate_execution_fee(
            self.builder.gas_limits(),
            self.builder.gas_limits().deposit,
            3,
            self.builder.gas_price(),
        );
        let execution_fee = fees::buffered_fee(base_fee, params.execution_buffer);

        let mut calls: Vec<Bytes> = Vec::with_capacity(4);
        let mut value = execution_fee;
        let mut wnt_amount = execution_fee;

        // Native deposits fold into the fee-funding sendWnt; ERC-20 sides
        // get their own transfer after an allowance pre-flight.
        for (token, amount) in [(market.long_token, long_amount), (market.short_token, short_amount)]
        {
            if amount.is_zero() {
                continue;
            }
            if token == contracts.wnt {
                wnt_amount += amount;
                value += amount;
            } else {
                self.require_allowance(token, amount).await?;
                calls.push(
                    SendTokensCall {
                        token,
                        receiver: contracts.deposit_vault,
                        amount,
                    }
                    .encode()
                    .into(),
                );
            }
        }
        calls.insert(
            0,
            SendWntCall {
                receiver: contracts.deposit_vault,
                amount: wnt_amount,
            }
            .encode()
            .into(),
        );

        calls.push(
            CreateDepositCall {
                params: CreateDepositParams {
                    receiver: self.builder.account(),
                    callback_contract: Address::zero(),
                    ui_fee_receiver: Address::zero(),
                    market: market.market_token,
                    initial_long_token: market.long_token,
                    initial_short_token: market.short_token,
                    long_token_swap_path: vec![],
                    short_token_swap_path: vec![],
                    min_market_tokens: params.min_market_tokens,
                    should_unwrap_native_token: market.long_token == contracts.wnt
                        || market.short_token == contracts.wnt,
                    execution_fee,
                    callback_gas_limit: U256::zero(),
                },
            }
            .encode()
            .into(),
        );

        let gas_limit = self.builder.gas_limits().deposit + U256::from(MULTICALL_GAS_OVERHEAD);
        Ok(LiquidityResult {
            tx: self.builder.multicall_tx(calls, value, gas_limit),
            execution_fee,
            gas_limit,
        })
    }

    pub async fn build_withdrawal(
        &self,
        params: &WithdrawalParams,
    ) -> EngineResult<LiquidityResult> {
        let market = self.builder.registry().resolve(params.market_key)?;
        let contracts = self.builder.contracts();

        let amount = numeric::expand_decimals(params.market_token_amount, MARKET_TOKEN_DECIMALS)?;
        if amount.is_zero() {
            return Err(EngineError::Numeric(
                "withdrawal needs a non-zero GM amount".to_string(),
            ));
        }
        self.require_allowance(market.market_token, amount).await?;

        let base_fee = fees::estimate_execution_fee(
            self.builder.gas_limits(),
            self.builder.gas_limits().withdrawal,
            3,
            self.builder.gas_price(),
        );
        let execution_fee = fees::buffered_fee(base_fee, params.execution_buffer);

        let calls: Vec<Bytes> = vec![
            SendWntCall {
                receiver: contracts.withdrawal_vault,
                amount: execution_fee,
            }
            .encode()
            .into(),
            SendTokensCall {
                token: market.market_token,
                receiver: contracts.withdrawal_vault,
                amount,
            }
            .encode()
            .into(),
            CreateWithdrawalCall {
                params: CreateWithdrawalParams {
                    receiver: self.builder.account(),
                    callback_contract: Address::zero(),
                    ui_fee_receiver: Address::zero(),
                    market: market.market_token,
                    long_token_swap_path: vec![],
                    short_token_swap_path: vec![],
                    min_long_token_amount: params.min_long_token_amount,
                    min_short_token_amount: params.min_short_token_amount,
                    should_unwrap_native_token: market.long_token == contracts.wnt
                        || market.short_token == contracts.wnt,
                    execution_fee,
                    callback_gas_limit: U256::zero(),
                },
            }
            .encode()
            .into(),
        ];

        let gas_limit = self.builder.gas_limits().withdrawal + U256::from(MULTICALL_GAS_OVERHEAD);
        Ok(LiquidityResult {
            tx: self.builder.multicall_tx(calls, execution_fee, gas_limit),
            execution_fee,
            gas_limit,
        })
    }

    fn token_amount(&self, token: Address, amount: Decimal) -> EngineResult<U256> {
        if amount.is_zero() {
            return Ok(U256::zero());
        }
        let decimals = self.builder.registry().token(token)?.decimals;
        numeric::expand_decimals(amount, decimals)
    }

    async fn require_allowance(&self, token: Address, required: U256) -> EngineResult<()> {
        let current = self
            .builder
            .allowance_source()
            .allowance(
                token,
                self.builder.account(),
                self.builder.contracts().exchange_router,
            )
            .await?;
        if current < required {
            let symbol = self
                .builder
                .registry()
                .token(token)
                .map(|t| t.symbol.clone())
                .unwrap_or_else(|_| format!("{token:?}"));
            return Err(EngineError::InsufficientApproval {
                token: symbol,
                required,
                current,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::MulticallCall;
    use crate::orders::builder::tests::{addr, test_builder, MARKET, USDC};
    use ethers::abi::AbiDecode;
    use rust_decimal_macros::dec;

    fn decode_calls(tx: &TransactionRequest) -> Vec<Bytes> {
        let data = tx.data.clone().expect("multicall data");
        MulticallCall::decode(data.as_ref()).expect("multicall").data
    }

    fn deposit_params() -> DepositParams {
        DepositParams {
            market_key: addr(MARKET),
            long_amount: dec!(0.5), // WETH, native
            short_amount: dec!(1000), // USDC
            min_market_tokens: U256::zero(),
            execution_buffer: 2.0,
        }
    }

    #[tokio::test]
    async fn deposit_folds_native_side_and_transfers_erc20_side() {
        let builder = test_builder(U256::MAX);
        let result = LiquidityBuilder::new(&builder)
            .build_deposit(&deposit_params())
            .await
            .unwrap();

        let calls = decode_calls(&result.tx);
        assert_eq!(calls.len(), 3); // sendWnt, sendTokens(USDC), createDeposit

        let fund = SendWntCall::decode(calls[0].as_ref()).unwrap();
        let native = U256::from_dec_str("500000000000000000").unwrap(); // 0.5 WETH
        assert_eq!(fund.amount, result.execution_fee + native);
        assert_eq!(fund.receiver, builder.contracts().deposit_vault);

        let transfer = SendTokensCall::decode(calls[1].as_ref()).unwrap();
        assert_eq!(transfer.amount, U256::from(1_000_000_000u64)); // 1000 USDC
        assert_eq!(transfer.receiver, builder.contracts().deposit_vault);

        let create = CreateDepositCall::decode(calls[2].as_ref()).unwrap();
        assert_eq!(create.params.market, addr(MARKET));
        assert_eq!(create.params.execution_fee, result.execution_fee);
        assert!(create.params.should_unwrap_native_token);

        assert_eq!(result.tx.value, Some(fund.amount));
    }

    #[tokio::test]
    async fn empty_deposit_is_rejected() {
        let builder = test_builder(U256::MAX);
        let mut params = deposit_params();
        params.long_amount = Decimal::ZERO;
        params.short_amount = Decimal::ZERO;

        let err = LiquidityBuilder::new(&builder)
            .build_deposit(&params)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Numeric(_)));
    }

    #[tokio::test]
    async fn deposit_checks_erc20_allowance() {
        let builder = test_builder(U256::from(1u64));
        let err = LiquidityBuilder::new(&builder)
            .build_deposit(&deposit_params())
            .await
            .unwrap_err();

        match err {
            EngineError::InsufficientApproval { token, required, .. } => {
                assert_eq!(token, "USDC");
                assert_eq!(required, U256::from(1_000_000_000u64));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn withdrawal_burns_gm_through_the_withdrawal_vault() {
        let builder = test_builder(U256::MAX);
        let params = WithdrawalParams {
            market_key: addr(MARKET),
            market_token_amount: dec!(10),
            min_long_token_amount: U256::from(1u64),
            min_short_token_amount: U256::from(2u64),
            execution_buffer: 2.0,
        };

        let result = LiquidityBuilder::new(&builder)
            .build_withdrawal(&params)
            .await
            .unwrap();
        let calls = decode_calls(&result.tx);
        assert_eq!(calls.len(), 3);

        let fund = SendWntCall::decode(calls[0].as_ref()).unwrap();
        assert_eq!(fund.receiver, builder.contracts().withdrawal_vault);
        assert_eq!(fund.amount, result.execution_fee);

        let transfer = SendTokensCall::decode(calls[1].as_ref()).unwrap();
        assert_eq!(transfer.token, addr(MARKET));
        assert_eq!(
            transfer.amount,
            U256::from_dec_str("10000000000000000000").unwrap()
        );

        let create = CreateWithdrawalCall::decode(calls[2].as_ref()).unwrap();
        assert_eq!(create.params.min_long_token_amount, U256::from(1u64));
        assert_eq!(create.params.min_short_token_amount, U256::from(2u64));
        assert_eq!(result.tx.value, Some(result.execution_fee));
    }
}
