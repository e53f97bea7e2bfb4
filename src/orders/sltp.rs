use ethers::types::U256;
use log::info;

use super::builder::OrderBuilder;
use crate::domain::order::{
    CloseSpec, DecreaseAmounts, Direction, LegKind, OrderKind, OrderParams, OrderType, SltpEntry,
    SltpOrderResult, SltpParams, TriggerSpec,
};
use crate::errors::{EngineError, EngineResult};
use crate::fees::{self, MULTICALL_GAS_OVERHEAD};
use crate::numeric;
use rust_decimal::Decimal;

// ==================================================
// SLTP BUNDLER
// ==================================================
//
// Builds the primary increase order, then resolves each configured
// stop-loss / take-profit leg against the entry price and appends it to
// the same multicall. Within the multicall, every order's fee-funding
// call immediately precedes that order's creation call: funding leg N+1
// before creating leg N misattributes fees on-chain.

pub struct SltpBundler<'a> {
    builder: &'a OrderBuilder,
    /// Extra multiplier on each leg's fee buffer. Multicall batching
    /// burns more gas per order than standalone submission.
    sltp_fee_multiplier: f64,
}

impl<'a> SltpBundler<'a> {
    pub fn new(builder: &'a OrderBuilder, sltp_fee_multiplier: f64) -> Self {
        Self {
            builder,
            sltp_fee_multiplier,
        }
    }

    pub async fn bundle(
        &self,
        open: &OrderParams,
        sltp: &SltpParams,
    ) -> EngineResult<SltpOrderResult> {
        // Primary first: its mark price is the entry every trigger
        // resolves against.
        let primary = self
            .builder
            .build_checked_leg(open, OrderKind::Increase)
            .await?;
        let entry_price = primary.mark_price;
        let size_delta_usd = numeric::to_usd_30(open.size_delta_usd)?;
        let collateral_amount = {
            let decimals = self
                .builder
                .registry()
                .token(open.collateral_token)?
                .decimals;
            numeric::expand_decimals(open.collateral_delta, decimals)?
        };
        let price_decimals = numeric::price_decimals(
            self.builder.registry().token(open.index_token)?.decimals,
        );

        let mut calls = primary.calls.clone();
        let mut total_value = primary.value;
        let mut leg_fees = vec![(LegKind::Primary, primary.execution_fee)];
        let mut stop_loss_trigger = None;
        let mut take_profit_trigger = None;
        let mut leg_count = 1u64;

        let decrease_base_fee = fees::estimate_execution_fee(
            self.builder.gas_limits(),
            self.builder.gas_limits().decrease_order,
            3,
            self.builder.gas_price(),
        );
        let leg_buffer = open.execution_buffer * self.sltp_fee_multiplier;

        for (leg_kind, entry) in [
            (LegKind::StopLoss, sltp.stop_loss.as_ref()),
            (LegKind::TakeProfit, sltp.take_profit.as_ref()),
        ] {
            let Some(entry) = entry else { continue };

            let amounts = resolve_decrease(
                entry,
                leg_kind,
                open.direction,
                entry_price,
                price_decimals,
                size_delta_usd,
                collateral_amount,
                open.slippage_percent,
            )?;
            let fee = fees::buffered_fee(decrease_base_fee, leg_buffer);

            let leg =
                self.builder
                    .build_trigger_decrease_leg(open, &amounts, fee, entry.auto_cancel)?;
            calls.extend(leg.calls);
            total_value += leg.value;
            leg_fees.push((leg_kind, fee));
            leg_count += 1;

            match leg_kind {
                LegKind::StopLoss => stop_loss_trigger = Some(amounts.trigger_price),
                LegKind::TakeProfit => take_profit_trigger = Some(amounts.trigger_price),
                LegKind::Primary => unreachable!(),
            }
        }

        let gas_limit = self.builder.gas_limits().increase_order
            + self.builder.gas_limits().decrease_order * U256::from(leg_count - 1)
            + U256::from(MULTICALL_GAS_OVERHEAD);

        let total_execution_fee = leg_fees.iter().map(|(_, fee)| *fee).fold(U256::zero(), |a, b| a + b);

        info!(
            "📦 SLTP bundle: {} legs, total fee {} wei",
            leg_count, total_execution_fee
        );

        Ok(SltpOrderResult {
            tx: self.builder.multicall_tx(calls, total_value, gas_limit),
            total_execution_fee,
            entry_price,
            stop_loss_trigger,
            take_profit_trigger,
            leg_fees,
            gas_limit,
        })
    }
}

/// Resolve one SLTP leg into encodable decrease amounts.
///
/// Trigger sign table (percent-from-entry): a stop-loss triggers against
/// the position, a take-profit in its favor. Stop-loss acceptable price
/// deliberately waives slippage protection (0 for long, max-uint for
/// short) so execution wins over price; take-profit keeps protection.
#[allow(clippy::too_many_arguments)]
pub fn resolve_decrease(
    entry: &SltpEntry,
    leg_kind: LegKind,
    direction: Direction,
    entry_price: U256,
    price_decimals: u32,
    position_size_usd: U256,
    position_collateral: U256,
    slippage_percent: Decimal,
) -> EngineResult<DecreaseAmounts> {
    let is_long = direction.is_long();

    let trigger_price = match entry.trigger {
        // Entry price is already in wire form; scale the absolute
        // trigger by the same exponent.
        TriggerSpec::Price(price) => numeric::expand_decimals(price, price_decimals)?,
        TriggerSpec::PercentFromEntry(percent) => {
            let up = match (leg_kind, is_long) {
                (LegKind::StopLoss, true) => false,
                (LegKind::StopLoss, false) => true,
                (LegKind::TakeProfit, true) => true,
                (LegKind::TakeProfit, false) => false,
                (LegKind::Primary, _) => {
                    return Err(EngineError::Numeric(
                        "primary leg has no trigger".to_string(),
                    ))
                }
            };
            numeric::apply_slippage(entry_price, percent, up)?
        }
    };

    let (size_delta_usd, is_full_close) = match entry.close {
        CloseSpec::PercentOfPosition(percent) => {
            let size = numeric::apply_percent(position_size_usd, percent)?;
            (size.min(position_size_usd), percent >= Decimal::from(100))
        }
        CloseSpec::Usd(usd) => {
            let size = numeric::to_usd_30(usd)?;
            (size.min(position_size_usd), size >= position_size_usd)
        }
    };

    // Withdraw collateral in proportion to the size being closed.
    let collateral_delta = if is_full_close {
        position_collateral
    } else {
        numeric::mul_ratio(position_collateral, size_delta_usd, position_size_usd)
    };

    let (order_type, acceptable_price) = match leg_kind {
        LegKind::StopLoss => {
            let acceptable = if is_long { U256::zero() } else { U256::MAX };
            (OrderType::StopLossDecrease, acceptable)
        }
        LegKind::TakeProfit => {
            // Closing long sells (protect the floor); closing short buys
            // back (protect the ceiling).
            let acceptable = numeric::apply_slippage(trigger_price, slippage_percent, !is_long)?;
            (OrderType::LimitDecrease, acceptable)
        }
        LegKind::Primary => {
            return Err(EngineError::Numeric(
                "primary leg is not a decrease".to_string(),
            ))
        }
    };

    Ok(DecreaseAmounts {
        size_delta_usd,
        collateral_delta,
        trigger_price,
        acceptable_price,
        order_type,
        is_full_close,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{CreateOrderCall, MulticallCall, SendWntCall};
    use crate::orders::builder::tests::{long_open_params, test_builder, WETH};
    use ethers::abi::AbiDecode;
    use rust_decimal_macros::dec;

    fn entry_2000() -> U256 {
        U256::from_dec_str("2000000000000000").unwrap() // $2000, 12 price decimals
    }

    fn sl(trigger: TriggerSpec) -> SltpEntry {
        SltpEntry {
            trigger,
            close: CloseSpec::PercentOfPosition(dec!(100)),
            auto_cancel: true,
        }
    }

    #[test]
    fn stop_loss_waives_price_protection() {
        for (direction, want) in [
            (Direction::Long, U256::zero()),
            (Direction::Short, U256::MAX),
        ] {
            let amounts = resolve_decrease(
                &sl(TriggerSpec::PercentFromEntry(dec!(5))),
                LegKind::StopLoss,
                direction,
                entry_2000(),
                12,
                U256::from(100u64),
                U256::from(50u64),
                dec!(5), // slippage must not matter
            )
            .unwrap();
            assert_eq!(amounts.acceptable_price, want);
            assert_eq!(amounts.order_type, OrderType::StopLossDecrease);
        }
    }

    #[test]
    fn trigger_sign_table() {
        let size = U256::from(100u64);
        let coll = U256::from(50u64);
        let cases = [
            (LegKind::StopLoss, Direction::Long, "1900000000000000"),
            (LegKind::StopLoss, Direction::Short, "2100000000000000"),
            (LegKind::TakeProfit, Direction::Long, "2100000000000000"),
            (LegKind::TakeProfit, Direction::Short, "1900000000000000"),
        ];
        for (leg, direction, want) in cases {
            let amounts = resolve_decrease(
                &sl(TriggerSpec::PercentFromEntry(dec!(5))),
                leg,
                direction,
                entry_2000(),
                12,
                size,
                coll,
                dec!(0.3),
            )
            .unwrap();
            assert_eq!(
                amounts.trigger_price,
                U256::from_dec_str(want).unwrap(),
                "{leg:?} {direction:?}"
            );
        }
    }

    #[test]
    fn absolute_trigger_matches_entry_exponent() {
        let amounts = resolve_decrease(
            &sl(TriggerSpec::Price(dec!(1850))),
            LegKind::StopLoss,
            Direction::Long,
            entry_2000(),
            12,
            U256::from(100u64),
            U256::from(50u64),
            dec!(0.3),
        )
        .unwrap();
        assert_eq!(
            amounts.trigger_price,
            U256::from_dec_str("1850000000000000").unwrap()
        );
    }

    #[test]
    fn partial_close_scales_collateral() {
        let entry = SltpEntry {
            trigger: TriggerSpec::PercentFromEntry(dec!(10)),
            close: CloseSpec::PercentOfPosition(dec!(40)),
            auto_cancel: false,
        };
        let amounts = resolve_decrease(
            &entry,
            LegKind::TakeProfit,
            Direction::Long,
            entry_2000(),
            12,
            numeric::to_usd_30(dec!(100)).unwrap(),
            U256::from(50_000_000u64),
            dec!(0.3),
        )
        .unwrap();
        assert!(!amounts.is_full_close);
        assert_eq!(
            amounts.size_delta_usd,
            numeric::to_usd_30(dec!(40)).unwrap()
        );
        assert_eq!(amounts.collateral_delta, U256::from(20_000_000u64));
    }

    #[test]
    fn usd_close_caps_at_position_size() {
        let entry = SltpEntry {
            trigger: TriggerSpec::PercentFromEntry(dec!(10)),
            close: CloseSpec::Usd(dec!(150)),
            auto_cancel: false,
        };
        let amounts = resolve_decrease(
            &entry,
            LegKind::TakeProfit,
            Direction::Long,
            entry_2000(),
            12,
            numeric::to_usd_30(dec!(100)).unwrap(),
            U256::from(50_000_000u64),
            dec!(0.3),
        )
        .unwrap();
        assert!(amounts.is_full_close);
        assert_eq!(
            amounts.size_delta_usd,
            numeric::to_usd_30(dec!(100)).unwrap()
        );
    }

    #[tokio::test]
    async fn bundle_orders_legs_fee_then_create_primary_sl_tp() {
        let builder = test_builder(U256::MAX);
        let bundler = SltpBundler::new(&builder, 3.0);

        // Native collateral keeps the primary leg at exactly two calls.
        let mut open = long_open_params(WETH);
        open.collateral_delta = dec!(0.025);

        let sltp = SltpParams {
            stop_loss: Some(SltpEntry {
                trigger: TriggerSpec::PercentFromEntry(dec!(5)),
                close: CloseSpec::PercentOfPosition(dec!(100)),
                auto_cancel: true,
            }),
            take_profit: Some(SltpEntry {
                trigger: TriggerSpec::PercentFromEntry(dec!(10)),
                close: CloseSpec::PercentOfPosition(dec!(50)),
                auto_cancel: true,
            }),
        };

        let result = bundler.bundle(&open, &sltp).await.unwrap();
        let data = result.tx.data.clone().unwrap();
        let calls = MulticallCall::decode(data.as_ref()).unwrap().data;

        // primary [fund, create], stop-loss [fund, create], take-profit
        // [fund, create]: six calls, fee funding immediately before each
        // creation.
        assert_eq!(calls.len(), 6);
        let order_types: Vec<u8> = calls
            .chunks(2)
            .map(|pair| {
                SendWntCall::decode(pair[0].as_ref()).expect("fee funding first");
                CreateOrderCall::decode(pair[1].as_ref())
                    .expect("creation second")
                    .params
                    .order_type
            })
            .collect();
        assert_eq!(
            order_types,
            vec![
                OrderType::MarketIncrease.as_u8(),
                OrderType::StopLossDecrease.as_u8(),
                OrderType::LimitDecrease.as_u8(),
            ]
        );
    }

    #[tokio::test]
    async fn bundle_value_sums_fees_and_native_collateral() {
        let builder = test_builder(U256::MAX);
        let bundler = SltpBundler::new(&builder, 3.0);
        let mut open = long_open_params(WETH);
        open.collateral_delta = dec!(0.025);

        let sltp = SltpParams {
            stop_loss: Some(sl(TriggerSpec::PercentFromEntry(dec!(5)))),
            take_profit: None,
        };

        let result = bundler.bundle(&open, &sltp).await.unwrap();
        let collateral = U256::from_dec_str("25000000000000000").unwrap();
        assert_eq!(
            result.tx.value,
            Some(result.total_execution_fee + collateral)
        );
        assert_eq!(result.leg_fees.len(), 2);
        assert_eq!(result.leg_fees[0].0, LegKind::Primary);
        assert_eq!(result.leg_fees[1].0, LegKind::StopLoss);
        assert_eq!(result.stop_loss_trigger, Some(entry_2000() * U256::from(95u64) / U256::from(100u64)));
        assert!(result.take_profit_trigger.is_none());
    }

    #[tokio::test]
    async fn sltp_leg_fee_carries_extra_multiplier() {
        let builder = test_builder(U256::MAX);
        let bundler = SltpBundler::new(&builder, 3.0);
        let mut open = long_open_params(WETH);
        open.collateral_delta = dec!(0.025);

        let sltp = SltpParams {
            stop_loss: Some(sl(TriggerSpec::PercentFromEntry(dec!(5)))),
            take_profit: None,
        };
        let result = bundler.bundle(&open, &sltp).await.unwrap();

        let base = fees::estimate_execution_fee(
            builder.gas_limits(),
            builder.gas_limits().decrease_order,
            3,
            builder.gas_price(),
        );
        // buffer 2.0 * multiplier 3.0 = 6.0x the base decrease fee.
        assert_eq!(result.leg_fees[1].1, fees::buffered_fee(base, 6.0));
    }
}
