use ethers::types::U256;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::errors::{EngineError, EngineResult};

// ==================================================
// FIXED-POINT CONVERSIONS
// ==================================================
//
// Every size/price that crosses into an encoded argument is an integer:
// USD notionals are scaled by 10^30, token amounts by the token's own
// decimals, oracle prices by (30 - token decimals). Conversions go through
// rust_decimal so inputs like 100.1 never pick up binary-float drift.

/// Decimal exponent for USD-denominated protocol values.
pub const USD_DECIMALS: u32 = 30;

/// Scale a decimal value to an integer with `decimals` decimal places.
/// Exact for inputs whose scale fits; rounds half-up otherwise.
pub fn expand_decimals(value: Decimal, decimals: u32) -> EngineResult<U256> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(EngineError::Numeric(format!(
            "cannot encode negative amount {value}"
        )));
    }

    let mantissa = value.mantissa().unsigned_abs();
    let scale = value.scale();
    let mantissa = U256::from_little_endian(&mantissa.to_le_bytes());

    if scale <= decimals {
        mantissa
            .checked_mul(U256::exp10((decimals - scale) as usize))
            .ok_or_else(|| EngineError::Numeric(format!("{value} overflows U256 at 10^{decimals}")))
    } else {
        // More fractional digits than the target scale: round half-up.
        let divisor = U256::exp10((scale - decimals) as usize);
        let quotient = mantissa / divisor;
        let remainder = mantissa % divisor;
        if remainder * U256::from(2u8) >= divisor {
            Ok(quotient + U256::one())
        } else {
            Ok(quotient)
        }
    }
}

/// USD notional to the protocol's 30-decimal convention.
pub fn to_usd_30(value: Decimal) -> EngineResult<U256> {
    expand_decimals(value, USD_DECIMALS)
}

/// Integer fixed-point back to a decimal, truncating digits that do not fit
/// rust_decimal's 28-digit mantissa. Display/reporting only — never fed back
/// into an encoded argument.
pub fn from_fixed(value: U256, decimals: u32) -> EngineResult<Decimal> {
    let raw = value.to_string();
    let decimals = decimals as usize;

    let (int_part, frac_part) = if raw.len() > decimals {
        let split = raw.len() - decimals;
        (raw[..split].to_string(), raw[split..].to_string())
    } else {
        ("0".to_string(), format!("{raw:0>decimals$}"))
    };

    if int_part.len() > 28 {
        return Err(EngineError::Numeric(format!(
            "value {value} too large for decimal display"
        )));
    }

    let keep = 28 - int_part.len();
    let frac = if frac_part.len() > keep {
        &frac_part[..keep]
    } else {
        &frac_part[..]
    };

    let text = if frac.is_empty() {
        int_part
    } else {
        format!("{int_part}.{frac}")
    };

    Decimal::from_str(&text).map_err(|e| EngineError::Numeric(e.to_string()))
}

/// Oracle/execution prices carry (30 - token decimals) decimal places so
/// that price * token amount lands on 30.
pub fn price_to_decimal(price: U256, token_decimals: u32) -> EngineResult<Decimal> {
    from_fixed(price, USD_DECIMALS - token_decimals)
}

/// Price decimal places for a token under the 30-decimal product rule.
pub fn price_decimals(token_decimals: u32) -> u32 {
    USD_DECIMALS - token_decimals
}

/// Median of an oracle min/max quote pair.
pub fn median_price(min: U256, max: U256) -> U256 {
    (min + max) / U256::from(2u8)
}

/// `value * percent / 100` as an exact rational, truncating.
pub fn apply_percent(value: U256, percent: Decimal) -> EngineResult<U256> {
    if percent.is_sign_negative() {
        return Err(EngineError::Numeric(format!("negative percent {percent}")));
    }
    let mantissa = percent.mantissa().unsigned_abs();
    let numerator = U256::from_little_endian(&mantissa.to_le_bytes());
    let denominator = U256::exp10(percent.scale() as usize) * U256::from(100u8);
    value
        .checked_mul(numerator)
        .map(|v| v / denominator)
        .ok_or_else(|| EngineError::Numeric("percent multiply overflow".to_string()))
}

/// `value * numerator / denominator`, truncating. Zero denominator is a
/// caller bug and yields zero rather than a panic in release paths.
pub fn mul_ratio(value: U256, numerator: U256, denominator: U256) -> U256 {
    if denominator.is_zero() {
        debug_assert!(false, "mul_ratio with zero denominator");
        return U256::zero();
    }
    value.saturating_mul(numerator) / denominator
}

/// Move `price` by `slippage_percent` percent. `widen: true` pushes the
/// price up, `false` pushes it down (floored at zero). Integer arithmetic
/// throughout: the percent is applied as an exact rational.
pub fn apply_slippage(price: U256, slippage_percent: Decimal, widen: bool) -> EngineResult<U256> {
    if slippage_percent.is_sign_negative() {
        return Err(EngineError::Numeric(format!(
            "negative slippage {slippage_percent}"
        )));
    }

    let mantissa = slippage_percent.mantissa().unsigned_abs();
    let numerator = U256::from_little_endian(&mantissa.to_le_bytes());
    let denominator = U256::exp10(slippage_percent.scale() as usize) * U256::from(100u8);

    let delta = price
        .checked_mul(numerator)
        .ok_or_else(|| EngineError::Numeric("slippage delta overflow".to_string()))?
        / denominator;

    if widen {
        price
            .checked_add(delta)
            .ok_or_else(|| EngineError::Numeric("slippage add overflow".to_string()))
    } else {
        Ok(price.saturating_sub(delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn usd_expansion_is_exact_for_100_point_1() {
        let got = to_usd_30(dec!(100.1)).unwrap();
        let want = U256::from_dec_str("100100000000000000000000000000000").unwrap();
        assert_eq!(got, want);
    }

    #[test]
    fn expansion_rounds_half_up_when_scale_exceeds_target() {
        assert_eq!(
            expand_decimals(dec!(1.23456), 4).unwrap(),
            U256::from(12346u64)
        );
        assert_eq!(
            expand_decimals(dec!(1.23454), 4).unwrap(),
            U256::from(12345u64)
        );
    }

    #[test]
    fn negative_amounts_rejected() {
        assert!(expand_decimals(dec!(-1), 6).is_err());
    }

    #[test]
    fn from_fixed_round_trips_token_amounts() {
        let raw = expand_decimals(dec!(1234.567891), 6).unwrap();
        assert_eq!(from_fixed(raw, 6).unwrap(), dec!(1234.567891));
    }

    #[test]
    fn from_fixed_handles_sub_unit_values() {
        assert_eq!(from_fixed(U256::from(1500u64), 6).unwrap(), dec!(0.0015));
    }

    #[test]
    fn price_conversion_uses_complement_decimals() {
        // $2000 for an 18-decimal token: 2000 * 10^12 in wire form.
        let wire = U256::from_dec_str("2000000000000000").unwrap();
        assert_eq!(price_to_decimal(wire, 18).unwrap(), dec!(2000));
    }

    #[test]
    fn median_is_midpoint() {
        assert_eq!(
            median_price(U256::from(100u64), U256::from(200u64)),
            U256::from(150u64)
        );
    }

    #[test]
    fn slippage_widens_and_narrows() {
        let price = U256::from(2_000_000u64);
        let up = apply_slippage(price, dec!(0.3), true).unwrap();
        let down = apply_slippage(price, dec!(0.3), false).unwrap();
        assert_eq!(up, U256::from(2_006_000u64));
        assert_eq!(down, U256::from(1_994_000u64));
    }

    #[test]
    fn percent_of_value_is_exact() {
        let half = apply_percent(U256::from(1_000_000u64), dec!(50)).unwrap();
        assert_eq!(half, U256::from(500_000u64));
        let third = apply_percent(U256::from(100u64), dec!(33.3)).unwrap();
        assert_eq!(third, U256::from(33u64));
    }

    #[test]
    fn ratio_truncates() {
        assert_eq!(
            mul_ratio(U256::from(10u64), U256::from(1u64), U256::from(3u64)),
            U256::from(3u64)
        );
    }

    #[test]
    fn slippage_floors_at_zero() {
        let down = apply_slippage(U256::from(10u64), dec!(200), false).unwrap();
        assert_eq!(down, U256::zero());
    }
}
