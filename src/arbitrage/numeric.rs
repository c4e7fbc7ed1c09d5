//! Precision boundary between on-chain integer reserves and the floating
//! point math of the detector and solver.
//!
//! Integers stay integers until they are normalized here. The precise path
//! keeps four fractional digits (`value * 10_000 / 10^decimals`); when that
//! leaves the exactly representable `f64` integer range the coarse path
//! (`value / 10^decimals`) is tried before giving up.

use ethers::types::U256;

use crate::error::ArbitrageError;

/// Largest integer an `f64` represents exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

pub const PRECISION_SCALE: u64 = 10_000;

pub fn to_safe_f64(value: U256) -> Result<f64, ArbitrageError> {
    if value > U256::from(MAX_SAFE_INTEGER) {
        return Err(ArbitrageError::NumericOverflowUnderflow(format!(
            "{} exceeds the safe integer range",
            value
        )));
    }
    Ok(value.as_u64() as f64)
}

fn decimals_divisor(decimals: u8) -> Result<U256, ArbitrageError> {
    // 10^77 is the largest power of ten below 2^256
    if decimals > 77 {
        return Err(ArbitrageError::NumericOverflowUnderflow(format!(
            "unsupported decimals {}",
            decimals
        )));
    }
    Ok(U256::exp10(decimals as usize))
}

/// Scaled integer reserve, `value * 10_000 / 10^decimals`, still as an integer.
pub fn scale_reserve(value: U256, decimals: u8) -> Result<U256, ArbitrageError> {
    let scaled = value
        .checked_mul(U256::from(PRECISION_SCALE))
        .ok_or_else(|| {
            ArbitrageError::NumericOverflowUnderflow(format!("{} * {} overflows", value, PRECISION_SCALE))
        })?;
    Ok(scaled / decimals_divisor(decimals)?)
}

pub fn to_decimal(value: U256, decimals: u8) -> Result<f64, ArbitrageError> {
    let scaled = scale_reserve(value, decimals)?;
    Ok(to_safe_f64(scaled)? / PRECISION_SCALE as f64)
}

/// Drops the fractional part entirely; only used once `to_decimal` failed.
pub fn to_decimal_coarse(value: U256, decimals: u8) -> Result<f64, ArbitrageError> {
    to_safe_f64(value / decimals_divisor(decimals)?)
}

pub fn normalize(value: U256, decimals: u8) -> Result<f64, ArbitrageError> {
    match to_decimal(value, decimals) {
        Ok(normalized) => Ok(normalized),
        Err(ArbitrageError::NumericOverflowUnderflow(_)) => to_decimal_coarse(value, decimals),
        Err(e) => Err(e),
    }
}

/// Reference-asset reserve over token reserve, both scaled to four decimals
/// and divided as integers.
///
/// When the integer quotient is zero the division is inverted
/// (`token / reference`) and the reciprocal is returned, so the larger of
/// the two scaled reserves is always the one that gets truncated.
pub fn reference_ratio(
    reference_reserve: U256,
    reference_decimals: u8,
    token_reserve: U256,
    token_decimals: u8,
) -> Result<f64, ArbitrageError> {
    let reference = scale_reserve(reference_reserve, reference_decimals)?;
    let token = scale_reserve(token_reserve, token_decimals)?;

    if token.is_zero() || reference.is_zero() {
        return Err(ArbitrageError::NumericOverflowUnderflow(
            "scaled reserve truncates to zero".to_string(),
        ));
    }

    let ratio = reference / token;
    if ratio.is_zero() {
        let inverted = to_safe_f64(token / reference)?;
        Ok(1.0 / inverted)
    } else {
        to_safe_f64(ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ether(amount: u64) -> U256 {
        U256::from(amount) * U256::exp10(18)
    }

    #[test]
    fn test_to_decimal_keeps_four_digits() {
        let value = U256::from(1_234_567_890_000_000_000u64);
        assert_eq!(to_decimal(value, 18).unwrap(), 1.2345);
        assert_eq!(to_decimal(U256::from(2_500_000u64), 6).unwrap(), 2.5);
    }

    #[test]
    fn test_normalize_falls_back_to_coarse_conversion() {
        // 10^13 ether scaled by 10_000 leaves the safe range, unscaled it does not
        let value = ether(10_000_000_000_000);
        assert!(matches!(
            to_decimal(value, 18),
            Err(ArbitrageError::NumericOverflowUnderflow(_))
        ));
        assert_eq!(normalize(value, 18).unwrap(), 10_000_000_000_000.0);
    }

    #[test]
    fn test_normalize_fails_when_both_conversions_overflow() {
        let value = U256::MAX;
        assert!(normalize(value, 0).is_err());
        assert!(normalize(value, 18).is_err());
    }

    #[test]
    fn test_reference_ratio_direct_division() {
        // 5000 reference per 100 token
        let ratio = reference_ratio(ether(5000), 18, ether(100), 18).unwrap();
        assert_eq!(ratio, 50.0);
    }

    #[test]
    fn test_reference_ratio_inverts_when_quotient_is_zero() {
        let ratio = reference_ratio(ether(100), 18, ether(10_000), 18).unwrap();
        assert_eq!(ratio, 0.01);

        // 10_500 / 90 = 116.67 truncates to 116 before the reciprocal
        let ratio = reference_ratio(ether(90), 18, ether(10_500), 18).unwrap();
        assert_eq!(ratio, 1.0 / 116.0);
    }

    #[test]
    fn test_reference_ratio_respects_token_decimals() {
        // 1 reference against 2000 units of a 6-decimal token
        let ratio = reference_ratio(ether(1), 18, U256::from(2_000_000_000u64), 6).unwrap();
        assert_eq!(ratio, 1.0 / 2000.0);
    }

    #[test]
    fn test_reference_ratio_rejects_empty_reserves() {
        assert!(reference_ratio(U256::zero(), 18, ether(1), 18).is_err());
        assert!(reference_ratio(ether(1), 18, U256::zero(), 18).is_err());
    }
}
