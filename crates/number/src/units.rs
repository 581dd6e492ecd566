//! Scaling between raw on-chain token amounts and human-denominated
//! decimal amounts.

use {
    super::conversions::{big_decimal_to_u256, u256_to_big_int},
    alloy_primitives::U256,
    anyhow::Result,
    bigdecimal::{BigDecimal, RoundingMode},
};

/// Converts a raw token amount into its decimal-adjusted representation,
/// e.g. 1_500_000_000_000_000_000 wei with 18 decimals becomes 1.5.
pub fn shrink_token(amount: U256, decimals: u8) -> BigDecimal {
    BigDecimal::new(u256_to_big_int(&amount), i64::from(decimals))
}

/// Converts a decimal-adjusted amount back into raw token units, truncating
/// any precision beyond the token's decimals.
pub fn expand_token(amount: &BigDecimal, decimals: u8) -> Result<U256> {
    let scaled = amount * BigDecimal::new(1.into(), -i64::from(decimals));
    big_decimal_to_u256(&scaled.with_scale_round(0, RoundingMode::Down))
}
