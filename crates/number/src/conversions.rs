//! Lossless conversions between EVM word types and arbitrary-precision
//! numbers.

use {
    alloy_primitives::U256,
    anyhow::{Context, Result, ensure},
    bigdecimal::{
        BigDecimal,
        num_bigint::{BigInt, BigUint, Sign, ToBigInt},
    },
};

pub fn u256_to_big_uint(input: &U256) -> BigUint {
    BigUint::from_bytes_be(&input.to_be_bytes::<32>())
}

pub fn u256_to_big_int(input: &U256) -> BigInt {
    BigInt::from_biguint(Sign::Plus, u256_to_big_uint(input))
}

pub fn u256_to_big_decimal(input: &U256) -> BigDecimal {
    BigDecimal::new(u256_to_big_int(input), 0)
}

pub fn big_uint_to_u256(input: &BigUint) -> Result<U256> {
    let bytes = input.to_bytes_be();
    ensure!(bytes.len() <= 32, "too large");
    Ok(U256::from_be_slice(&bytes))
}

pub fn big_int_to_u256(input: &BigInt) -> Result<U256> {
    ensure!(input.sign() != Sign::Minus, "negative");
    big_uint_to_u256(input.magnitude())
}

pub fn big_decimal_to_u256(input: &BigDecimal) -> Result<U256> {
    ensure!(input.is_integer(), "not an integer");
    let scaled = input.with_scale(0);
    let int = scaled
        .to_bigint()
        .context("big decimal is not an integer")?;
    big_int_to_u256(&int)
}
