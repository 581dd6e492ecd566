pub mod conversions;
pub mod units;

pub use {
    conversions::{big_decimal_to_u256, u256_to_big_decimal, u256_to_big_uint},
    units::{expand_token, shrink_token},
};
