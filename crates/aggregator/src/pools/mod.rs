//! Pool data model: a tagged union over the two supported converter
//! families and the converter-kind classification rules.

pub mod assembler;
pub mod registry;

use alloy_primitives::{Address, U256};

/// Pools are identified by their anchor token address.
pub type PoolId = Address;

/// Reserve weights are expressed in parts per million.
pub const PPM: u64 = 1_000_000;

#[derive(Clone, Debug, PartialEq)]
pub struct ReserveToken {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnchorToken {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// What family of pool a converter implements, derived from its on-chain
/// type discriminator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConverterKind {
    /// Two-reserve constant-product pool with equal (50/50) weights.
    FixedRatio,
    /// Two-reserve pool with arbitrary weights and per-reserve staking.
    Weighted,
    /// Single-reserve liquid token or an unknown discriminator.
    Unsupported,
}

/// Classifies a converter by its type discriminator. Converters predating
/// the discriminator (the call reverts) are all fixed-ratio.
pub fn classify_converter(discriminator: Option<u64>) -> ConverterKind {
    match discriminator {
        None | Some(1) | Some(32) => ConverterKind::FixedRatio,
        Some(2) => ConverterKind::Weighted,
        _ => ConverterKind::Unsupported,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Pool {
    FixedRatio(FixedRatioPool),
    Weighted(WeightedPool),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FixedRatioPool {
    /// The anchor ("smart token") address, also the pool id.
    pub id: PoolId,
    pub converter: Address,
    pub anchor: AnchorToken,
    pub reserves: [ReserveToken; 2],
    pub reserve_balances: [U256; 2],
    pub fee_ppm: u64,
    pub owner: Address,
    pub version: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WeightedPool {
    pub id: PoolId,
    pub converter: Address,
    pub anchor: AnchorToken,
    pub reserves: [WeightedReserve; 2],
    pub fee_ppm: u64,
    pub owner: Address,
    pub version: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WeightedReserve {
    pub token: ReserveToken,
    /// The per-reserve pool token minted for stakers.
    pub pool_token: Address,
    pub staked_balance: U256,
    pub weight_ppm: u64,
    /// Staking cap, if the converter has one enabled for this reserve.
    pub max_staked_balance: Option<U256>,
}

impl Pool {
    pub fn id(&self) -> PoolId {
        match self {
            Pool::FixedRatio(pool) => pool.id,
            Pool::Weighted(pool) => pool.id,
        }
    }

    pub fn converter(&self) -> Address {
        match self {
            Pool::FixedRatio(pool) => pool.converter,
            Pool::Weighted(pool) => pool.converter,
        }
    }

    pub fn fee_ppm(&self) -> u64 {
        match self {
            Pool::FixedRatio(pool) => pool.fee_ppm,
            Pool::Weighted(pool) => pool.fee_ppm,
        }
    }

    pub fn fee_fraction(&self) -> f64 {
        self.fee_ppm() as f64 / PPM as f64
    }

    pub fn reserve_tokens(&self) -> [&ReserveToken; 2] {
        match self {
            Pool::FixedRatio(pool) => [&pool.reserves[0], &pool.reserves[1]],
            Pool::Weighted(pool) => [&pool.reserves[0].token, &pool.reserves[1].token],
        }
    }

    pub fn contains_token(&self, token: Address) -> bool {
        self.reserve_tokens()
            .iter()
            .any(|reserve| reserve.address == token)
    }

    /// The other reserve of the pair, if `token` is one of them.
    pub fn opposite_reserve(&self, token: Address) -> Option<&ReserveToken> {
        let [first, second] = self.reserve_tokens();
        if first.address == token {
            Some(second)
        } else if second.address == token {
            Some(first)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_all_discriminators() {
        assert_eq!(classify_converter(None), ConverterKind::FixedRatio);
        assert_eq!(classify_converter(Some(1)), ConverterKind::FixedRatio);
        assert_eq!(classify_converter(Some(32)), ConverterKind::FixedRatio);
        assert_eq!(classify_converter(Some(2)), ConverterKind::Weighted);
        assert_eq!(classify_converter(Some(0)), ConverterKind::Unsupported);
        assert_eq!(classify_converter(Some(7)), ConverterKind::Unsupported);
    }

    #[test]
    fn opposite_reserve_lookup() {
        let pool = Pool::FixedRatio(FixedRatioPool {
            id: Address::repeat_byte(0xa0),
            converter: Address::repeat_byte(0xc0),
            anchor: AnchorToken {
                address: Address::repeat_byte(0xa0),
                symbol: "BNTETH".into(),
                decimals: 18,
            },
            reserves: [
                ReserveToken {
                    address: Address::repeat_byte(1),
                    symbol: "BNT".into(),
                    decimals: 18,
                },
                ReserveToken {
                    address: Address::repeat_byte(2),
                    symbol: "ETH".into(),
                    decimals: 18,
                },
            ],
            reserve_balances: [U256::from(10_u64), U256::from(20_u64)],
            fee_ppm: 1000,
            owner: Address::ZERO,
            version: 41,
        });
        assert_eq!(
            pool.opposite_reserve(Address::repeat_byte(1)).unwrap().symbol,
            "ETH",
        );
        assert!(pool.opposite_reserve(Address::repeat_byte(9)).is_none());
        assert!(pool.contains_token(Address::repeat_byte(2)));
    }
}
