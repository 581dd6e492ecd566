//! Deposit, withdraw and swap quoting over registry state. All functions are
//! pure; amounts cross the API in decimal-adjusted units, math happens on
//! raw wei.

use {
    crate::pools::{FixedRatioPool, PPM, PoolId, WeightedPool, WeightedReserve},
    alloy_primitives::{Address, U256},
    bigdecimal::{BigDecimal, FromPrimitive, RoundingMode, ToPrimitive},
    number::{
        big_decimal_to_u256,
        conversions::u256_to_big_decimal,
        expand_token,
        shrink_token,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    #[error("cannot convert a token to itself")]
    SelfConversion,
    #[error("unknown pool {0}")]
    UnknownPool(PoolId),
    #[error("token {token} is not a reserve of pool {pool}")]
    UnknownReserve { pool: PoolId, token: Address },
    #[error("no conversion path from {from} to {to}")]
    NoPath { from: Address, to: Address },
    #[error("pool is capped and can receive {remaining} additional tokens")]
    StakingCapExceeded { remaining: BigDecimal },
    #[error("pool has reached its maximum liquidity cap")]
    StakingCapReached,
    #[error("slippaged rate exceeds the clean rate")]
    RateInversion,
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DepositQuote {
    /// Amount of the other reserve required alongside the deposit. `None`
    /// for weighted pools, whose deposits are single sided.
    pub opposing_amount: Option<BigDecimal>,
    /// Pool tokens minted for the deposit, after the reward haircut.
    pub minted_pool_tokens: Option<BigDecimal>,
    pub share_of_pool: f64,
    pub single_unit_costs: Vec<(Address, BigDecimal)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WithdrawQuote {
    pub opposing_amount: Option<BigDecimal>,
    /// Pool tokens that must be burned to withdraw the requested amount.
    pub pool_token_cost: Option<BigDecimal>,
    pub share_of_pool: f64,
    pub single_unit_costs: Vec<(Address, BigDecimal)>,
    /// The quoted return with the configured slippage buffer applied.
    pub min_return: BigDecimal,
}

fn scale_down(wei: &BigDecimal, decimals: u8) -> BigDecimal {
    wei * BigDecimal::new(1.into(), i64::from(decimals))
}

fn reserve_index(pool_id: PoolId, reserves: [Address; 2], token: Address) -> Result<usize, QuoteError> {
    reserves
        .iter()
        .position(|reserve| *reserve == token)
        .ok_or(QuoteError::UnknownReserve {
            pool: pool_id,
            token,
        })
}

fn expand(amount: &BigDecimal, decimals: u8) -> Result<BigDecimal, QuoteError> {
    let wei = expand_token(amount, decimals)
        .map_err(|err| QuoteError::Arithmetic(err.to_string()))?;
    Ok(u256_to_big_decimal(&wei))
}

fn nonzero(value: &BigDecimal, what: &str) -> Result<(), QuoteError> {
    if *value == BigDecimal::from(0) {
        return Err(QuoteError::Arithmetic(format!("{what} is zero")));
    }
    Ok(())
}

/// Quotes a two-sided deposit into a fixed-ratio pool: the matching amount
/// of the opposing reserve, the minted pool tokens after `haircut` and the
/// resulting share of supply.
pub fn fixed_ratio_deposit(
    pool: &FixedRatioPool,
    pool_token_supply: U256,
    token: Address,
    amount: &BigDecimal,
    haircut: &BigDecimal,
) -> Result<DepositQuote, QuoteError> {
    let same = reserve_index(
        pool.id,
        [pool.reserves[0].address, pool.reserves[1].address],
        token,
    )?;
    let other = 1 - same;

    let same_balance = u256_to_big_decimal(&pool.reserve_balances[same]);
    let other_balance = u256_to_big_decimal(&pool.reserve_balances[other]);
    let supply = u256_to_big_decimal(&pool_token_supply);
    nonzero(&same_balance, "reserve balance")?;
    nonzero(&other_balance, "opposing reserve balance")?;
    nonzero(&supply, "pool token supply")?;

    let amount_wei = expand(amount, pool.reserves[same].decimals)?;
    let opposing_wei = &amount_wei / &same_balance * &other_balance;
    let minted_wei = (&amount_wei / &same_balance * &supply * haircut)
        .with_scale_round(0, RoundingMode::Up);
    let share = (&minted_wei / &supply).to_f64().unwrap_or_default();

    Ok(DepositQuote {
        opposing_amount: Some(scale_down(
            &opposing_wei,
            pool.reserves[other].decimals,
        )),
        minted_pool_tokens: Some(scale_down(&minted_wei, pool.anchor.decimals)),
        share_of_pool: share,
        single_unit_costs: vec![
            (pool.reserves[same].address, &other_balance / &same_balance),
            (pool.reserves[other].address, &same_balance / &other_balance),
        ],
    })
}

/// Quotes a withdrawal from a fixed-ratio pool: the opposing amount paid out
/// with it and the pool token cost of the liquidation.
pub fn fixed_ratio_withdraw(
    pool: &FixedRatioPool,
    pool_token_supply: U256,
    token: Address,
    amount: &BigDecimal,
    buffer: &BigDecimal,
) -> Result<WithdrawQuote, QuoteError> {
    let same = reserve_index(
        pool.id,
        [pool.reserves[0].address, pool.reserves[1].address],
        token,
    )?;
    let other = 1 - same;

    let same_balance = u256_to_big_decimal(&pool.reserve_balances[same]);
    let other_balance = u256_to_big_decimal(&pool.reserve_balances[other]);
    let supply = u256_to_big_decimal(&pool_token_supply);
    nonzero(&same_balance, "reserve balance")?;
    nonzero(&other_balance, "opposing reserve balance")?;
    nonzero(&supply, "pool token supply")?;

    let amount_wei = expand(amount, pool.reserves[same].decimals)?;
    let opposing_wei = &amount_wei / &same_balance * &other_balance;
    let cost_wei = &amount_wei / &same_balance * &supply;
    let opposing = scale_down(&opposing_wei, pool.reserves[other].decimals);

    Ok(WithdrawQuote {
        min_return: &opposing * buffer,
        opposing_amount: Some(opposing),
        pool_token_cost: Some(scale_down(&cost_wei, pool.anchor.decimals)),
        share_of_pool: (&amount_wei / &same_balance).to_f64().unwrap_or_default(),
        single_unit_costs: vec![
            (pool.reserves[same].address, &other_balance / &same_balance),
            (pool.reserves[other].address, &same_balance / &other_balance),
        ],
    })
}

fn weighted_unit_costs(pool: &WeightedPool) -> Result<Vec<(Address, BigDecimal)>, QuoteError> {
    if pool.reserves[0].weight_ppm + pool.reserves[1].weight_ppm != PPM {
        return Err(QuoteError::Arithmetic(
            "was expecting reserve weights to equal 100%".into(),
        ));
    }
    let (bigger, smaller) = if pool.reserves[0].weight_ppm >= pool.reserves[1].weight_ppm {
        (&pool.reserves[0], &pool.reserves[1])
    } else {
        (&pool.reserves[1], &pool.reserves[0])
    };

    // How lopsided the pool is; unit costs are staked balances adjusted by
    // the distance of the bigger weight from 50%.
    let distance = BigDecimal::from(bigger.weight_ppm) / BigDecimal::from(PPM)
        - BigDecimal::new(5.into(), 1);
    let one = BigDecimal::from(1);
    let bigger_cost = u256_to_big_decimal(&bigger.staked_balance) / (&one - &distance);
    let smaller_cost = u256_to_big_decimal(&smaller.staked_balance) / (&one + &distance);

    Ok(vec![
        (
            bigger.token.address,
            scale_down(&bigger_cost, bigger.token.decimals),
        ),
        (
            smaller.token.address,
            scale_down(&smaller_cost, smaller.token.decimals),
        ),
    ])
}

fn weighted_reserve<'a>(
    pool: &'a WeightedPool,
    token: Address,
) -> Result<&'a WeightedReserve, QuoteError> {
    pool.reserves
        .iter()
        .find(|reserve| reserve.token.address == token)
        .ok_or(QuoteError::UnknownReserve {
            pool: pool.id,
            token,
        })
}

/// Quotes a single-sided deposit into a weighted pool, enforcing the
/// reserve's staking cap.
pub fn weighted_deposit(
    pool: &WeightedPool,
    token: Address,
    amount: &BigDecimal,
) -> Result<DepositQuote, QuoteError> {
    let single_unit_costs = weighted_unit_costs(pool)?;
    let reserve = weighted_reserve(pool, token)?;

    let staked = shrink_token(reserve.staked_balance, reserve.token.decimals);
    nonzero(&staked, "staked balance")?;
    let share = (amount / &staked).to_f64().unwrap_or_default();

    if let Some(max) = reserve.max_staked_balance {
        let amount_wei = expand_token(amount, reserve.token.decimals)
            .map_err(|err| QuoteError::Arithmetic(err.to_string()))?;
        let proposed = amount_wei.saturating_add(reserve.staked_balance);
        if proposed > max {
            let remaining = max.saturating_sub(reserve.staked_balance);
            if remaining.is_zero() {
                return Err(QuoteError::StakingCapReached);
            }
            return Err(QuoteError::StakingCapExceeded {
                remaining: shrink_token(remaining, reserve.token.decimals),
            });
        }
    }

    Ok(DepositQuote {
        opposing_amount: None,
        minted_pool_tokens: None,
        share_of_pool: share,
        single_unit_costs,
    })
}

/// Quotes a single-sided withdrawal from a weighted pool.
pub fn weighted_withdraw(
    pool: &WeightedPool,
    token: Address,
    amount: &BigDecimal,
    buffer: &BigDecimal,
) -> Result<WithdrawQuote, QuoteError> {
    let single_unit_costs = weighted_unit_costs(pool)?;
    let reserve = weighted_reserve(pool, token)?;

    let staked = shrink_token(reserve.staked_balance, reserve.token.decimals);
    nonzero(&staked, "staked balance")?;

    Ok(WithdrawQuote {
        opposing_amount: None,
        pool_token_cost: None,
        share_of_pool: (amount / &staked).to_f64().unwrap_or_default(),
        single_unit_costs,
        min_return: amount * buffer,
    })
}

/// Constant-product output of a fixed-ratio hop, conversion fee applied.
pub fn fixed_ratio_swap_out(
    pool: &FixedRatioPool,
    from: Address,
    to: Address,
    amount_wei: U256,
) -> Result<U256, QuoteError> {
    let from_index = reserve_index(
        pool.id,
        [pool.reserves[0].address, pool.reserves[1].address],
        from,
    )?;
    let to_index = reserve_index(
        pool.id,
        [pool.reserves[0].address, pool.reserves[1].address],
        to,
    )?;
    if from_index == to_index {
        return Err(QuoteError::SelfConversion);
    }

    let from_balance = u256_to_big_decimal(&pool.reserve_balances[from_index]);
    let to_balance = u256_to_big_decimal(&pool.reserve_balances[to_index]);
    let amount = u256_to_big_decimal(&amount_wei);
    let denominator = &from_balance + &amount;
    nonzero(&denominator, "reserve balance plus input")?;

    let fee = BigDecimal::from(1)
        - BigDecimal::from(pool.fee_ppm) / BigDecimal::from(PPM);
    let out = (&to_balance * &amount / denominator * fee).with_scale_round(0, RoundingMode::Down);
    big_decimal_to_u256(&out).map_err(|err| QuoteError::Arithmetic(err.to_string()))
}

/// Weight-exponent output of a weighted hop, conversion fee applied.
pub fn weighted_swap_out(
    pool: &WeightedPool,
    from: Address,
    to: Address,
    amount_wei: U256,
) -> Result<U256, QuoteError> {
    if from == to {
        return Err(QuoteError::SelfConversion);
    }
    let from_reserve = weighted_reserve(pool, from)?;
    let to_reserve = weighted_reserve(pool, to)?;

    let from_balance = u256_to_big_decimal(&from_reserve.staked_balance)
        .to_f64()
        .unwrap_or_default();
    let to_balance = u256_to_big_decimal(&to_reserve.staked_balance)
        .to_f64()
        .unwrap_or_default();
    let amount = u256_to_big_decimal(&amount_wei).to_f64().unwrap_or_default();
    if from_balance + amount == 0. || to_reserve.weight_ppm == 0 {
        return Err(QuoteError::Arithmetic("degenerate weighted pool state".into()));
    }

    let exponent = from_reserve.weight_ppm as f64 / to_reserve.weight_ppm as f64;
    let fee = 1. - pool.fee_ppm as f64 / PPM as f64;
    let out = to_balance * (1. - (from_balance / (from_balance + amount)).powf(exponent)) * fee;
    if !out.is_finite() || out < 0. {
        return Err(QuoteError::Arithmetic("weighted return is not finite".into()));
    }
    let out = BigDecimal::from_f64(out)
        .ok_or_else(|| QuoteError::Arithmetic("weighted return is not representable".into()))?
        .with_scale_round(0, RoundingMode::Down);
    big_decimal_to_u256(&out).map_err(|err| QuoteError::Arithmetic(err.to_string()))
}

/// Relative slippage between the clean probe rate and the actually traded
/// rate. A traded rate above the probe rate means the pool state the quote
/// was computed from is inconsistent.
pub fn calculate_slippage(
    clean_rate: &BigDecimal,
    slippaged_rate: &BigDecimal,
) -> Result<BigDecimal, QuoteError> {
    if slippaged_rate > clean_rate {
        return Err(QuoteError::RateInversion);
    }
    nonzero(clean_rate, "clean rate")?;
    Ok((clean_rate - slippaged_rate) / clean_rate)
}
