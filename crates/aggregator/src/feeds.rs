//! USD liquidity depth feeds derived from on-chain reserve state and a
//! single network-token reference price. Values are display grade and
//! computed in `f64`.

use {
    crate::pools::{FixedRatioPool, PPM, PoolId, ReserveToken, WeightedPool},
    alloy_primitives::{Address, U256},
    bigdecimal::ToPrimitive,
    number::shrink_token,
};

#[derive(Clone, Debug, PartialEq)]
pub struct ReserveFeed {
    pub pool_id: PoolId,
    pub token: Address,
    /// USD liquidity depth of the pool as seen from this reserve.
    pub liq_depth: f64,
    pub cost_by_network_usd: Option<f64>,
    pub change_24h: Option<f64>,
    pub volume_24h: Option<f64>,
}

impl ReserveFeed {
    /// Whether the feed carries market data on top of the on-chain derived
    /// numbers. Such feeds win deduplication.
    pub fn has_market_data(&self) -> bool {
        self.change_24h.is_some() || self.volume_24h.is_some()
    }
}

fn to_dec(amount: U256, decimals: u8) -> f64 {
    shrink_token(amount, decimals).to_f64().unwrap_or_default()
}

fn network_reserve_first<'a, T>(
    reserves: [(&'a ReserveToken, T); 2],
    network_tokens: &[Address],
) -> Option<[(&'a ReserveToken, T); 2]> {
    let [first, second] = reserves;
    if network_tokens.contains(&first.0.address) {
        Some([first, second])
    } else if network_tokens.contains(&second.0.address) {
        Some([second, first])
    } else {
        None
    }
}

/// Feeds for a fixed-ratio pool. Depth is the USD value of the network
/// reserve counted for both sides of the pool; token cost is implied by the
/// reserve ratio.
pub fn fixed_ratio_feeds(
    pool: &FixedRatioPool,
    network_tokens: &[Address],
    usd_pegged_symbol: &str,
    usd_price: f64,
) -> Vec<ReserveFeed> {
    let reserves = [
        (&pool.reserves[0], pool.reserve_balances[0]),
        (&pool.reserves[1], pool.reserve_balances[1]),
    ];
    let Some([(network, network_balance), (token, token_balance)]) =
        network_reserve_first(reserves, network_tokens)
    else {
        tracing::warn!(pool = ?pool.id, "pool has no network token reserve, skipping feeds");
        return Vec::new();
    };

    let network_amount = to_dec(network_balance, network.decimals);
    let token_amount = to_dec(token_balance, token.decimals);
    if network_amount == 0. || token_amount == 0. {
        tracing::warn!(pool = ?pool.id, "empty reserve, skipping feeds");
        return Vec::new();
    }

    let network_is_usd = network.symbol == usd_pegged_symbol;
    let ratio = network_amount / token_amount;
    let main = if network_is_usd {
        ratio
    } else {
        ratio * usd_price
    };
    let liq_depth = if network_is_usd {
        network_amount
    } else {
        network_amount * usd_price
    } * 2.;

    vec![
        ReserveFeed {
            pool_id: pool.id,
            token: token.address,
            liq_depth,
            cost_by_network_usd: Some(main),
            change_24h: None,
            volume_24h: None,
        },
        ReserveFeed {
            pool_id: pool.id,
            token: network.address,
            liq_depth,
            cost_by_network_usd: Some(token_amount / network_amount * main),
            change_24h: None,
            volume_24h: None,
        },
    ]
}

/// Feeds for a weighted pool, derived from staked balances and weight
/// fractions: the network side anchors the USD depth, the whole pool depth
/// follows from that side's weight, and the other side gets the remainder.
pub fn weighted_feeds(
    pool: &WeightedPool,
    network_tokens: &[Address],
    usd_pegged_symbol: &str,
    usd_price: f64,
) -> Vec<ReserveFeed> {
    let reserves = [
        (&pool.reserves[0].token, &pool.reserves[0]),
        (&pool.reserves[1].token, &pool.reserves[1]),
    ];
    let Some([(_, secondary), (_, primary)]) =
        network_reserve_first(reserves, network_tokens)
    else {
        tracing::warn!(pool = ?pool.id, "pool has no network token reserve, skipping feeds");
        return Vec::new();
    };

    let secondary_amount = to_dec(secondary.staked_balance, secondary.token.decimals);
    let secondary_weight = secondary.weight_ppm as f64 / PPM as f64;
    if secondary_amount == 0. || secondary_weight == 0. {
        tracing::warn!(pool = ?pool.id, "empty network side, skipping feeds");
        return Vec::new();
    }

    let price = if secondary.token.symbol == usd_pegged_symbol {
        1.
    } else {
        usd_price
    };
    let secondary_depth = secondary_amount * price;
    let whole_depth = secondary_depth / secondary_weight;
    let primary_depth = whole_depth - secondary_depth;

    vec![
        ReserveFeed {
            pool_id: pool.id,
            token: primary.token.address,
            liq_depth: primary_depth,
            cost_by_network_usd: Some(primary_depth / secondary_amount),
            change_24h: None,
            volume_24h: None,
        },
        ReserveFeed {
            pool_id: pool.id,
            token: secondary.token.address,
            liq_depth: secondary_depth,
            cost_by_network_usd: Some(price),
            change_24h: None,
            volume_24h: None,
        },
    ]
}
