//! Client-side aggregation of on-chain liquidity pool state: discovery of
//! converter/anchor pairs, batched multicall interpretation of pool
//! contracts, an in-memory pool registry, USD liquidity feeds and
//! deposit/withdraw/swap quoting.

pub mod calls;
pub mod config;
pub mod discovery;
pub mod feeds;
pub mod pools;
pub mod quoting;
pub mod service;
pub mod token_info;

pub use {
    pools::{Pool, PoolId, registry::PoolRegistry},
    service::PoolService,
};
