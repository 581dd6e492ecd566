//! The in-memory pool registry. All mutation goes through [`PoolRegistry::merge`]
//! and [`PoolRegistry::reload`]; reads return owned snapshots.

use {
    crate::{
        feeds::ReserveFeed,
        pools::{Pool, PoolId},
    },
    alloy_primitives::Address,
    std::{
        collections::{BTreeMap, HashMap},
        sync::RwLock,
    },
};

#[derive(Default)]
pub struct PoolRegistry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    pools: BTreeMap<PoolId, Pool>,
    feeds: HashMap<(PoolId, Address), ReserveFeed>,
    /// Authoritative decimals per token, fixed by the first pool that
    /// registered the token.
    token_decimals: HashMap<Address, u8>,
}

impl Inner {
    /// Checks both reserves against the recorded decimals before admitting
    /// the pool. A pool disagreeing with the registry is rejected wholesale.
    fn admit(&mut self, pool: Pool) -> bool {
        for reserve in pool.reserve_tokens() {
            if let Some(&known) = self.token_decimals.get(&reserve.address) {
                if known != reserve.decimals {
                    tracing::warn!(
                        pool = ?pool.id(),
                        token = ?reserve.address,
                        known,
                        conflicting = reserve.decimals,
                        "pool reports conflicting token decimals, rejecting"
                    );
                    return false;
                }
            }
        }
        for reserve in pool.reserve_tokens() {
            self.token_decimals
                .insert(reserve.address, reserve.decimals);
        }
        self.pools.insert(pool.id(), pool);
        true
    }

    fn admit_feed(&mut self, feed: ReserveFeed) {
        let key = (feed.pool_id, feed.token);
        match self.feeds.get(&key) {
            Some(existing) if existing.has_market_data() && !feed.has_market_data() => (),
            _ => {
                self.feeds.insert(key, feed);
            }
        }
    }
}

impl PoolRegistry {
    /// Merges freshly assembled pools and feeds into the registry. Existing
    /// entries for the same pool id are replaced, so merging is idempotent
    /// and merge order does not matter for disjoint batches.
    pub fn merge(&self, pools: Vec<Pool>, feeds: Vec<ReserveFeed>) {
        let mut inner = self.inner.write().unwrap();
        for pool in pools {
            inner.admit(pool);
        }
        for feed in feeds {
            inner.admit_feed(feed);
        }
    }

    /// Replaces the state of the given anchors: their pools and feeds are
    /// deleted first, then the fresh state is merged, all under one lock.
    pub fn reload(&self, anchors: &[PoolId], pools: Vec<Pool>, feeds: Vec<ReserveFeed>) {
        let mut inner = self.inner.write().unwrap();
        for anchor in anchors {
            inner.pools.remove(anchor);
            inner.feeds.retain(|(pool_id, _), _| pool_id != anchor);
        }
        for pool in pools {
            inner.admit(pool);
        }
        for feed in feeds {
            inner.admit_feed(feed);
        }
    }

    pub fn pool(&self, id: PoolId) -> Option<Pool> {
        self.inner.read().unwrap().pools.get(&id).cloned()
    }

    pub fn pools(&self) -> Vec<Pool> {
        self.inner.read().unwrap().pools.values().cloned().collect()
    }

    pub fn pools_containing(&self, token: Address) -> Vec<Pool> {
        self.inner
            .read()
            .unwrap()
            .pools
            .values()
            .filter(|pool| pool.contains_token(token))
            .cloned()
            .collect()
    }

    pub fn feed(&self, pool: PoolId, token: Address) -> Option<ReserveFeed> {
        self.inner.read().unwrap().feeds.get(&(pool, token)).cloned()
    }

    pub fn contains(&self, id: PoolId) -> bool {
        self.inner.read().unwrap().pools.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::pools::{AnchorToken, FixedRatioPool, ReserveToken},
        alloy_primitives::U256,
    };

    fn pool(id: u8, decimals: [u8; 2]) -> Pool {
        Pool::FixedRatio(FixedRatioPool {
            id: Address::repeat_byte(id),
            converter: Address::repeat_byte(0xc0),
            anchor: AnchorToken {
                address: Address::repeat_byte(id),
                symbol: "ANCHOR".into(),
                decimals: 18,
            },
            reserves: [
                ReserveToken {
                    address: Address::repeat_byte(1),
                    symbol: "BNT".into(),
                    decimals: decimals[0],
                },
                ReserveToken {
                    address: Address::repeat_byte(2),
                    symbol: "TKN".into(),
                    decimals: decimals[1],
                },
            ],
            reserve_balances: [U256::from(1_u64), U256::from(2_u64)],
            fee_ppm: 1000,
            owner: Address::ZERO,
            version: 41,
        })
    }

    fn feed(pool_id: u8, token: u8, depth: f64, volume: Option<f64>) -> ReserveFeed {
        ReserveFeed {
            pool_id: Address::repeat_byte(pool_id),
            token: Address::repeat_byte(token),
            liq_depth: depth,
            cost_by_network_usd: Some(1.),
            change_24h: None,
            volume_24h: volume,
        }
    }

    #[test]
    fn merge_is_idempotent() {
        let registry = PoolRegistry::default();
        registry.merge(vec![pool(0xa0, [18, 6])], vec![feed(0xa0, 1, 10., None)]);
        registry.merge(vec![pool(0xa0, [18, 6])], vec![feed(0xa0, 1, 10., None)]);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry
                .feed(Address::repeat_byte(0xa0), Address::repeat_byte(1))
                .unwrap()
                .liq_depth,
            10.,
        );
    }

    #[test]
    fn merge_order_does_not_matter_for_distinct_pools() {
        let forward = PoolRegistry::default();
        forward.merge(vec![pool(0xa0, [18, 6])], vec![feed(0xa0, 1, 10., None)]);
        forward.merge(vec![pool(0xa1, [18, 6])], vec![feed(0xa1, 1, 20., None)]);

        let reverse = PoolRegistry::default();
        reverse.merge(vec![pool(0xa1, [18, 6])], vec![feed(0xa1, 1, 20., None)]);
        reverse.merge(vec![pool(0xa0, [18, 6])], vec![feed(0xa0, 1, 10., None)]);

        assert_eq!(forward.pools(), reverse.pools());
        for id in [0xa0, 0xa1] {
            assert_eq!(
                forward.feed(Address::repeat_byte(id), Address::repeat_byte(1)),
                reverse.feed(Address::repeat_byte(id), Address::repeat_byte(1)),
            );
        }
    }

    #[test]
    fn conflicting_decimals_reject_the_later_pool() {
        let registry = PoolRegistry::default();
        registry.merge(vec![pool(0xa0, [18, 6])], Vec::new());
        registry.merge(vec![pool(0xa1, [18, 8])], Vec::new());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(Address::repeat_byte(0xa0)));
        assert!(!registry.contains(Address::repeat_byte(0xa1)));
    }

    #[test]
    fn feeds_with_market_data_survive_dedupe() {
        let registry = PoolRegistry::default();
        registry.merge(Vec::new(), vec![feed(0xa0, 1, 10., Some(5.))]);
        registry.merge(Vec::new(), vec![feed(0xa0, 1, 99., None)]);
        let kept = registry
            .feed(Address::repeat_byte(0xa0), Address::repeat_byte(1))
            .unwrap();
        assert_eq!(kept.liq_depth, 10.);
        assert_eq!(kept.volume_24h, Some(5.));

        // A fresh market-data feed replaces the old one.
        registry.merge(Vec::new(), vec![feed(0xa0, 1, 42., Some(6.))]);
        let kept = registry
            .feed(Address::repeat_byte(0xa0), Address::repeat_byte(1))
            .unwrap();
        assert_eq!(kept.liq_depth, 42.);
    }

    #[test]
    fn reload_replaces_anchor_scoped_state() {
        let registry = PoolRegistry::default();
        registry.merge(
            vec![pool(0xa0, [18, 6]), pool(0xa1, [18, 6])],
            vec![feed(0xa0, 1, 10., None), feed(0xa1, 1, 20., None)],
        );
        registry.reload(
            &[Address::repeat_byte(0xa0)],
            vec![pool(0xa0, [18, 6])],
            vec![feed(0xa0, 1, 11., None)],
        );
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry
                .feed(Address::repeat_byte(0xa0), Address::repeat_byte(1))
                .unwrap()
                .liq_depth,
            11.,
        );
        assert_eq!(
            registry
                .feed(Address::repeat_byte(0xa1), Address::repeat_byte(1))
                .unwrap()
                .liq_depth,
            20.,
        );
    }

    #[test]
    fn lookup_by_contained_token() {
        let registry = PoolRegistry::default();
        registry.merge(vec![pool(0xa0, [18, 6])], Vec::new());
        assert_eq!(registry.pools_containing(Address::repeat_byte(2)).len(), 1);
        assert!(registry.pools_containing(Address::repeat_byte(9)).is_empty());
    }
}
