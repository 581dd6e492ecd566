//! The aggregation service: discovery of anchor/converter pairs, demand
//! driven pool loading into the registry and the quoting surface on top of
//! it. All loading is incremental; anchors that fail assembly are remembered
//! and never retried within a session.

use {
    crate::{
        config::Settings,
        discovery::{AnchorCache, AnchorConverterPair, ConverterDiscovery, ReferencePrice},
        feeds::ReserveFeed,
        pools::{Pool, PoolId, assembler::PoolAssembler, registry::PoolRegistry},
        quoting::{self, DepositQuote, QuoteError, WithdrawQuote},
    },
    alloy_dyn_abi::DynSolType,
    alloy_primitives::{Address, U256},
    anyhow::Result,
    bigdecimal::{BigDecimal, RoundingMode},
    ethrpc::{Call, CallBatcher},
    number::{
        big_decimal_to_u256,
        conversions::u256_to_big_decimal,
        expand_token,
        shrink_token,
    },
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        sync::{Arc, Mutex},
    },
};

/// Where an anchor is in its loading lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AnchorStatus {
    Unloaded,
    Discovering,
    Loaded,
    /// Assembly failed; the anchor is excluded from further loading.
    FailedPermanently,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SwapQuote {
    /// Expected output amount in decimal-adjusted units.
    pub amount: BigDecimal,
    /// Relative slippage against a small probe trade, when one was possible.
    pub slippage: Option<BigDecimal>,
    /// The pools the conversion routes through.
    pub path: Vec<PoolId>,
}

#[derive(Default)]
struct State {
    pairs: BTreeMap<PoolId, Address>,
    statuses: HashMap<PoolId, AnchorStatus>,
}

pub struct PoolService {
    discovery: Arc<dyn ConverterDiscovery>,
    cache: Arc<dyn AnchorCache>,
    reference_price: Arc<dyn ReferencePrice>,
    assembler: PoolAssembler,
    batcher: Arc<CallBatcher>,
    registry: PoolRegistry,
    settings: Settings,
    state: Mutex<State>,
}

impl PoolService {
    pub fn new(
        discovery: Arc<dyn ConverterDiscovery>,
        cache: Arc<dyn AnchorCache>,
        reference_price: Arc<dyn ReferencePrice>,
        assembler: PoolAssembler,
        batcher: Arc<CallBatcher>,
        settings: Settings,
    ) -> Self {
        Self {
            discovery,
            cache,
            reference_price,
            assembler,
            batcher,
            registry: PoolRegistry::default(),
            settings,
            state: Mutex::new(State::default()),
        }
    }

    /// Discovers all anchor/converter pairs, reconciles them with the
    /// persisted cache and loads the pools of the `priority` anchors right
    /// away. Anchors whose converter changed since the last run are
    /// reloaded if they are already in the registry.
    pub async fn init(&self, priority: &[Address]) -> Result<Vec<PoolId>> {
        let anchors = self.discovery.anchors().await?;
        let converters = self.discovery.converters_by_anchors(&anchors).await?;
        let pairs: Vec<AnchorConverterPair> = anchors
            .iter()
            .zip(&converters)
            .map(|(anchor, converter)| AnchorConverterPair {
                anchor: *anchor,
                converter: *converter,
            })
            .collect();
        tracing::info!(anchors = pairs.len(), "discovered anchor/converter pairs");

        let cached: HashMap<Address, Address> = match self.cache.load() {
            Ok(cached) => cached
                .into_iter()
                .map(|pair| (pair.anchor, pair.converter))
                .collect(),
            Err(err) => {
                tracing::warn!(?err, "failed to load the anchor cache");
                HashMap::new()
            }
        };
        let upgraded: Vec<PoolId> = pairs
            .iter()
            .filter(|pair| {
                cached
                    .get(&pair.anchor)
                    .is_some_and(|old| *old != pair.converter)
                    && self.registry.contains(pair.anchor)
            })
            .map(|pair| pair.anchor)
            .collect();
        if let Err(err) = self.cache.store(&pairs) {
            tracing::warn!(?err, "failed to persist the anchor cache");
        }

        {
            let mut state = self.state.lock().unwrap();
            state.pairs = pairs
                .iter()
                .map(|pair| (pair.anchor, pair.converter))
                .collect();
            for pair in &pairs {
                state
                    .statuses
                    .entry(pair.anchor)
                    .or_insert(AnchorStatus::Unloaded);
            }
        }

        if !upgraded.is_empty() {
            tracing::info!(anchors = ?upgraded, "reloading pools with upgraded converters");
            self.reload_pools(&upgraded).await?;
        }

        let targets: Vec<AnchorConverterPair> = pairs
            .into_iter()
            .filter(|pair| priority.contains(&pair.anchor))
            .collect();
        Ok(self.load_anchors(targets).await)
    }

    /// Loads up to `limit` further pools that have not been attempted yet.
    pub async fn load_more_pools(&self, limit: usize) -> Vec<PoolId> {
        let targets: Vec<AnchorConverterPair> = {
            let state = self.state.lock().unwrap();
            state
                .pairs
                .iter()
                .filter(|(anchor, _)| {
                    state.statuses.get(*anchor).copied().unwrap_or(AnchorStatus::Unloaded)
                        == AnchorStatus::Unloaded
                })
                .take(limit)
                .map(|(anchor, converter)| AnchorConverterPair {
                    anchor: *anchor,
                    converter: *converter,
                })
                .collect()
        };
        self.load_anchors(targets).await
    }

    /// Loads every not yet attempted pool in which `token` is convertible.
    pub async fn load_pools_containing(&self, token: Address) -> Result<Vec<PoolId>> {
        let anchors = self.discovery.anchors_containing(token).await?;
        let targets: Vec<AnchorConverterPair> = {
            let state = self.state.lock().unwrap();
            anchors
                .iter()
                .filter(|anchor| {
                    state.statuses.get(*anchor).copied().unwrap_or(AnchorStatus::Unloaded)
                        == AnchorStatus::Unloaded
                })
                .filter_map(|anchor| {
                    state.pairs.get(anchor).map(|converter| AnchorConverterPair {
                        anchor: *anchor,
                        converter: *converter,
                    })
                })
                .collect()
        };
        Ok(self.load_anchors(targets).await)
    }

    /// Refreshes the given anchors from chain, replacing their registry
    /// state wholesale.
    pub async fn reload_pools(&self, anchors: &[PoolId]) -> Result<Vec<PoolId>> {
        let targets: Vec<AnchorConverterPair> = {
            let state = self.state.lock().unwrap();
            anchors
                .iter()
                .filter_map(|anchor| {
                    state.pairs.get(anchor).map(|converter| AnchorConverterPair {
                        anchor: *anchor,
                        converter: *converter,
                    })
                })
                .collect()
        };
        let price = self.usd_price().await;
        let result = self.assembler.assemble(&targets, price).await;
        let loaded = self.record_statuses(&targets, &result.pools);
        self.registry.reload(anchors, result.pools, result.feeds);
        Ok(loaded)
    }

    async fn load_anchors(&self, targets: Vec<AnchorConverterPair>) -> Vec<PoolId> {
        if targets.is_empty() {
            return Vec::new();
        }
        {
            let mut state = self.state.lock().unwrap();
            for target in &targets {
                state
                    .statuses
                    .insert(target.anchor, AnchorStatus::Discovering);
            }
        }
        let price = self.usd_price().await;
        let result = self.assembler.assemble(&targets, price).await;
        let loaded = self.record_statuses(&targets, &result.pools);
        self.registry.merge(result.pools, result.feeds);
        loaded
    }

    fn record_statuses(&self, targets: &[AnchorConverterPair], pools: &[Pool]) -> Vec<PoolId> {
        let assembled: HashSet<PoolId> = pools.iter().map(Pool::id).collect();
        let mut state = self.state.lock().unwrap();
        let mut loaded = Vec::new();
        for target in targets {
            let status = if assembled.contains(&target.anchor) {
                loaded.push(target.anchor);
                AnchorStatus::Loaded
            } else {
                tracing::warn!(anchor = ?target.anchor, "anchor failed assembly permanently");
                AnchorStatus::FailedPermanently
            };
            state.statuses.insert(target.anchor, status);
        }
        loaded
    }

    async fn usd_price(&self) -> Option<f64> {
        match self.reference_price.usd_price().await {
            Ok(price) => Some(price),
            Err(err) => {
                tracing::warn!(?err, "no USD reference price, skipping feeds");
                None
            }
        }
    }

    pub fn anchor_status(&self, anchor: Address) -> AnchorStatus {
        self.state
            .lock()
            .unwrap()
            .statuses
            .get(&anchor)
            .copied()
            .unwrap_or(AnchorStatus::Unloaded)
    }

    pub fn pools(&self) -> Vec<Pool> {
        self.registry.pools()
    }

    pub fn pool(&self, id: PoolId) -> Option<Pool> {
        self.registry.pool(id)
    }

    pub fn feed(&self, pool: PoolId, token: Address) -> Option<ReserveFeed> {
        self.registry.feed(pool, token)
    }

    pub async fn quote_deposit(
        &self,
        pool_id: PoolId,
        token: Address,
        amount: &BigDecimal,
    ) -> Result<DepositQuote, QuoteError> {
        let pool = self
            .registry
            .pool(pool_id)
            .ok_or(QuoteError::UnknownPool(pool_id))?;
        match pool {
            Pool::FixedRatio(pool) => {
                let supply = self.pool_token_supply(pool.anchor.address).await?;
                quoting::fixed_ratio_deposit(
                    &pool,
                    supply,
                    token,
                    amount,
                    &self.settings.fund_reward_haircut,
                )
            }
            Pool::Weighted(pool) => quoting::weighted_deposit(&pool, token, amount),
        }
    }

    pub async fn quote_withdraw(
        &self,
        pool_id: PoolId,
        token: Address,
        amount: &BigDecimal,
    ) -> Result<WithdrawQuote, QuoteError> {
        let pool = self
            .registry
            .pool(pool_id)
            .ok_or(QuoteError::UnknownPool(pool_id))?;
        match pool {
            Pool::FixedRatio(pool) => {
                let supply = self.pool_token_supply(pool.anchor.address).await?;
                quoting::fixed_ratio_withdraw(
                    &pool,
                    supply,
                    token,
                    amount,
                    &self.settings.withdraw_slippage_buffer,
                )
            }
            Pool::Weighted(pool) => quoting::weighted_withdraw(
                &pool,
                token,
                amount,
                &self.settings.withdraw_slippage_buffer,
            ),
        }
    }

    /// Quotes a conversion over loaded pools, routing directly or through
    /// one intermediate reserve. The quoted rate is compared against a tiny
    /// probe trade to estimate slippage; a failed probe only loses the
    /// slippage estimate, never the quote.
    pub async fn quote_swap(
        &self,
        from: Address,
        to: Address,
        amount: &BigDecimal,
    ) -> Result<SwapQuote, QuoteError> {
        if from == to {
            return Err(QuoteError::SelfConversion);
        }
        let path = self.find_path(from, to)?;

        let from_decimals = path[0]
            .reserve_tokens()
            .into_iter()
            .find(|reserve| reserve.address == from)
            .map(|reserve| reserve.decimals)
            .ok_or(QuoteError::UnknownReserve {
                pool: path[0].id(),
                token: from,
            })?;
        let amount_wei = expand_token(amount, from_decimals)
            .map_err(|err| QuoteError::Arithmetic(err.to_string()))?;

        let (out_wei, to_decimals) = path_out(&path, from, amount_wei)?;
        let out = shrink_token(out_wei, to_decimals);
        let slippage = self.probe_slippage(&path, from, amount_wei, out_wei);

        Ok(SwapQuote {
            amount: out,
            slippage,
            path: path.iter().map(Pool::id).collect(),
        })
    }

    /// Estimates slippage by quoting a probe trade sized as a fixed fraction
    /// of the source reserve. Skipped when the probe would not be smaller
    /// than the actual trade.
    fn probe_slippage(
        &self,
        path: &[Pool],
        from: Address,
        amount_wei: U256,
        out_wei: U256,
    ) -> Option<BigDecimal> {
        let balance = reserve_balance_wei(&path[0], from)?;
        let probe = (u256_to_big_decimal(&balance) * &self.settings.probe_fraction)
            .with_scale_round(0, RoundingMode::Down);
        let probe_wei = big_decimal_to_u256(&probe).ok()?;
        if probe_wei.is_zero() || probe_wei >= amount_wei {
            return None;
        }

        let probe_out = match path_out(path, from, probe_wei) {
            Ok((out, _)) => out,
            Err(err) => {
                tracing::warn!(?err, "probe trade failed, skipping slippage estimate");
                return None;
            }
        };
        let clean = u256_to_big_decimal(&probe_out) / &probe;
        let dirty = u256_to_big_decimal(&out_wei) / u256_to_big_decimal(&amount_wei);
        match quoting::calculate_slippage(&clean, &dirty) {
            Ok(slippage) => Some(slippage),
            Err(err) => {
                tracing::warn!(?err, "inconsistent probe rate, skipping slippage estimate");
                None
            }
        }
    }

    fn find_path(&self, from: Address, to: Address) -> Result<Vec<Pool>, QuoteError> {
        let from_pools = self.registry.pools_containing(from);
        if let Some(direct) = from_pools.iter().find(|pool| pool.contains_token(to)) {
            return Ok(vec![direct.clone()]);
        }
        let to_pools = self.registry.pools_containing(to);
        for first in &from_pools {
            let Some(intermediate) = first.opposite_reserve(from) else {
                continue;
            };
            if let Some(second) = to_pools
                .iter()
                .find(|pool| pool.contains_token(intermediate.address))
            {
                return Ok(vec![first.clone(), second.clone()]);
            }
        }
        Err(QuoteError::NoPath { from, to })
    }

    async fn pool_token_supply(&self, anchor: Address) -> Result<U256, QuoteError> {
        let method = crate::calls::MethodCall::new(
            "totalSupply()",
            vec![],
            vec![DynSolType::Uint(256)],
        );
        let calls = vec![Call {
            target: anchor,
            data: method.encode().into(),
        }];
        let outcomes = self
            .batcher
            .send_batch(calls)
            .await
            .map_err(|err| QuoteError::Arithmetic(err.to_string()))?;
        let (_, outcome) = outcomes
            .into_iter()
            .next()
            .ok_or_else(|| QuoteError::Arithmetic("empty aggregation response".into()))?;
        let data = outcome
            .into_success()
            .ok_or_else(|| QuoteError::Arithmetic("totalSupply() reverted".into()))?;
        let value = method
            .decode_returns(&data)
            .map_err(|err| QuoteError::Arithmetic(err.to_string()))?;
        value
            .as_uint()
            .map(|(value, _)| value)
            .ok_or_else(|| QuoteError::Arithmetic("totalSupply() returned a non-uint".into()))
    }
}

/// Routes `amount_wei` of `from` through `path`, returning the output amount
/// and the decimals of the final token.
fn path_out(path: &[Pool], from: Address, amount_wei: U256) -> Result<(U256, u8), QuoteError> {
    let mut token = from;
    let mut decimals = 0;
    let mut amount = amount_wei;
    for pool in path {
        let next = pool
            .opposite_reserve(token)
            .ok_or(QuoteError::UnknownReserve {
                pool: pool.id(),
                token,
            })?;
        amount = match pool {
            Pool::FixedRatio(pool) => {
                quoting::fixed_ratio_swap_out(pool, token, next.address, amount)?
            }
            Pool::Weighted(pool) => {
                quoting::weighted_swap_out(pool, token, next.address, amount)?
            }
        };
        decimals = next.decimals;
        token = next.address;
    }
    Ok((amount, decimals))
}

/// Spot balance of `token` in `pool`, in wei.
fn reserve_balance_wei(pool: &Pool, token: Address) -> Option<U256> {
    match pool {
        Pool::FixedRatio(pool) => pool
            .reserves
            .iter()
            .position(|reserve| reserve.address == token)
            .map(|index| pool.reserve_balances[index]),
        Pool::Weighted(pool) => pool
            .reserves
            .iter()
            .find(|reserve| reserve.token.address == token)
            .map(|reserve| reserve.staked_balance),
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            config::NetworkConfig,
            discovery::{MockAnchorCache, MockConverterDiscovery, MockReferencePrice},
            pools::{AnchorToken, FixedRatioPool, ReserveToken},
            token_info::MockTokenInfoFetching,
        },
        alloy_dyn_abi::DynSolValue,
        bigdecimal::ToPrimitive,
        ethrpc::{CallOutcome, MockAggregationEndpoint},
        std::str::FromStr,
    };

    const BNT: Address = Address::repeat_byte(1);
    const TKA: Address = Address::repeat_byte(2);
    const TKB: Address = Address::repeat_byte(3);

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    fn reserve(address: Address, symbol: &str) -> ReserveToken {
        ReserveToken {
            address,
            symbol: symbol.into(),
            decimals: 0,
        }
    }

    fn fixed_pool(id: u8, reserves: [ReserveToken; 2], balances: [u64; 2]) -> Pool {
        Pool::FixedRatio(FixedRatioPool {
            id: Address::repeat_byte(id),
            converter: Address::repeat_byte(id + 1),
            anchor: AnchorToken {
                address: Address::repeat_byte(id),
                symbol: "ANCHOR".into(),
                decimals: 0,
            },
            reserves,
            reserve_balances: [U256::from(balances[0]), U256::from(balances[1])],
            fee_ppm: 0,
            owner: Address::ZERO,
            version: 41,
        })
    }

    fn network() -> NetworkConfig {
        NetworkConfig {
            multicall: Address::repeat_byte(0xee),
            contract_registry: Address::repeat_byte(0xef),
            network_tokens: vec![BNT],
            usd_pegged_symbol: "USDB".to_string(),
            known_tokens: HashMap::new(),
            version_overrides: HashMap::new(),
            blacklisted_anchors: Default::default(),
        }
    }

    struct Fixture {
        discovery: MockConverterDiscovery,
        cache: MockAnchorCache,
        price: MockReferencePrice,
        endpoint: MockAggregationEndpoint,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                discovery: MockConverterDiscovery::new(),
                cache: MockAnchorCache::new(),
                price: MockReferencePrice::new(),
                endpoint: MockAggregationEndpoint::new(),
            }
        }

        fn into_service(self) -> PoolService {
            let batcher = Arc::new(CallBatcher::with_default_strategies(Arc::new(
                self.endpoint,
            )));
            let assembler = PoolAssembler::new(
                batcher.clone(),
                Arc::new(MockTokenInfoFetching::new()),
                network(),
                30,
            );
            PoolService::new(
                Arc::new(self.discovery),
                Arc::new(self.cache),
                Arc::new(self.price),
                assembler,
                batcher,
                Settings::default(),
            )
        }
    }

    #[tokio::test]
    async fn swaps_route_directly_or_through_one_intermediate() {
        let service = Fixture::new().into_service();
        service.registry.merge(
            vec![
                fixed_pool(
                    0xa0,
                    [reserve(TKA, "TKA"), reserve(BNT, "BNT")],
                    [10_000, 10_000],
                ),
                fixed_pool(
                    0xb0,
                    [reserve(BNT, "BNT"), reserve(TKB, "TKB")],
                    [10_000, 10_000],
                ),
            ],
            vec![],
        );

        // Two hops: 10000 * 100 / 10100 = 99, then 10000 * 99 / 10099 = 98.
        let quote = service.quote_swap(TKA, TKB, &dec("100")).await.unwrap();
        assert_eq!(quote.amount, dec("98"));
        assert_eq!(
            quote.path,
            vec![Address::repeat_byte(0xa0), Address::repeat_byte(0xb0)],
        );
        // The probe would be a fraction of a wei, so no slippage estimate.
        assert_eq!(quote.slippage, None);

        let direct = service.quote_swap(TKA, BNT, &dec("100")).await.unwrap();
        assert_eq!(direct.path, vec![Address::repeat_byte(0xa0)]);

        assert!(matches!(
            service.quote_swap(TKA, TKA, &dec("1")).await,
            Err(QuoteError::SelfConversion),
        ));
        assert!(matches!(
            service
                .quote_swap(TKA, Address::repeat_byte(0x99), &dec("1"))
                .await,
            Err(QuoteError::NoPath { .. }),
        ));
    }

    #[tokio::test]
    async fn large_swaps_carry_a_probe_slippage_estimate() {
        let service = Fixture::new().into_service();
        service.registry.merge(
            vec![fixed_pool(
                0xa0,
                [reserve(TKA, "TKA"), reserve(BNT, "BNT")],
                [1_000_000_000, 1_000_000_000],
            )],
            vec![],
        );

        // Trading a tenth of the pool slips roughly 9% against the
        // 0.00001-of-reserve probe rate.
        let quote = service
            .quote_swap(TKA, BNT, &dec("100000000"))
            .await
            .unwrap();
        let slippage = quote.slippage.unwrap().to_f64().unwrap();
        assert!(slippage > 0.08 && slippage < 0.1, "slippage {slippage}");
    }

    #[tokio::test]
    async fn fixed_deposit_quote_fetches_pool_token_supply() {
        let mut fixture = Fixture::new();
        fixture.endpoint.expect_aggregate().returning(|calls, _| {
            Ok(calls
                .iter()
                .map(|_| CallOutcome {
                    success: true,
                    data: DynSolValue::Uint(U256::from(5000_u64), 256)
                        .abi_encode()
                        .into(),
                })
                .collect())
        });
        let service = fixture.into_service();

        let mut pool = fixed_pool(
            0xa0,
            [reserve(BNT, "BNT"), reserve(TKA, "TKA")],
            [10_000, 20_000],
        );
        let Pool::FixedRatio(inner) = &mut pool else {
            unreachable!()
        };
        inner.anchor.decimals = 1;
        inner.reserves[0].decimals = 1;
        inner.reserves[1].decimals = 1;
        service.registry.merge(vec![pool], vec![]);

        let quote = service
            .quote_deposit(Address::repeat_byte(0xa0), BNT, &dec("100"))
            .await
            .unwrap();
        assert_eq!(quote.opposing_amount.unwrap(), dec("200"));
        assert_eq!(quote.minted_pool_tokens.unwrap(), dec("49.5"));

        assert!(matches!(
            service
                .quote_deposit(Address::repeat_byte(0x77), BNT, &dec("1"))
                .await,
            Err(QuoteError::UnknownPool(_)),
        ));
    }

    #[tokio::test]
    async fn failed_anchors_are_never_retried() {
        observe::tracing::initialize_reentrant("debug");
        let anchor = Address::repeat_byte(0xa0);
        let converter = Address::repeat_byte(0xc0);

        let mut fixture = Fixture::new();
        fixture
            .discovery
            .expect_anchors()
            .times(1)
            .returning(move || Ok(vec![anchor]));
        fixture
            .discovery
            .expect_converters_by_anchors()
            .times(1)
            .returning(move |_| Ok(vec![converter]));
        fixture.cache.expect_load().times(1).returning(|| Ok(vec![]));
        fixture
            .cache
            .expect_store()
            .times(1)
            .returning(|_| Ok(()));
        // The price source being down only loses the feeds.
        fixture
            .price
            .expect_usd_price()
            .returning(|| Err(anyhow::anyhow!("price source down")));
        // Every call reverts, so assembly of the anchor cannot succeed.
        fixture.endpoint.expect_aggregate().returning(|calls, _| {
            Ok(calls
                .iter()
                .map(|_| CallOutcome {
                    success: false,
                    data: Default::default(),
                })
                .collect())
        });
        let service = fixture.into_service();

        let loaded = service.init(&[]).await.unwrap();
        assert!(loaded.is_empty());
        assert_eq!(service.anchor_status(anchor), AnchorStatus::Unloaded);

        let loaded = service.load_more_pools(5).await;
        assert!(loaded.is_empty());
        assert_eq!(
            service.anchor_status(anchor),
            AnchorStatus::FailedPermanently,
        );

        // The failed anchor is excluded from further loading.
        let loaded = service.load_more_pools(5).await;
        assert!(loaded.is_empty());
        assert!(service.pools().is_empty());
    }
}
