//! The pool assembly pipeline: two multicall rounds per chunk of
//! anchor/converter pairs, first probing converter and anchor metadata, then
//! resolving balances or staked state depending on the converter kind.
//! Incomplete or unsupported pools are dropped with a warning; a dropped
//! pool never fails the batch.

use {
    crate::{
        calls::{
            build_call_groups,
            codec::decode_call_group,
            create_indexes,
            handlers::{
                RawAnchor,
                RawConverter,
                RawReserveBalances,
                RawStakedBalances,
                anchor_token_template,
                converter_template,
                reserve_balance_template,
                staked_balance_template,
            },
            rebuild_from_index,
        },
        config::NetworkConfig,
        discovery::AnchorConverterPair,
        feeds::{ReserveFeed, fixed_ratio_feeds, weighted_feeds},
        pools::{
            AnchorToken,
            ConverterKind,
            FixedRatioPool,
            PPM,
            Pool,
            ReserveToken,
            WeightedPool,
            WeightedReserve,
            classify_converter,
        },
        token_info::TokenInfoFetching,
    },
    alloy_primitives::{Address, U256},
    anyhow::{Context, Result, anyhow},
    ethrpc::{Call, CallBatcher, CallOutcome},
    futures::future::join_all,
    itertools::Itertools,
    std::{collections::HashMap, sync::Arc},
};

pub struct PoolAssembler {
    batcher: Arc<CallBatcher>,
    tokens: Arc<dyn TokenInfoFetching>,
    network: NetworkConfig,
    pool_chunk: usize,
}

/// Everything a batch of anchor/converter pairs produced. Anchors of the
/// input that have no pool here failed assembly.
#[derive(Debug, Default)]
pub struct AssemblyResult {
    pub pools: Vec<Pool>,
    pub feeds: Vec<ReserveFeed>,
}

struct Candidate {
    pair: AnchorConverterPair,
    kind: ConverterKind,
    version: u64,
    owner: Address,
    fee_ppm: u64,
    reserves: [ReserveToken; 2],
    anchor: AnchorToken,
}

impl Candidate {
    fn reserve_addresses(&self) -> [Address; 2] {
        [self.reserves[0].address, self.reserves[1].address]
    }
}

impl PoolAssembler {
    pub fn new(
        batcher: Arc<CallBatcher>,
        tokens: Arc<dyn TokenInfoFetching>,
        network: NetworkConfig,
        pool_chunk: usize,
    ) -> Self {
        Self {
            batcher,
            tokens,
            network,
            pool_chunk,
        }
    }

    /// Assembles pools for the given pairs, blacklist applied, in chunks of
    /// `pool_chunk` pairs. A failing chunk only loses its own pools. Feeds
    /// are only produced when a USD reference price is available.
    pub async fn assemble(
        &self,
        pairs: &[AnchorConverterPair],
        usd_price: Option<f64>,
    ) -> AssemblyResult {
        let pairs: Vec<_> = pairs
            .iter()
            .filter(|pair| {
                let blacklisted = self.network.blacklisted_anchors.contains(&pair.anchor);
                if blacklisted {
                    tracing::debug!(anchor = ?pair.anchor, "skipping blacklisted anchor");
                }
                !blacklisted
            })
            .copied()
            .collect();

        let chunks: Vec<_> = pairs.chunks(self.pool_chunk.max(1)).collect();
        let results = join_all(
            chunks
                .iter()
                .map(|chunk| self.assemble_chunk(chunk, usd_price)),
        )
        .await;

        let mut assembled = AssemblyResult::default();
        for (chunk, result) in chunks.into_iter().zip(results) {
            match result {
                Ok(mut result) => {
                    assembled.pools.append(&mut result.pools);
                    assembled.feeds.append(&mut result.feeds);
                }
                Err(err) => {
                    tracing::warn!(
                        anchors = ?chunk.iter().map(|pair| pair.anchor).collect::<Vec<_>>(),
                        ?err,
                        "pool chunk failed assembly"
                    );
                }
            }
        }
        assembled
    }

    async fn assemble_chunk(
        &self,
        pairs: &[AnchorConverterPair],
        usd_price: Option<f64>,
    ) -> Result<AssemblyResult> {
        let converter_entities: Vec<_> = pairs
            .iter()
            .map(|pair| (pair.converter, converter_template()))
            .collect();
        let anchor_entities: Vec<_> = pairs
            .iter()
            .map(|pair| (pair.anchor, anchor_token_template()))
            .collect();
        let [converter_groups, anchor_groups] = self
            .smart_multi(vec![
                build_call_groups(&converter_entities)?,
                build_call_groups(&anchor_entities)?,
            ])
            .await?;

        let candidates = self
            .build_candidates(pairs, &converter_groups, &anchor_groups)
            .await?;

        let (fixed, weighted): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|candidate| candidate.kind == ConverterKind::FixedRatio);

        let fixed_entities: Vec<_> = fixed
            .iter()
            .map(|candidate| {
                (
                    candidate.pair.converter,
                    reserve_balance_template(candidate.reserve_addresses()),
                )
            })
            .collect();
        let weighted_entities: Vec<_> = weighted
            .iter()
            .map(|candidate| {
                (
                    candidate.pair.converter,
                    staked_balance_template(candidate.reserve_addresses()),
                )
            })
            .collect();
        let [fixed_groups, weighted_groups] = self
            .smart_multi(vec![
                build_call_groups(&fixed_entities)?,
                build_call_groups(&weighted_entities)?,
            ])
            .await?;

        let mut result = AssemblyResult::default();
        for (candidate, group) in fixed.iter().zip(&fixed_groups) {
            let record = decode_call_group(
                &reserve_balance_template(candidate.reserve_addresses()),
                group,
            )?;
            let Some(pool) = self.finish_fixed(candidate, &RawReserveBalances::from_record(&record))
            else {
                continue;
            };
            if let Some(price) = usd_price {
                result.feeds.extend(fixed_ratio_feeds(
                    &pool,
                    &self.network.network_tokens,
                    &self.network.usd_pegged_symbol,
                    price,
                ));
            }
            result.pools.push(Pool::FixedRatio(pool));
        }
        for (candidate, group) in weighted.iter().zip(&weighted_groups) {
            let record = decode_call_group(
                &staked_balance_template(candidate.reserve_addresses()),
                group,
            )?;
            let Some(pool) = self.finish_weighted(candidate, &RawStakedBalances::from_record(&record))
            else {
                continue;
            };
            if let Some(price) = usd_price {
                result.feeds.extend(weighted_feeds(
                    &pool,
                    &self.network.network_tokens,
                    &self.network.usd_pegged_symbol,
                    price,
                ));
            }
            result.pools.push(Pool::Weighted(pool));
        }
        Ok(result)
    }

    /// Executes several handler call-group sets in a single batch and
    /// re-nests the outcomes, handlers first, then contracts.
    async fn smart_multi<const N: usize>(
        &self,
        handlers: Vec<Vec<Vec<Call>>>,
    ) -> Result<[Vec<Vec<(Address, CallOutcome)>>; N]> {
        let handler_index = create_indexes(&handlers);
        let groups: Vec<Vec<Call>> = handlers.into_iter().flatten().collect();
        let group_index = create_indexes(&groups);
        let calls: Vec<Call> = groups.into_iter().flatten().collect();
        let outcomes = self
            .batcher
            .send_batch(calls)
            .await
            .context("batched aggregation failed")?;
        let groups = rebuild_from_index(outcomes, &group_index)?;
        rebuild_from_index(groups, &handler_index)?
            .try_into()
            .map_err(|_| anyhow!("handler count mismatch"))
    }

    async fn build_candidates(
        &self,
        pairs: &[AnchorConverterPair],
        converter_groups: &[Vec<(Address, CallOutcome)>],
        anchor_groups: &[Vec<(Address, CallOutcome)>],
    ) -> Result<Vec<Candidate>> {
        let mut raw: Vec<(AnchorConverterPair, RawConverter, RawAnchor)> = Vec::new();
        for ((pair, converter_group), anchor_group) in
            pairs.iter().zip(converter_groups).zip(anchor_groups)
        {
            let converter = RawConverter::from_record(&decode_call_group(
                &converter_template(),
                converter_group,
            )?);
            let anchor =
                RawAnchor::from_record(&decode_call_group(&anchor_token_template(), anchor_group)?);
            raw.push((*pair, converter, anchor));
        }

        // Resolve token metadata for every referenced reserve up front, the
        // static registry first, one batched lookup for the rest.
        let unknown: Vec<Address> = raw
            .iter()
            .flat_map(|(_, converter, _)| {
                [converter.connector_token_1, converter.connector_token_2]
            })
            .flatten()
            .filter(|address| !self.network.known_tokens.contains_key(address))
            .unique()
            .collect();
        let fetched = if unknown.is_empty() {
            HashMap::new()
        } else {
            self.tokens.get_token_infos(&unknown).await
        };
        let reserve_token = |address: Address| -> Option<ReserveToken> {
            if let Some(known) = self.network.known_tokens.get(&address) {
                return Some(ReserveToken {
                    address,
                    symbol: known.symbol.clone(),
                    decimals: known.decimals,
                });
            }
            let info = fetched.get(&address)?;
            Some(ReserveToken {
                address,
                symbol: info.symbol.clone()?,
                decimals: info.decimals?,
            })
        };

        let mut candidates = Vec::new();
        for (pair, converter, anchor) in raw {
            let kind = classify_converter(converter.converter_type);
            if kind == ConverterKind::Unsupported {
                tracing::debug!(
                    converter = ?pair.converter,
                    discriminator = ?converter.converter_type,
                    "unsupported converter kind"
                );
                continue;
            }
            // Weighted converters anchor on a pool token container; an
            // anchor where poolTokens() reverts is a plain smart token and
            // contradicts the discriminator.
            if kind == ConverterKind::Weighted && anchor.pool_tokens.is_none() {
                tracing::warn!(
                    anchor = ?pair.anchor,
                    "weighted converter anchored on a plain smart token, dropping"
                );
                continue;
            }
            if converter.connector_token_count != Some(2) {
                tracing::warn!(
                    converter = ?pair.converter,
                    count = ?converter.connector_token_count,
                    "converter does not hold exactly two reserves, dropping"
                );
                continue;
            }
            let (Some(reserve_1), Some(reserve_2)) =
                (converter.connector_token_1, converter.connector_token_2)
            else {
                tracing::warn!(converter = ?pair.converter, "missing reserve addresses, dropping");
                continue;
            };
            let (Some(owner), Some(fee_ppm)) = (converter.owner, converter.conversion_fee) else {
                tracing::warn!(converter = ?pair.converter, "incomplete converter record, dropping");
                continue;
            };
            let (Some(symbol), Some(decimals)) = (anchor.symbol.clone(), anchor.decimals) else {
                tracing::warn!(anchor = ?pair.anchor, "anchor metadata missing, dropping");
                continue;
            };
            let (Some(reserve_1), Some(reserve_2)) =
                (reserve_token(reserve_1), reserve_token(reserve_2))
            else {
                tracing::warn!(
                    anchor = ?pair.anchor,
                    "reserve token metadata unresolved, dropping"
                );
                continue;
            };
            let version = self
                .network
                .version_overrides
                .get(&pair.converter)
                .copied()
                .or(converter.version)
                .unwrap_or_default();
            candidates.push(Candidate {
                pair,
                kind,
                version,
                owner,
                fee_ppm,
                reserves: [reserve_1, reserve_2],
                anchor: AnchorToken {
                    address: pair.anchor,
                    symbol,
                    decimals,
                },
            });
        }
        Ok(candidates)
    }

    fn finish_fixed(
        &self,
        candidate: &Candidate,
        raw: &RawReserveBalances,
    ) -> Option<FixedRatioPool> {
        let [Some(balance_1), Some(balance_2)] = raw.balances else {
            tracing::warn!(anchor = ?candidate.pair.anchor, "missing reserve balances, dropping");
            return None;
        };
        Some(FixedRatioPool {
            id: candidate.pair.anchor,
            converter: candidate.pair.converter,
            anchor: candidate.anchor.clone(),
            reserves: candidate.reserves.clone(),
            reserve_balances: [balance_1, balance_2],
            fee_ppm: candidate.fee_ppm,
            owner: candidate.owner,
            version: candidate.version,
        })
    }

    fn finish_weighted(
        &self,
        candidate: &Candidate,
        raw: &RawStakedBalances,
    ) -> Option<WeightedPool> {
        let (Some(primary), Some(_secondary)) = (raw.primary_reserve, raw.secondary_reserve)
        else {
            tracing::warn!(anchor = ?candidate.pair.anchor, "missing primary reserve, dropping");
            return None;
        };
        let Some((weight_primary, weight_secondary)) = raw.weights else {
            tracing::warn!(anchor = ?candidate.pair.anchor, "missing reserve weights, dropping");
            return None;
        };
        let [Some(staked_1), Some(staked_2)] = raw.staked_balances else {
            tracing::warn!(anchor = ?candidate.pair.anchor, "missing staked balances, dropping");
            return None;
        };
        let [Some(pool_token_1), Some(pool_token_2)] = raw.pool_tokens else {
            tracing::warn!(anchor = ?candidate.pair.anchor, "missing pool tokens, dropping");
            return None;
        };

        let [address_1, address_2] = candidate.reserve_addresses();
        if primary != address_1 && primary != address_2 {
            tracing::warn!(
                anchor = ?candidate.pair.anchor,
                ?primary,
                "primary reserve is not a converter reserve, dropping"
            );
            return None;
        }
        let weight_of = |reserve: Address| -> Option<u64> {
            let weight = if reserve == primary {
                weight_primary
            } else {
                weight_secondary
            };
            u64::try_from(weight).ok()
        };
        let weights = [weight_of(address_1)?, weight_of(address_2)?];
        if weights[0].checked_add(weights[1]) != Some(PPM) {
            tracing::warn!(
                anchor = ?candidate.pair.anchor,
                ?weights,
                "reserve weights do not sum to 100%, dropping"
            );
            return None;
        }

        let caps_enabled = raw.max_staked_enabled == Some(true);
        let cap = |max: Option<U256>| -> Option<U256> {
            max.filter(|max| caps_enabled && !max.is_zero())
        };

        let [reserve_1, reserve_2] = candidate.reserves.clone();
        Some(WeightedPool {
            id: candidate.pair.anchor,
            converter: candidate.pair.converter,
            anchor: candidate.anchor.clone(),
            reserves: [
                WeightedReserve {
                    token: reserve_1,
                    pool_token: pool_token_1,
                    staked_balance: staked_1,
                    weight_ppm: weights[0],
                    max_staked_balance: cap(raw.max_staked[0]),
                },
                WeightedReserve {
                    token: reserve_2,
                    pool_token: pool_token_2,
                    staked_balance: staked_2,
                    weight_ppm: weights[1],
                    max_staked_balance: cap(raw.max_staked[1]),
                },
            ],
            fee_ppm: candidate.fee_ppm,
            owner: candidate.owner,
            version: candidate.version,
        })
    }
}
