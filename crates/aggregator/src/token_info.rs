//! Symbol/decimals resolution for reserve tokens that are missing from the
//! static token registry, batched through the aggregation endpoint and
//! memoized with single-flight caching.

use {
    crate::calls::{
        build_call_groups,
        codec::decode_call_group,
        create_indexes,
        handlers::{RawToken, token_template},
        rebuild_from_index,
    },
    alloy_primitives::Address,
    async_trait::async_trait,
    ethrpc::CallBatcher,
    futures::{
        FutureExt,
        future::{BoxFuture, Shared},
    },
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    },
    thiserror::Error,
};

#[cfg_attr(test, derive(Eq, PartialEq))]
#[derive(Clone, Debug, Default)]
pub struct TokenInfo {
    pub decimals: Option<u8>,
    pub symbol: Option<String>,
}

#[derive(Clone, Debug, Error)]
#[error("error fetching token info: {0}")]
pub struct Error(pub String);

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait TokenInfoFetching: Send + Sync {
    /// Retrieves information for a token.
    async fn get_token_info(&self, address: Address) -> Result<TokenInfo, Error>;

    /// Retrieves all token information, ignoring per-token errors.
    async fn get_token_infos(&self, addresses: &[Address]) -> HashMap<Address, TokenInfo>;
}

pub struct TokenInfoFetcher {
    batcher: Arc<CallBatcher>,
}

impl TokenInfoFetcher {
    pub fn new(batcher: Arc<CallBatcher>) -> Self {
        Self { batcher }
    }

    async fn fetch_tokens(
        &self,
        addresses: &[Address],
    ) -> Result<HashMap<Address, TokenInfo>, Error> {
        let template = token_template();
        let entities: Vec<_> = addresses
            .iter()
            .map(|address| (*address, template.clone()))
            .collect();
        let groups = build_call_groups(&entities).map_err(|err| Error(err.to_string()))?;
        let index = create_indexes(&groups);
        let calls = groups.into_iter().flatten().collect();
        let outcomes = self
            .batcher
            .send_batch(calls)
            .await
            .map_err(|err| Error(err.to_string()))?;
        let groups =
            rebuild_from_index(outcomes, &index).map_err(|err| Error(err.to_string()))?;

        groups
            .iter()
            .map(|group| {
                let record =
                    decode_call_group(&template, group).map_err(|err| Error(err.to_string()))?;
                let raw = RawToken::from_record(&record);
                Ok((
                    raw.address,
                    TokenInfo {
                        decimals: raw.decimals,
                        symbol: raw.symbol,
                    },
                ))
            })
            .collect()
    }
}

#[async_trait]
impl TokenInfoFetching for TokenInfoFetcher {
    async fn get_token_info(&self, address: Address) -> Result<TokenInfo, Error> {
        let mut infos = self.fetch_tokens(std::slice::from_ref(&address)).await?;
        infos
            .remove(&address)
            .ok_or_else(|| Error("token missing from batch response".to_string()))
    }

    async fn get_token_infos(&self, addresses: &[Address]) -> HashMap<Address, TokenInfo> {
        match self.fetch_tokens(addresses).await {
            Ok(infos) => infos,
            Err(err) => {
                tracing::debug!(?err, "failed to fetch token infos");
                addresses
                    .iter()
                    .map(|address| (*address, TokenInfo::default()))
                    .collect()
            }
        }
    }
}

type SharedTokenInfo = Shared<BoxFuture<'static, Result<TokenInfo, Error>>>;

/// Memoizing wrapper. Concurrent lookups of the same token share one
/// in-flight fetch; failed fetches are evicted so they can be retried.
pub struct CachedTokenInfoFetcher {
    inner: Arc<dyn TokenInfoFetching>,
    cache: Arc<Mutex<HashMap<Address, SharedTokenInfo>>>,
}

impl CachedTokenInfoFetcher {
    pub fn new(inner: Arc<dyn TokenInfoFetching>) -> Self {
        Self {
            inner,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn fetch_token(&self, address: Address) -> Result<TokenInfo, Error> {
        let fetch = {
            let mut cache = self.cache.lock().unwrap();
            cache
                .entry(address)
                .or_insert({
                    let inner = self.inner.clone();
                    async move { inner.get_token_info(address).await }
                        .boxed()
                        .shared()
                })
                .clone()
        };

        let info = fetch.await;
        if info.is_err() {
            let mut cache = self.cache.lock().unwrap();
            if let Some(Err(_)) = cache.get(&address).and_then(|fetch| fetch.peek()) {
                cache.remove(&address);
            }
        }

        info
    }
}

#[async_trait]
impl TokenInfoFetching for CachedTokenInfoFetcher {
    async fn get_token_info(&self, address: Address) -> Result<TokenInfo, Error> {
        self.fetch_token(address).await
    }

    async fn get_token_infos(&self, addresses: &[Address]) -> HashMap<Address, TokenInfo> {
        futures::future::join_all(addresses.iter().copied().map(|address| async move {
            (
                address,
                self.get_token_info(address).await.unwrap_or_default(),
            )
        }))
        .await
        .into_iter()
        .collect()
    }
}
