//! External collaborators of the aggregation core: the on-chain converter
//! registry, contract name resolution, the persisted anchor/converter cache
//! and the USD reference price source.

use {
    crate::calls::template::MethodCall,
    alloy_dyn_abi::{DynSolType, DynSolValue},
    alloy_primitives::{Address, FixedBytes},
    anyhow::{Context, Result, bail, ensure},
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    std::{sync::Mutex, time::Duration},
};

/// An anchor and the converter currently responsible for it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AnchorConverterPair {
    pub anchor: Address,
    pub converter: Address,
}

/// Read access to the on-chain converter registry.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait ConverterDiscovery: Send + Sync {
    /// All registered anchor addresses.
    async fn anchors(&self) -> Result<Vec<Address>>;

    /// Resolves the current converter of each anchor, positionally.
    async fn converters_by_anchors(&self, anchors: &[Address]) -> Result<Vec<Address>>;

    /// Anchors of every pool in which `token` is convertible.
    async fn anchors_containing(&self, token: Address) -> Result<Vec<Address>>;
}

pub struct OnchainDiscovery {
    transport: ethrpc::HttpTransport,
    registry: Address,
}

impl OnchainDiscovery {
    pub fn new(transport: ethrpc::HttpTransport, registry: Address) -> Self {
        Self {
            transport,
            registry,
        }
    }

    async fn query(&self, method: MethodCall) -> Result<DynSolValue> {
        let output = self
            .transport
            .call(self.registry, &method.encode())
            .await
            .with_context(|| format!("registry call {}", method.signature))?;
        method.decode_returns(&output)
    }

    fn address_array(value: DynSolValue) -> Result<Vec<Address>> {
        let Some(values) = value.as_array() else {
            bail!("registry returned a non-array value");
        };
        values
            .iter()
            .map(|value| value.as_address().context("array element is not an address"))
            .collect()
    }
}

#[async_trait]
impl ConverterDiscovery for OnchainDiscovery {
    async fn anchors(&self) -> Result<Vec<Address>> {
        let value = self
            .query(MethodCall::new(
                "getAnchors()",
                vec![],
                vec![DynSolType::Array(Box::new(DynSolType::Address))],
            ))
            .await?;
        Self::address_array(value)
    }

    async fn converters_by_anchors(&self, anchors: &[Address]) -> Result<Vec<Address>> {
        let value = self
            .query(MethodCall::new(
                "getConvertersByAnchors(address[])",
                vec![DynSolValue::Array(
                    anchors.iter().copied().map(DynSolValue::Address).collect(),
                )],
                vec![DynSolType::Array(Box::new(DynSolType::Address))],
            ))
            .await?;
        let converters = Self::address_array(value)?;
        ensure!(
            converters.len() == anchors.len(),
            "registry returned {} converters for {} anchors",
            converters.len(),
            anchors.len(),
        );
        Ok(converters)
    }

    async fn anchors_containing(&self, token: Address) -> Result<Vec<Address>> {
        let value = self
            .query(MethodCall::new(
                "getConvertibleTokenAnchors(address)",
                vec![DynSolValue::Address(token)],
                vec![DynSolType::Array(Box::new(DynSolType::Address))],
            ))
            .await?;
        Self::address_array(value)
    }
}

/// Left-pads an ASCII contract name into the `bytes32` the contract registry
/// keys on.
fn contract_name_key(name: &str) -> Result<FixedBytes<32>> {
    ensure!(name.len() <= 32, "contract name too long");
    let mut key = [0_u8; 32];
    key[..name.len()].copy_from_slice(name.as_bytes());
    Ok(FixedBytes(key))
}

/// Resolves a named contract through the contract registry, polling until
/// the name resolves to a non-zero address or the attempts run out.
pub async fn resolve_contract_address(
    transport: &ethrpc::HttpTransport,
    contract_registry: Address,
    name: &str,
    attempts: u32,
    interval: Duration,
) -> Result<Address> {
    let method = MethodCall::new(
        "addressOf(bytes32)",
        vec![DynSolValue::FixedBytes(contract_name_key(name)?, 32)],
        vec![DynSolType::Address],
    );
    let data = method.encode();
    for attempt in 1..=attempts {
        match transport.call(contract_registry, &data).await {
            Ok(output) => {
                if let Some(address) = method
                    .decode_returns(&output)
                    .ok()
                    .and_then(|value| value.as_address())
                    .filter(|address| !address.is_zero())
                {
                    return Ok(address);
                }
                tracing::debug!(name, attempt, "contract name resolves to zero");
            }
            Err(err) => {
                tracing::debug!(name, attempt, %err, "contract resolution attempt failed");
            }
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    bail!("failed to resolve contract {name} after {attempts} attempts")
}

/// Persistence for the anchor/converter pairs discovered in previous runs,
/// used to detect converter upgrades on startup.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
pub trait AnchorCache: Send + Sync {
    fn load(&self) -> Result<Vec<AnchorConverterPair>>;
    fn store(&self, pairs: &[AnchorConverterPair]) -> Result<()>;
}

/// Volatile cache, mostly useful in tests and single-shot runs.
#[derive(Default)]
pub struct InMemoryAnchorCache {
    pairs: Mutex<Vec<AnchorConverterPair>>,
}

impl AnchorCache for InMemoryAnchorCache {
    fn load(&self) -> Result<Vec<AnchorConverterPair>> {
        Ok(self.pairs.lock().unwrap().clone())
    }

    fn store(&self, pairs: &[AnchorConverterPair]) -> Result<()> {
        *self.pairs.lock().unwrap() = pairs.to_vec();
        Ok(())
    }
}

/// Source of the USD price of the primary network token.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait ReferencePrice: Send + Sync {
    async fn usd_price(&self) -> Result<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_name_key_is_left_aligned() {
        let key = contract_name_key("BancorConverterRegistry").unwrap();
        assert_eq!(&key[..23], b"BancorConverterRegistry");
        assert!(key[23..].iter().all(|byte| *byte == 0));
        assert!(contract_name_key(&"x".repeat(33)).is_err());
    }

    #[test]
    fn anchor_cache_round_trips() {
        let cache = InMemoryAnchorCache::default();
        assert!(cache.load().unwrap().is_empty());
        let pairs = vec![AnchorConverterPair {
            anchor: Address::repeat_byte(1),
            converter: Address::repeat_byte(2),
        }];
        cache.store(&pairs).unwrap();
        assert_eq!(cache.load().unwrap(), pairs);

        let snapshot = serde_json::to_string(&pairs).unwrap();
        let restored: Vec<AnchorConverterPair> = serde_json::from_str(&snapshot).unwrap();
        assert_eq!(restored, pairs);
    }
}
