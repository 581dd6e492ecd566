//! Network variables and tunables, loadable from a TOML file.

use {
    alloy_primitives::Address,
    anyhow::{Context, Result},
    bigdecimal::BigDecimal,
    serde::Deserialize,
    std::{
        collections::{HashMap, HashSet},
        path::Path,
        str::FromStr,
        time::Duration,
    },
};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    #[serde(default)]
    pub settings: Settings,
}

/// Per-network contract addresses and token knowledge.
#[derive(Clone, Debug, Deserialize)]
pub struct NetworkConfig {
    /// The deployed call aggregation contract.
    pub multicall: Address,
    /// The contract registry used to resolve the converter registry by name.
    pub contract_registry: Address,
    /// Tokens every pool is expected to pair against, in preference order.
    pub network_tokens: Vec<Address>,
    /// Symbol of the USD-pegged network token, if one exists.
    #[serde(default = "default_usd_pegged_symbol")]
    pub usd_pegged_symbol: String,
    /// Static symbol/decimals knowledge, consulted before any on-chain
    /// token info lookup.
    #[serde(default)]
    pub known_tokens: HashMap<Address, KnownToken>,
    /// Converter versions that are known to misreport `version()` on chain.
    #[serde(default)]
    pub version_overrides: HashMap<Address, u64>,
    /// Anchors that are never assembled.
    #[serde(default)]
    pub blacklisted_anchors: HashSet<Address>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct KnownToken {
    pub symbol: String,
    pub decimals: u8,
}

fn default_usd_pegged_symbol() -> String {
    "USDB".to_string()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Descending multicall chunk sizes.
    pub chunk_strategies: Vec<usize>,
    /// How many anchor/converter pairs are assembled per multicall pipeline.
    pub pool_chunk: usize,
    /// Haircut applied to minted pool tokens in deposit quotes.
    pub fund_reward_haircut: BigDecimal,
    /// Multiplier turning a quoted withdrawal return into a minimum return.
    pub withdraw_slippage_buffer: BigDecimal,
    /// Fraction of the source reserve used as the clean-rate probe trade.
    pub probe_fraction: BigDecimal,
    /// Contract address resolution retries.
    pub resolution_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub resolution_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_strategies: ethrpc::DEFAULT_CHUNK_STRATEGIES.to_vec(),
            pool_chunk: 30,
            fund_reward_haircut: BigDecimal::from_str("0.99").unwrap(),
            withdraw_slippage_buffer: BigDecimal::from_str("0.98").unwrap(),
            probe_fraction: BigDecimal::from_str("0.00001").unwrap(),
            resolution_attempts: 10,
            resolution_interval: Duration::from_secs(2),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config: Config = toml::from_str(
            r#"
            [network]
            multicall = "0x5ba1e12693dc8f9c48aad8770482f4739beed696"
            contract_registry = "0x52ae12abe5d8bd778bd5397f99ca900624cfadd4"
            network_tokens = ["0x1f573d6fb3f13d689ff844b4ce37794d79a7ff1c"]
            usd_pegged_symbol = "USDB"

            [network.known_tokens.0x1f573d6fb3f13d689ff844b4ce37794d79a7ff1c]
            symbol = "BNT"
            decimals = 18

            [network.version_overrides]
            0x971e89e5202e2e4d4cb16bc89f742d151931559d = 41

            [settings]
            chunk_strategies = [150, 45, 15]
            pool_chunk = 10
            fund_reward_haircut = "0.99"
            withdraw_slippage_buffer = "0.98"
            probe_fraction = "0.00001"
            resolution_attempts = 3
            resolution_interval = "5s"
            "#,
        )
        .unwrap();

        assert_eq!(config.settings.pool_chunk, 10);
        assert_eq!(config.settings.chunk_strategies, vec![150, 45, 15]);
        assert_eq!(
            config.settings.resolution_interval,
            Duration::from_secs(5),
        );
        let bnt: Address = "0x1f573d6fb3f13d689ff844b4ce37794d79a7ff1c"
            .parse()
            .unwrap();
        assert_eq!(config.network.known_tokens[&bnt].decimals, 18);
        assert_eq!(config.network.network_tokens, vec![bnt]);
    }

    #[test]
    fn settings_default_when_omitted() {
        let config: Config = toml::from_str(
            r#"
            [network]
            multicall = "0x5ba1e12693dc8f9c48aad8770482f4739beed696"
            contract_registry = "0x52ae12abe5d8bd778bd5397f99ca900624cfadd4"
            network_tokens = []
            "#,
        )
        .unwrap();
        assert_eq!(config.settings.pool_chunk, 30);
        assert_eq!(
            config.settings.chunk_strategies,
            ethrpc::DEFAULT_CHUNK_STRATEGIES.to_vec(),
        );
        assert_eq!(config.network.usd_pegged_symbol, "USDB");
        assert!(config.network.blacklisted_anchors.is_empty());
    }
}
