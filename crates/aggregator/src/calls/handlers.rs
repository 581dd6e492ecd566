//! The call templates of the pool assembly pipeline and their typed decoded
//! records. One record per contract; every field is optional because any
//! individual call may revert on older contract versions.

use {
    crate::calls::{
        codec::DecodedRecord,
        template::{CallTemplate, MethodCall, field},
    },
    alloy_dyn_abi::{DynSolType, DynSolValue},
    alloy_primitives::{Address, U256},
};

/// Converter metadata probed in the first assembly round.
pub fn converter_template() -> CallTemplate {
    CallTemplate {
        fields: vec![
            field(
                "owner",
                MethodCall::new("owner()", vec![], vec![DynSolType::Address]),
            ),
            field(
                "converter_type",
                MethodCall::new("converterType()", vec![], vec![DynSolType::Uint(16)]),
            ),
            field(
                "version",
                MethodCall::new("version()", vec![], vec![DynSolType::Uint(16)]),
            ),
            field(
                "connector_token_count",
                MethodCall::new("connectorTokenCount()", vec![], vec![DynSolType::Uint(16)]),
            ),
            field(
                "conversion_fee",
                MethodCall::new("conversionFee()", vec![], vec![DynSolType::Uint(32)]),
            ),
            field(
                "connector_token_1",
                MethodCall::new(
                    "connectorTokens(uint256)",
                    vec![DynSolValue::Uint(U256::ZERO, 256)],
                    vec![DynSolType::Address],
                ),
            ),
            field(
                "connector_token_2",
                MethodCall::new(
                    "connectorTokens(uint256)",
                    vec![DynSolValue::Uint(U256::from(1_u64), 256)],
                    vec![DynSolType::Address],
                ),
            ),
        ],
    }
}

/// Anchor token metadata. `poolTokens()` only exists on weighted pool
/// containers and reverts on plain smart tokens, which is how the two anchor
/// flavors are told apart.
pub fn anchor_token_template() -> CallTemplate {
    CallTemplate {
        fields: vec![
            field(
                "symbol",
                MethodCall::new("symbol()", vec![], vec![DynSolType::String]),
            ),
            field(
                "decimals",
                MethodCall::new("decimals()", vec![], vec![DynSolType::Uint(8)]),
            ),
            field(
                "pool_tokens",
                MethodCall::new(
                    "poolTokens()",
                    vec![],
                    vec![DynSolType::Array(Box::new(DynSolType::Address))],
                ),
            ),
        ],
    }
}

/// Plain ERC-20 metadata for reserve tokens missing from the static registry.
pub fn token_template() -> CallTemplate {
    CallTemplate {
        fields: vec![
            field(
                "symbol",
                MethodCall::new("symbol()", vec![], vec![DynSolType::String]),
            ),
            field(
                "decimals",
                MethodCall::new("decimals()", vec![], vec![DynSolType::Uint(8)]),
            ),
        ],
    }
}

/// Reserve balances of a fixed-ratio converter.
pub fn reserve_balance_template(reserves: [Address; 2]) -> CallTemplate {
    CallTemplate {
        fields: vec![
            field(
                "balance_1",
                MethodCall::new(
                    "getConnectorBalance(address)",
                    vec![DynSolValue::Address(reserves[0])],
                    vec![DynSolType::Uint(256)],
                ),
            ),
            field(
                "balance_2",
                MethodCall::new(
                    "getConnectorBalance(address)",
                    vec![DynSolValue::Address(reserves[1])],
                    vec![DynSolType::Uint(256)],
                ),
            ),
        ],
    }
}

/// Staked balances, effective weights and staking caps of a weighted
/// converter.
pub fn staked_balance_template(reserves: [Address; 2]) -> CallTemplate {
    CallTemplate {
        fields: vec![
            field(
                "primary_reserve",
                MethodCall::new("primaryReserveToken()", vec![], vec![DynSolType::Address]),
            ),
            field(
                "secondary_reserve",
                MethodCall::new("secondaryReserveToken()", vec![], vec![DynSolType::Address]),
            ),
            field(
                "pool_token_1",
                MethodCall::new(
                    "poolToken(address)",
                    vec![DynSolValue::Address(reserves[0])],
                    vec![DynSolType::Address],
                ),
            ),
            field(
                "pool_token_2",
                MethodCall::new(
                    "poolToken(address)",
                    vec![DynSolValue::Address(reserves[1])],
                    vec![DynSolType::Address],
                ),
            ),
            field(
                "staked_balance_1",
                MethodCall::new(
                    "reserveStakedBalance(address)",
                    vec![DynSolValue::Address(reserves[0])],
                    vec![DynSolType::Uint(256)],
                ),
            ),
            field(
                "staked_balance_2",
                MethodCall::new(
                    "reserveStakedBalance(address)",
                    vec![DynSolValue::Address(reserves[1])],
                    vec![DynSolType::Uint(256)],
                ),
            ),
            field(
                "effective_weights",
                MethodCall::new(
                    "effectiveReserveWeights()",
                    vec![],
                    vec![DynSolType::Uint(256), DynSolType::Uint(256)],
                ),
            ),
            field(
                "max_staked_enabled",
                MethodCall::new("maxStakedBalanceEnabled()", vec![], vec![DynSolType::Bool]),
            ),
            field(
                "max_staked_1",
                MethodCall::new(
                    "maxStakedBalances(address)",
                    vec![DynSolValue::Address(reserves[0])],
                    vec![DynSolType::Uint(256)],
                ),
            ),
            field(
                "max_staked_2",
                MethodCall::new(
                    "maxStakedBalances(address)",
                    vec![DynSolValue::Address(reserves[1])],
                    vec![DynSolType::Uint(256)],
                ),
            ),
        ],
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawConverter {
    pub address: Address,
    pub owner: Option<Address>,
    pub converter_type: Option<u64>,
    pub version: Option<u64>,
    pub connector_token_count: Option<u64>,
    pub conversion_fee: Option<u64>,
    pub connector_token_1: Option<Address>,
    pub connector_token_2: Option<Address>,
}

impl RawConverter {
    pub fn from_record(record: &DecodedRecord) -> Self {
        Self {
            address: record.origin,
            owner: record.address("owner"),
            converter_type: record.small_uint("converter_type"),
            version: record.small_uint("version"),
            connector_token_count: record.small_uint("connector_token_count"),
            conversion_fee: record.small_uint("conversion_fee"),
            connector_token_1: record.address("connector_token_1"),
            connector_token_2: record.address("connector_token_2"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawAnchor {
    pub address: Address,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
    pub pool_tokens: Option<Vec<Address>>,
}

impl RawAnchor {
    pub fn from_record(record: &DecodedRecord) -> Self {
        Self {
            address: record.origin,
            symbol: record.string("symbol"),
            decimals: record
                .small_uint("decimals")
                .and_then(|value| u8::try_from(value).ok()),
            pool_tokens: record.address_array("pool_tokens"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawToken {
    pub address: Address,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

impl RawToken {
    pub fn from_record(record: &DecodedRecord) -> Self {
        Self {
            address: record.origin,
            symbol: record.string("symbol"),
            decimals: record
                .small_uint("decimals")
                .and_then(|value| u8::try_from(value).ok()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawReserveBalances {
    pub converter: Address,
    pub balances: [Option<U256>; 2],
}

impl RawReserveBalances {
    pub fn from_record(record: &DecodedRecord) -> Self {
        Self {
            converter: record.origin,
            balances: [record.uint("balance_1"), record.uint("balance_2")],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawStakedBalances {
    pub converter: Address,
    pub primary_reserve: Option<Address>,
    pub secondary_reserve: Option<Address>,
    pub pool_tokens: [Option<Address>; 2],
    pub staked_balances: [Option<U256>; 2],
    pub weights: Option<(U256, U256)>,
    pub max_staked_enabled: Option<bool>,
    pub max_staked: [Option<U256>; 2],
}

impl RawStakedBalances {
    pub fn from_record(record: &DecodedRecord) -> Self {
        Self {
            converter: record.origin,
            primary_reserve: record.address("primary_reserve"),
            secondary_reserve: record.address("secondary_reserve"),
            pool_tokens: [record.address("pool_token_1"), record.address("pool_token_2")],
            staked_balances: [
                record.uint("staked_balance_1"),
                record.uint("staked_balance_2"),
            ],
            weights: record.uint_pair("effective_weights"),
            max_staked_enabled: record.boolean("max_staked_enabled"),
            max_staked: [record.uint("max_staked_1"), record.uint("max_staked_2")],
        }
    }
}
