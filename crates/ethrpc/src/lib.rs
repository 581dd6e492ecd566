//! Minimal Ethereum JSON-RPC plumbing: an HTTP transport, the on-chain call
//! aggregation contract endpoint, and an adaptive call batcher.

pub mod batch;
pub mod http;
pub mod multicall;

pub use {
    batch::{BatchError, CallBatcher, DEFAULT_CHUNK_STRATEGIES},
    http::{HttpTransport, TransportError},
    multicall::{AggregationEndpoint, Call, CallOutcome, MulticallEndpoint},
};
#[cfg(any(test, feature = "test-util"))]
pub use multicall::MockAggregationEndpoint;
