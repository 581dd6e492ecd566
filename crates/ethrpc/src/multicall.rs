//! The on-chain call aggregation contract. A single `eth_call` against it
//! executes many sub-calls and reports a per-call success flag and payload,
//! so individual reverts never fail the whole batch.

use {
    crate::http::{HttpTransport, TransportError},
    alloy_dyn_abi::{DynSolType, DynSolValue},
    alloy_primitives::{Address, Bytes, keccak256},
};

/// A single sub-call to aggregate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Call {
    pub target: Address,
    pub data: Bytes,
}

/// The outcome of one aggregated sub-call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallOutcome {
    pub success: bool,
    pub data: Bytes,
}

impl CallOutcome {
    /// Returns the payload of a successful call, `None` for a reverted one.
    pub fn into_success(self) -> Option<Bytes> {
        self.success.then_some(self.data)
    }
}

/// Something that can execute a batch of calls in one round trip.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait AggregationEndpoint: Send + Sync + 'static {
    /// Executes all calls against the same block. With `strict` set the whole
    /// aggregation reverts if any sub-call reverts; otherwise failures are
    /// reported per call.
    async fn aggregate(
        &self,
        calls: &[Call],
        strict: bool,
    ) -> Result<Vec<CallOutcome>, TransportError>;
}

/// [`AggregationEndpoint`] backed by a deployed multicall contract.
pub struct MulticallEndpoint {
    transport: HttpTransport,
    address: Address,
}

const AGGREGATE_SIGNATURE: &str = "aggregate((address,bytes)[],bool)";

impl MulticallEndpoint {
    pub fn new(transport: HttpTransport, address: Address) -> Self {
        Self { transport, address }
    }

    fn encode(calls: &[Call], strict: bool) -> Vec<u8> {
        let args = DynSolValue::Tuple(vec![
            DynSolValue::Array(
                calls
                    .iter()
                    .map(|call| {
                        DynSolValue::Tuple(vec![
                            DynSolValue::Address(call.target),
                            DynSolValue::Bytes(call.data.to_vec()),
                        ])
                    })
                    .collect(),
            ),
            DynSolValue::Bool(strict),
        ]);
        let selector = &keccak256(AGGREGATE_SIGNATURE.as_bytes())[..4];
        [selector, &args.abi_encode_params()].concat()
    }

    fn decode(output: &[u8], expected: usize) -> Result<Vec<CallOutcome>, TransportError> {
        let return_type = DynSolType::Tuple(vec![
            DynSolType::Uint(256),
            DynSolType::Array(Box::new(DynSolType::Tuple(vec![
                DynSolType::Bool,
                DynSolType::Bytes,
            ]))),
        ]);
        let decoded = return_type
            .abi_decode_params(output)
            .map_err(|err| TransportError::Decoder(format!("aggregate return data: {err}")))?;
        let DynSolValue::Tuple(mut fields) = decoded else {
            return Err(TransportError::Decoder("aggregate return is not a tuple".into()));
        };
        let Some(DynSolValue::Array(entries)) = fields.pop() else {
            return Err(TransportError::Decoder("aggregate return misses outcomes".into()));
        };
        if entries.len() != expected {
            return Err(TransportError::Decoder(format!(
                "aggregate returned {} outcomes for {expected} calls",
                entries.len(),
            )));
        }
        entries
            .into_iter()
            .map(|entry| match entry {
                DynSolValue::Tuple(entry) => match entry.as_slice() {
                    [DynSolValue::Bool(success), DynSolValue::Bytes(data)] => Ok(CallOutcome {
                        success: *success,
                        data: data.clone().into(),
                    }),
                    _ => Err(TransportError::Decoder("malformed outcome tuple".into())),
                },
                _ => Err(TransportError::Decoder("outcome is not a tuple".into())),
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl AggregationEndpoint for MulticallEndpoint {
    async fn aggregate(
        &self,
        calls: &[Call],
        strict: bool,
    ) -> Result<Vec<CallOutcome>, TransportError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let data = Self::encode(calls, strict);
        let output = self.transport.call(self.address, &data).await?;
        Self::decode(&output, calls.len())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, alloy_primitives::U256, hex_literal::hex};

    fn calls() -> Vec<Call> {
        vec![
            Call {
                target: Address::repeat_byte(0x11),
                data: hex!("06fdde03").into(),
            },
            Call {
                target: Address::repeat_byte(0x22),
                data: hex!("313ce567").into(),
            },
        ]
    }

    #[test]
    fn encoding_starts_with_selector() {
        let data = MulticallEndpoint::encode(&calls(), false);
        assert_eq!(
            &data[..4],
            &keccak256("aggregate((address,bytes)[],bool)".as_bytes())[..4],
        );
        // Calldata is word aligned after the selector.
        assert_eq!((data.len() - 4) % 32, 0);
    }

    #[test]
    fn decodes_outcomes_positionally() {
        let encoded = DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(1337_u64), 256),
            DynSolValue::Array(vec![
                DynSolValue::Tuple(vec![
                    DynSolValue::Bool(true),
                    DynSolValue::Bytes(vec![0xab, 0xcd]),
                ]),
                DynSolValue::Tuple(vec![
                    DynSolValue::Bool(false),
                    DynSolValue::Bytes(Vec::new()),
                ]),
            ]),
        ])
        .abi_encode_params();

        let outcomes = MulticallEndpoint::decode(&encoded, 2).unwrap();
        assert_eq!(
            outcomes,
            vec![
                CallOutcome {
                    success: true,
                    data: vec![0xab, 0xcd].into(),
                },
                CallOutcome {
                    success: false,
                    data: Bytes::new(),
                },
            ],
        );
    }

    #[test]
    fn rejects_outcome_count_mismatch() {
        let encoded = DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::ZERO, 256),
            DynSolValue::Array(vec![DynSolValue::Tuple(vec![
                DynSolValue::Bool(true),
                DynSolValue::Bytes(Vec::new()),
            ])]),
        ])
        .abi_encode_params();

        assert!(MulticallEndpoint::decode(&encoded, 2).is_err());
    }

    #[test]
    fn outcome_success_payload() {
        let ok = CallOutcome {
            success: true,
            data: vec![1].into(),
        };
        let reverted = CallOutcome {
            success: false,
            data: vec![1].into(),
        };
        assert_eq!(ok.into_success(), Some(vec![1].into()));
        assert_eq!(reverted.into_success(), None);
    }
}
