//! Adaptive call batching. Large batches are split according to a descending
//! chunk-size strategy list; a chunk that fails wholesale (node limits, gas
//! cap) is retried at the next smaller size until the list is exhausted.

use {
    crate::multicall::{AggregationEndpoint, Call, CallOutcome},
    alloy_primitives::Address,
    futures::{
        FutureExt,
        future::{BoxFuture, join_all},
    },
    std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Chunk sizes tried in order. The first entry effectively means "everything
/// at once" for realistic batch sizes.
pub const DEFAULT_CHUNK_STRATEGIES: [usize; 5] = [5000, 150, 45, 15, 5];

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("aggregation exhausted after chunk sizes {0:?}")]
    Exhausted(Vec<usize>),
    #[error("expected {expected} outcomes, got {got}")]
    LengthMismatch { expected: usize, got: usize },
}

pub struct CallBatcher {
    endpoint: Arc<dyn AggregationEndpoint>,
    strategies: Vec<usize>,
    /// Smallest chunk size any batch had to fall back to, for observability.
    min_fallback: AtomicUsize,
}

impl CallBatcher {
    pub fn new(endpoint: Arc<dyn AggregationEndpoint>, strategies: Vec<usize>) -> Self {
        Self {
            endpoint,
            strategies,
            min_fallback: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn with_default_strategies(endpoint: Arc<dyn AggregationEndpoint>) -> Self {
        Self::new(endpoint, DEFAULT_CHUNK_STRATEGIES.to_vec())
    }

    /// Executes all calls, in as few round trips as the node permits, and
    /// returns the outcomes paired with the call targets, position for
    /// position in input order.
    pub async fn send_batch(
        &self,
        calls: Vec<Call>,
    ) -> Result<Vec<(Address, CallOutcome)>, BatchError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let outcomes = self.send_chunked(&calls, &self.strategies).await?;
        if outcomes.len() != calls.len() {
            return Err(BatchError::LengthMismatch {
                expected: calls.len(),
                got: outcomes.len(),
            });
        }
        Ok(calls
            .into_iter()
            .map(|call| call.target)
            .zip(outcomes)
            .collect())
    }

    /// Smallest chunk size any aggregation had to fall back to so far, `None`
    /// if the first strategy always sufficed.
    pub fn smallest_fallback(&self) -> Option<usize> {
        match self.min_fallback.load(Ordering::SeqCst) {
            usize::MAX => None,
            size => Some(size),
        }
    }

    fn send_chunked<'a>(
        &'a self,
        calls: &'a [Call],
        strategies: &'a [usize],
    ) -> BoxFuture<'a, Result<Vec<CallOutcome>, BatchError>> {
        async move {
            let Some((&size, rest)) = strategies.split_first() else {
                return Err(BatchError::Exhausted(self.strategies.clone()));
            };
            let chunks: Vec<&[Call]> = calls.chunks(size.max(1)).collect();
            let results = join_all(
                chunks
                    .iter()
                    .map(|chunk| self.endpoint.aggregate(chunk, false)),
            )
            .await;

            let mut outcomes = Vec::with_capacity(calls.len());
            for (chunk, result) in chunks.into_iter().zip(results) {
                match result {
                    Ok(chunk_outcomes) => outcomes.extend(chunk_outcomes),
                    Err(err) if rest.is_empty() => {
                        tracing::error!(%err, size, "aggregation exhausted");
                        return Err(BatchError::Exhausted(self.strategies.clone()));
                    }
                    Err(err) => {
                        tracing::debug!(
                            %err,
                            from = size,
                            to = rest[0],
                            "chunk failed, retrying at smaller size"
                        );
                        self.min_fallback.fetch_min(rest[0], Ordering::SeqCst);
                        outcomes.extend(self.send_chunked(chunk, rest).await?);
                    }
                }
            }
            Ok(outcomes)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::http::TransportError,
        alloy_primitives::Bytes,
        std::sync::atomic::AtomicUsize,
    };

    /// Endpoint that echoes each call's data and rejects any chunk larger
    /// than `max_chunk` or containing the poison target.
    struct FakeEndpoint {
        max_chunk: usize,
        poison: Option<Address>,
        aggregations: AtomicUsize,
    }

    impl FakeEndpoint {
        fn new(max_chunk: usize) -> Self {
            Self {
                max_chunk,
                poison: None,
                aggregations: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl AggregationEndpoint for FakeEndpoint {
        async fn aggregate(
            &self,
            calls: &[Call],
            _strict: bool,
        ) -> Result<Vec<CallOutcome>, TransportError> {
            self.aggregations.fetch_add(1, Ordering::SeqCst);
            if calls.len() > self.max_chunk {
                return Err(TransportError::Transport("out of gas".into()));
            }
            if let Some(poison) = self.poison {
                if calls.iter().any(|call| call.target == poison) {
                    return Err(TransportError::Transport("node error".into()));
                }
            }
            Ok(calls
                .iter()
                .map(|call| CallOutcome {
                    success: true,
                    data: call.data.clone(),
                })
                .collect())
        }
    }

    fn calls(n: usize) -> Vec<Call> {
        (0..n)
            .map(|i| Call {
                target: Address::repeat_byte(u8::try_from(i + 1).unwrap()),
                data: Bytes::from(vec![u8::try_from(i).unwrap()]),
            })
            .collect()
    }

    #[tokio::test]
    async fn preserves_input_order_across_chunks() {
        let batcher = CallBatcher::new(Arc::new(FakeEndpoint::new(2)), vec![2]);
        let results = batcher.send_batch(calls(5)).await.unwrap();
        for (i, (target, outcome)) in results.iter().enumerate() {
            assert_eq!(*target, Address::repeat_byte(u8::try_from(i + 1).unwrap()));
            assert_eq!(outcome.data.as_ref(), [u8::try_from(i).unwrap()]);
        }
        assert_eq!(batcher.smallest_fallback(), None);
    }

    #[tokio::test]
    async fn falls_back_to_smaller_chunks() {
        let batcher = CallBatcher::new(Arc::new(FakeEndpoint::new(2)), vec![4, 2]);
        let results = batcher.send_batch(calls(8)).await.unwrap();
        assert_eq!(results.len(), 8);
        for (i, (_, outcome)) in results.iter().enumerate() {
            assert_eq!(outcome.data.as_ref(), [u8::try_from(i).unwrap()]);
        }
        assert_eq!(batcher.smallest_fallback(), Some(2));
    }

    #[tokio::test]
    async fn only_failing_chunk_falls_back() {
        let endpoint = Arc::new(FakeEndpoint {
            max_chunk: usize::MAX,
            poison: Some(Address::repeat_byte(1)),
            aggregations: AtomicUsize::new(0),
        });
        let batcher = CallBatcher::new(endpoint.clone(), vec![2, 1, 1]);
        // The poison target sits in the first chunk, so only that chunk is
        // retried at size 1, and the poison call alone keeps failing until
        // exhaustion.
        let result = batcher.send_batch(calls(4)).await;
        assert!(matches!(result, Err(BatchError::Exhausted(_))));
    }

    #[tokio::test]
    async fn exhaustion_is_fatal() {
        let batcher = CallBatcher::new(Arc::new(FakeEndpoint::new(0)), vec![4, 2, 1]);
        let result = batcher.send_batch(calls(4)).await;
        assert!(matches!(result, Err(BatchError::Exhausted(sizes)) if sizes == vec![4, 2, 1]));
        assert_eq!(batcher.smallest_fallback(), Some(1));
    }

    #[tokio::test]
    async fn empty_batch_skips_the_endpoint() {
        let endpoint = Arc::new(FakeEndpoint::new(10));
        let batcher = CallBatcher::with_default_strategies(endpoint.clone());
        assert!(batcher.send_batch(Vec::new()).await.unwrap().is_empty());
        assert_eq!(endpoint.aggregations.load(Ordering::SeqCst), 0);
    }
}
