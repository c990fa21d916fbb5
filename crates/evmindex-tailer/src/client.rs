//! The chain client port: everything the tailer and catch-up need from a node.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use evmindex_core::{Block, ConsensusTxResult, IndexerError};

/// Height range a node can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    /// Lowest height with block data (above zero on pruned nodes).
    pub earliest_height: i64,
    pub latest_height: i64,
}

/// New block heights, in the order the node announces them.
pub type HeaderStream = Pin<Box<dyn Stream<Item = Result<i64, IndexerError>> + Send>>;

/// Trait for fetching consensus data from a node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn status(&self) -> Result<ChainStatus, IndexerError>;

    async fn block(&self, height: i64) -> Result<Block, IndexerError>;

    /// Consensus results of every tx in the block at `height`, in block order.
    async fn block_results(&self, height: i64) -> Result<Vec<ConsensusTxResult>, IndexerError>;

    /// Subscribe to new block headers. The stream ends when the subscription
    /// is lost.
    async fn subscribe_new_headers(&self) -> Result<HeaderStream, IndexerError>;
}

/// Await `fut`, failing with a retryable [`IndexerError::Timeout`] after `limit`.
pub async fn with_timeout<T, F>(
    operation: impl Into<String>,
    limit: Duration,
    fut: F,
) -> Result<T, IndexerError>
where
    F: Future<Output = Result<T, IndexerError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(IndexerError::Timeout {
            operation: operation.into(),
            ms: limit.as_millis() as u64,
        }),
    }
}

/// Fetch a block and its consensus results, each bounded by `limit`.
pub async fn fetch_block_with_results<C: ChainClient + ?Sized>(
    client: &C,
    height: i64,
    limit: Duration,
) -> Result<(Block, Vec<ConsensusTxResult>), IndexerError> {
    let block = with_timeout(format!("block {height}"), limit, client.block(height)).await?;
    let results = with_timeout(
        format!("block_results {height}"),
        limit,
        client.block_results(height),
    )
    .await?;
    Ok((block, results))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_fetch_is_retryable_timeout() {
        let err = with_timeout("block 7", Duration::from_millis(10), async {
            futures::future::pending::<Result<(), IndexerError>>().await
        })
        .await
        .unwrap_err();

        assert!(matches!(err, IndexerError::Timeout { ms: 10, .. }));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "block 7 timed out after 10ms");
    }

    #[tokio::test]
    async fn completed_fetch_passes_through() {
        let v = with_timeout("status", Duration::from_secs(1), async { Ok(5) })
            .await
            .unwrap();
        assert_eq!(v, 5);
    }
}
