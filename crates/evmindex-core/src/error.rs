//! Error types for the EVM transaction index.

use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur while indexing or querying.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// The atomic batch for a block could not be committed. Nothing from the
    /// block is visible; the caller should retry the whole block.
    #[error("IndexBlock {height}, write batch: {source}")]
    Commit {
        height: i64,
        #[source]
        source: StoreError,
    },

    #[error("wrong tx index key length, expect: {expected}, got: {got}")]
    MalformedKey { expected: usize, got: usize },

    #[error("malformed tx result value: {0}")]
    MalformedValue(String),

    #[error("tx decode error: {0}")]
    Decode(String),

    #[error("event parse error: {0}")]
    EventParse(String),

    #[error("block {height} has {txs} txs but {results} results")]
    ResultCountMismatch {
        height: i64,
        txs: usize,
        results: usize,
    },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("{operation} timed out after {ms}ms")]
    Timeout { operation: String, ms: u64 },

    #[error("indexer aborted: {reason}")]
    Aborted { reason: String },
}

impl IndexerError {
    /// Returns `true` for failures that a later attempt at the same height
    /// may not hit again (network, timeout, storage).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Rpc(_) | Self::Timeout { .. } | Self::Commit { .. } | Self::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(IndexerError::Rpc("connection refused".into()).is_retryable());
        assert!(IndexerError::Timeout { operation: "block 7".into(), ms: 10 }.is_retryable());
        assert!(!IndexerError::MalformedKey { expected: 17, got: 3 }.is_retryable());
        assert!(!IndexerError::Decode("bad proto".into()).is_retryable());
    }

    #[test]
    fn commit_error_names_height() {
        let err = IndexerError::Commit { height: 42, source: StoreError::Closed };
        assert!(err.to_string().contains("IndexBlock 42"));
    }
}
