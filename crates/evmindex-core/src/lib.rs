//! evmindex-core — the EVM transaction index.
//!
//! # Architecture
//!
//! ```text
//! (Block, [ConsensusTxResult]) → EvmTxIndexer::index_block
//!                                   ├── TxClassifier  (is the result worth indexing)
//!                                   ├── TxDecoder     (Ethereum carrier or not)
//!                                   ├── EventParser   (per-message gas / failure)
//!                                   ├── keys          (fixed-width ordered keys)
//!                                   └── KvStore       (atomic batch commit)
//! ```

pub mod abci;
pub mod error;
pub mod indexer;
pub mod keys;
pub mod store;
pub mod tx;
pub mod types;

pub use abci::{AbciEventParser, AbciValidity, Eligibility, EventParser, ParsedTx, ParsedTxs, TxClassifier};
pub use error::IndexerError;
pub use indexer::{EvmTxIndexer, EMPTY_INDEX};
pub use store::{KvStore, MemoryKvStore, ScanDirection, StoreError, WriteBatch};
pub use tx::{CosmosTxDecoder, DecodedTx, EthMsg, EthTx, TxDecoder, TxMsg};
pub use types::{AbciEvent, Block, ConsensusTxResult, EventAttribute, TxResult};

pub use alloy_primitives::B256;
