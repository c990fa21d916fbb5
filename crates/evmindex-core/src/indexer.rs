//! The EVM transaction indexer.
//!
//! [`EvmTxIndexer::index_block`] turns one block plus its consensus results
//! into a single atomic batch of hash-key and index-key writes. Bad or
//! irrelevant transactions are skipped one at a time; only a failed commit
//! fails the block.

use std::sync::Arc;

use alloy_primitives::B256;
use prost::Message;
use tracing::{debug, error, info};

use crate::abci::{AbciEventParser, AbciValidity, EventParser, TxClassifier};
use crate::error::IndexerError;
use crate::keys::{
    parse_block_number_from_key, tx_hash_key, tx_index_key, tx_index_key_range,
};
use crate::store::{KvStore, ScanDirection, WriteBatch};
use crate::tx::{CosmosTxDecoder, DecodedTx, TxDecoder, TxMsg};
use crate::types::{tm_tx_hash, Block, ConsensusTxResult, TxResult};

/// Returned by [`EvmTxIndexer::first_indexed_block`] and
/// [`EvmTxIndexer::last_indexed_block`] when nothing is indexed yet.
pub const EMPTY_INDEX: i64 = -1;

/// Ethereum tx indexer over an ordered key-value store.
///
/// The indexer owns its store; share it behind an `Arc`.
pub struct EvmTxIndexer {
    store: Box<dyn KvStore>,
    classifier: Arc<dyn TxClassifier>,
    decoder: Arc<dyn TxDecoder>,
    parser: Arc<dyn EventParser>,
}

impl EvmTxIndexer {
    /// Create an indexer with the Cosmos SDK decoder and ABCI event rules.
    pub fn new(store: Box<dyn KvStore>) -> Self {
        Self {
            store,
            classifier: Arc::new(AbciValidity),
            decoder: Arc::new(CosmosTxDecoder),
            parser: Arc::new(AbciEventParser),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn TxClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn TxDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_event_parser(mut self, parser: Arc<dyn EventParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Index every Ethereum tx in `block`.
    ///
    /// `results[i]` must be the consensus result of `block.txs[i]`.
    pub async fn index_block(
        &self,
        block: &Block,
        results: &[ConsensusTxResult],
    ) -> Result<(), IndexerError> {
        let height = block.height;
        if block.txs.len() != results.len() {
            return Err(IndexerError::ResultCountMismatch {
                height,
                txs: block.txs.len(),
                results: results.len(),
            });
        }

        let mut batch = WriteBatch::new();
        // index among the eth txs indexed so far in this block
        let mut eth_tx_index: i32 = 0;

        for (tx_index, (raw, result)) in block.txs.iter().zip(results).enumerate() {
            let eligibility = self.classifier.classify(result);
            if !eligibility.is_eligible() {
                debug!(
                    reason = eligibility.reason(),
                    code = result.code,
                    gas_wanted = result.gas_wanted,
                    tm_tx_hash = %tm_tx_hash(raw),
                    "Skipped indexing of tx"
                );
                continue;
            }

            let tx = match self.decoder.decode(raw) {
                Ok(DecodedTx::Ethereum(tx)) => tx,
                Ok(DecodedTx::NotEthereum) => continue,
                Err(err) => {
                    error!(%err, height, tx_index, "Fail to decode tx");
                    continue;
                }
            };

            let parsed = match self.parser.parse(result, &tx) {
                Ok(parsed) => parsed,
                Err(err) => {
                    error!(%err, height, tx_index, "Fail to parse event");
                    continue;
                }
            };

            let mut cumulative_gas_used: u64 = 0;
            for (msg_index, msg) in tx.msgs.iter().enumerate() {
                let eth_msg = match msg {
                    TxMsg::Ethereum(m) => m,
                    TxMsg::Other { type_url } => {
                        debug!(height, tx_index, msg_index, %type_url, "Skipped non-ethereum msg");
                        continue;
                    }
                };

                let mut tx_result = TxResult {
                    height,
                    tx_index: tx_index as u32,
                    msg_index: msg_index as u32,
                    eth_tx_index,
                    ..Default::default()
                };

                if !result.is_ok() {
                    // rejected before execution: no granular event, the fee
                    // layer charged the full gas limit
                    tx_result.gas_used = eth_msg.gas_limit;
                    tx_result.failed = true;
                } else {
                    let Some(parsed_tx) = parsed.get_by_msg_index(msg_index) else {
                        error!(height, tx_index, msg_index, "msg index not found in events");
                        continue;
                    };
                    if parsed_tx.eth_tx_index >= 0 && parsed_tx.eth_tx_index != eth_tx_index {
                        error!(
                            expect = eth_tx_index,
                            found = parsed_tx.eth_tx_index,
                            height,
                            "eth tx index mismatch"
                        );
                    }
                    tx_result.gas_used = parsed_tx.gas_used;
                    tx_result.failed = parsed_tx.failed;
                }

                // wraps on overflow
                cumulative_gas_used = cumulative_gas_used.wrapping_add(tx_result.gas_used);
                tx_result.cumulative_gas_used = cumulative_gas_used;
                eth_tx_index += 1;

                stage_tx_result(&mut batch, &eth_msg.hash, &tx_result);
            }
        }

        let staged = batch.len() / 2;
        self.store
            .write(batch)
            .await
            .map_err(|source| IndexerError::Commit { height, source })?;

        let block_gas_used = results
            .iter()
            .fold(0i64, |acc, r| acc.saturating_add(r.gas_used));
        info!(height, eth_txs = staged, block_gas_used, "Indexed block");
        Ok(())
    }

    /// Highest indexed block height, or [`EMPTY_INDEX`].
    pub async fn last_indexed_block(&self) -> Result<i64, IndexerError> {
        self.boundary_block(ScanDirection::Reverse).await
    }

    /// Lowest indexed block height, or [`EMPTY_INDEX`].
    pub async fn first_indexed_block(&self) -> Result<i64, IndexerError> {
        self.boundary_block(ScanDirection::Forward).await
    }

    async fn boundary_block(&self, direction: ScanDirection) -> Result<i64, IndexerError> {
        let (start, end) = tx_index_key_range();
        let first = self.store.scan(&start, &end, direction, Some(1)).await?;
        match first.first() {
            Some((key, _)) => parse_block_number_from_key(key),
            None => Ok(EMPTY_INDEX),
        }
    }

    /// Look up an indexed tx by its Ethereum hash.
    pub async fn get_by_tx_hash(&self, hash: &B256) -> Result<Option<TxResult>, IndexerError> {
        let Some(bz) = self.store.get(&tx_hash_key(hash)).await? else {
            return Ok(None);
        };
        let tx_result = TxResult::decode(bz.as_slice())
            .map_err(|e| IndexerError::MalformedValue(format!("GetByTxHash {hash}: {e}")))?;
        Ok(Some(tx_result))
    }

    /// Look up an indexed tx by block height and eth tx index.
    pub async fn get_by_block_and_index(
        &self,
        height: i64,
        eth_tx_index: i32,
    ) -> Result<Option<TxResult>, IndexerError> {
        let Some(bz) = self.store.get(&tx_index_key(height, eth_tx_index)).await? else {
            return Ok(None);
        };
        if bz.len() != 32 {
            return Err(IndexerError::MalformedValue(format!(
                "GetByBlockAndIndex {height} {eth_tx_index}: hash of {} bytes",
                bz.len()
            )));
        }
        self.get_by_tx_hash(&B256::from_slice(&bz)).await
    }

    /// Close the underlying store. Call once no more writes can happen.
    pub async fn close(&self) -> Result<(), IndexerError> {
        info!("Closing EVM tx indexer store");
        self.store.close().await?;
        Ok(())
    }
}

fn stage_tx_result(batch: &mut WriteBatch, hash: &B256, tx_result: &TxResult) {
    batch.set(tx_hash_key(hash).to_vec(), tx_result.encode_to_vec());
    batch.set(
        tx_index_key(tx_result.height, tx_result.eth_tx_index).to_vec(),
        hash.to_vec(),
    );
}
