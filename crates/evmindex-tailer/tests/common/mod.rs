//! Scripted in-process `ChainClient` for tailer and catch-up tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;

use evmindex_core::abci::PENDING_ETHEREUM_TX_EVENT;
use evmindex_core::tx::encode_eth_tx;
use evmindex_core::{
    AbciEvent, Block, ConsensusTxResult, EthMsg, EvmTxIndexer, IndexerError, MemoryKvStore, B256,
};
use evmindex_tailer::{ChainClient, ChainStatus, HeaderStream};

/// How a scripted fetch of a height misbehaves.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Fail with an RPC error.
    Error,
    /// Never answer.
    Hang,
}

#[derive(Default)]
struct Inner {
    earliest: i64,
    latest: i64,
    /// Remaining faults per height, consumed one per block fetch.
    faults: HashMap<i64, Vec<Fault>>,
    fetched: Vec<i64>,
    headers: Option<mpsc::UnboundedSender<Result<i64, IndexerError>>>,
}

/// A chain whose block at height `h` carries one Ethereum tx with hash
/// `hash_at(h)`.
#[derive(Clone, Default)]
pub struct ScriptedChain {
    inner: Arc<Mutex<Inner>>,
}

pub fn hash_at(height: i64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&height.to_be_bytes());
    B256::from(bytes)
}

pub fn block_at(height: i64) -> (Block, Vec<ConsensusTxResult>) {
    let msg = EthMsg { hash: hash_at(height), gas_limit: 21000 };
    let block = Block::new(height, vec![encode_eth_tx(&[msg])]);
    let result = ConsensusTxResult {
        code: 0,
        events: vec![AbciEvent::new(PENDING_ETHEREUM_TX_EVENT)
            .attr("eth_hash", format!("{}", hash_at(height)))
            .attr("index", "0")],
        ..Default::default()
    };
    (block, vec![result])
}

impl ScriptedChain {
    pub fn new(earliest: i64, latest: i64) -> Self {
        let chain = Self::default();
        {
            let mut inner = chain.inner.lock().unwrap();
            inner.earliest = earliest;
            inner.latest = latest;
        }
        chain
    }

    /// Produce a new block and announce it on the header subscription.
    pub fn announce(&self, height: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.latest = inner.latest.max(height);
        if let Some(tx) = &inner.headers {
            let _ = tx.unbounded_send(Ok(height));
        }
    }

    /// Produce a new block without announcing it.
    pub fn set_latest(&self, height: i64) {
        self.inner.lock().unwrap().latest = height;
    }

    /// End the header subscription as if the connection dropped.
    pub fn drop_subscription(&self) {
        self.inner.lock().unwrap().headers = None;
    }

    pub fn inject(&self, height: i64, faults: &[Fault]) {
        self.inner
            .lock()
            .unwrap()
            .faults
            .insert(height, faults.to_vec());
    }

    /// Heights whose block was requested, in request order.
    pub fn fetched(&self) -> Vec<i64> {
        self.inner.lock().unwrap().fetched.clone()
    }

    fn take_fault(&self, height: i64) -> Option<Fault> {
        let mut inner = self.inner.lock().unwrap();
        inner.fetched.push(height);
        let faults = inner.faults.get_mut(&height)?;
        if faults.is_empty() {
            None
        } else {
            Some(faults.remove(0))
        }
    }

    fn check_served(&self, height: i64) -> Result<(), IndexerError> {
        let inner = self.inner.lock().unwrap();
        if height < inner.earliest || height > inner.latest {
            return Err(IndexerError::Rpc(format!("height {height} is not available")));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn status(&self) -> Result<ChainStatus, IndexerError> {
        let inner = self.inner.lock().unwrap();
        Ok(ChainStatus {
            earliest_height: inner.earliest,
            latest_height: inner.latest,
        })
    }

    async fn block(&self, height: i64) -> Result<Block, IndexerError> {
        self.check_served(height)?;
        match self.take_fault(height) {
            Some(Fault::Error) => Err(IndexerError::Rpc(format!("block {height}: injected"))),
            Some(Fault::Hang) => futures::future::pending().await,
            None => Ok(block_at(height).0),
        }
    }

    async fn block_results(&self, height: i64) -> Result<Vec<ConsensusTxResult>, IndexerError> {
        self.check_served(height)?;
        Ok(block_at(height).1)
    }

    async fn subscribe_new_headers(&self) -> Result<HeaderStream, IndexerError> {
        let (tx, rx) = mpsc::unbounded();
        self.inner.lock().unwrap().headers = Some(tx);
        Ok(Box::pin(rx))
    }
}

pub fn memory_indexer() -> Arc<EvmTxIndexer> {
    Arc::new(EvmTxIndexer::new(Box::new(MemoryKvStore::new())))
}

/// Index `heights` directly, bypassing any client.
pub async fn seed(indexer: &EvmTxIndexer, heights: impl IntoIterator<Item = i64>) {
    for h in heights {
        let (block, results) = block_at(h);
        indexer.index_block(&block, &results).await.unwrap();
    }
}

/// Poll until the index reaches `height`; panics after a few seconds.
pub async fn wait_until_indexed(indexer: &EvmTxIndexer, height: i64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if indexer.last_indexed_block().await.unwrap() >= height {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("index never reached height {height}"));
}
