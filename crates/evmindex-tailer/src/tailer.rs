//! The live tailer: keeps the index at the chain tip.
//!
//! # Tasks
//! * the header listener forwards subscription heights into a `watch`
//!   channel, so a burst of headers collapses into one wake-up;
//! * the main loop indexes `last_indexed + 1 ..= latest` and otherwise waits
//!   for a header, the idle timeout, or cancellation.
//!
//! # Shutdown
//! Cancel the token from [`LiveTailer::cancellation_token`]. `run` returns
//! after the main loop has stopped, the listener has been joined and the
//! indexer's store has been closed, in that order.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use evmindex_core::{EvmTxIndexer, IndexerError, EMPTY_INDEX};

use crate::client::{fetch_block_with_results, with_timeout, ChainClient, HeaderStream};
use crate::config::{CheckpointPolicy, TailerConfig};

/// Runtime state of the tailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TailerState {
    /// Querying the node and opening the header subscription.
    Starting,
    /// Indexing heights between the checkpoint and the known tip.
    CatchingUp,
    /// At the tip, waiting for a new header.
    Idle,
    /// Terminated; the store is closed.
    Stopped,
}

impl std::fmt::Display for TailerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::CatchingUp => write!(f, "catching-up"),
            Self::Idle => write!(f, "idle"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Follows new blocks and indexes each one.
pub struct LiveTailer<C: ChainClient> {
    config: TailerConfig,
    client: Arc<C>,
    indexer: Arc<EvmTxIndexer>,
    state: watch::Sender<TailerState>,
    cancel: CancellationToken,
}

impl<C: ChainClient + 'static> LiveTailer<C> {
    pub fn new(config: TailerConfig, client: Arc<C>, indexer: Arc<EvmTxIndexer>) -> Self {
        let (state, _) = watch::channel(TailerState::Starting);
        Self {
            config,
            client,
            indexer,
            state,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the tailer when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<TailerState> {
        self.state.subscribe()
    }

    /// Run until cancelled, then close the indexer's store.
    ///
    /// Fails only if startup fails (status query, subscription, reading the
    /// checkpoint) or the store cannot be closed.
    pub async fn run(self) -> Result<(), IndexerError> {
        info!(
            policy = %self.config.checkpoint_policy,
            idle_timeout_ms = self.config.idle_timeout_ms,
            fetch_timeout_ms = self.config.fetch_timeout_ms,
            "Starting EVM tx index tailer"
        );

        let outcome = match self.start().await {
            Ok((latest, latest_rx, listener)) => {
                let result = self.main_loop(latest, latest_rx).await;
                // stop the listener even if the loop left on its own
                self.cancel.cancel();
                if let Err(e) = listener.await {
                    error!(err = %e, "Header listener task failed");
                }
                result
            }
            Err(err) => Err(err),
        };

        let closed = self.indexer.close().await;
        self.state.send_replace(TailerState::Stopped);
        info!("EVM tx index tailer stopped");
        outcome.and(closed)
    }

    async fn start(&self) -> Result<(i64, watch::Receiver<i64>, JoinHandle<()>), IndexerError> {
        let status = with_timeout(
            "status",
            self.config.fetch_timeout(),
            self.client.status(),
        )
        .await?;
        let headers = self.client.subscribe_new_headers().await?;

        let (latest_tx, latest_rx) = watch::channel(status.latest_height);
        let listener = tokio::spawn(listen_for_headers(headers, latest_tx, self.cancel.clone()));
        Ok((status.latest_height, latest_rx, listener))
    }

    async fn main_loop(
        &self,
        mut latest: i64,
        mut latest_rx: watch::Receiver<i64>,
    ) -> Result<(), IndexerError> {
        let mut last_indexed = self.indexer.last_indexed_block().await?;
        if last_indexed == EMPTY_INDEX {
            // fresh index: follow from the tip, history is the catch-up command's job
            last_indexed = latest;
        }
        info!(last_indexed, latest, "Tailer resuming");

        let mut listener_alive = true;

        while !self.cancel.is_cancelled() {
            latest = latest.max(*latest_rx.borrow_and_update());

            if latest <= last_indexed {
                self.state.send_replace(TailerState::Idle);
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    changed = latest_rx.changed(), if listener_alive => {
                        if changed.is_err() {
                            listener_alive = false;
                        }
                    }
                    _ = tokio::time::sleep(self.config.idle_timeout()) => {
                        // liveness check in case headers stopped arriving
                        match with_timeout("status", self.config.fetch_timeout(), self.client.status()).await {
                            Ok(status) => latest = latest.max(status.latest_height),
                            Err(err) => error!(%err, "Failed to query chain status"),
                        }
                    }
                }
                continue;
            }

            self.state.send_replace(TailerState::CatchingUp);
            let mut failed = false;
            for height in last_indexed + 1..=latest {
                if self.cancel.is_cancelled() {
                    break;
                }
                match self.index_height(height).await {
                    Ok(()) => last_indexed = height,
                    Err(err) => {
                        error!(
                            height,
                            %err,
                            retryable = err.is_retryable(),
                            "Failed to index block"
                        );
                        if self.config.checkpoint_policy == CheckpointPolicy::AdvanceAlways {
                            last_indexed = height;
                        } else {
                            failed = true;
                        }
                        break;
                    }
                }
            }

            if failed {
                // the same height is retried after the idle delay
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.idle_timeout()) => {}
                }
            }
        }

        info!(last_indexed, "Tailer loop finished");
        Ok(())
    }

    async fn index_height(&self, height: i64) -> Result<(), IndexerError> {
        let (block, results) =
            fetch_block_with_results(self.client.as_ref(), height, self.config.fetch_timeout())
                .await?;
        self.indexer.index_block(&block, &results).await
    }
}

/// Forward subscription heights into `latest` until cancelled or the stream
/// ends. Only ever raises the published height.
async fn listen_for_headers(
    mut headers: HeaderStream,
    latest: watch::Sender<i64>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            item = headers.next() => match item {
                Some(Ok(height)) => {
                    latest.send_if_modified(|current| {
                        if height > *current {
                            *current = height;
                            true
                        } else {
                            false
                        }
                    });
                }
                Some(Err(err)) => error!(%err, "Header subscription error"),
                None => {
                    warn!("Header subscription ended, falling back to status polling");
                    break;
                }
            }
        }
    }
}
