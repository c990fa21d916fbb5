//! evmindex CLI — keep an EVM tx index in sync with a CometBFT node and query it.
//!
//! # Commands
//! ```text
//! evmindex tail
//! evmindex catch-up --from last-indexed --to latest
//! evmindex status
//! evmindex tx     <0xhash>
//! evmindex tx-at  <height> <eth-tx-index>
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use evmindex_core::{EvmTxIndexer, TxResult, B256, EMPTY_INDEX};
use evmindex_storage::StorageBackend;
use evmindex_tailer::{
    client::with_timeout, resolve_range, run_catch_up, ChainClient, ChainStatus, CheckpointPolicy,
    CometRpcClient, EndHeight, StartHeight, TailerBuilder, TailerConfig,
};

mod logging;

#[derive(Parser)]
#[command(
    name = "evmindex",
    about = "Ethereum tx index for Cosmos SDK chains",
    long_about = "
Indexes the Ethereum transactions embedded in a CometBFT chain by hash and by
(block height, eth tx index).

ENVIRONMENT VARIABLES:
  EVMINDEX_RPC   CometBFT RPC URL
  EVMINDEX_DB    SQLite index path (\"memory\" for a throwaway index)
  RUST_LOG       tracing filter, overrides --log-level
",
    version
)]
struct Cli {
    /// CometBFT RPC URL
    #[arg(long, env = "EVMINDEX_RPC", default_value = "http://localhost:26657", global = true)]
    rpc: String,

    /// SQLite index path, or "memory"
    #[arg(long, env = "EVMINDEX_DB", default_value = "./evmindexer.db", global = true)]
    db: String,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the chain tip and index every new block
    Tail {
        /// Idle wait before chain status is re-queried (ms)
        #[arg(long, default_value_t = TailerConfig::default().idle_timeout_ms)]
        idle_timeout_ms: u64,
        /// Per-request fetch timeout (ms)
        #[arg(long, default_value_t = TailerConfig::default().fetch_timeout_ms)]
        fetch_timeout_ms: u64,
        /// advance-on-success | advance-always
        #[arg(long, default_value_t = CheckpointPolicy::default())]
        checkpoint_policy: CheckpointPolicy,
    },

    /// Index a bounded height range
    #[command(name = "catch-up")]
    CatchUp {
        /// First height, or last-indexed
        #[arg(long, default_value = "last-indexed")]
        from: StartHeight,
        /// Last height (inclusive), or latest
        #[arg(long, default_value = "latest")]
        to: EndHeight,
        /// Per-request fetch timeout (ms)
        #[arg(long, default_value_t = TailerConfig::default().fetch_timeout_ms)]
        fetch_timeout_ms: u64,
    },

    /// Show the indexed height range (and the node's, if reachable)
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Look up an indexed tx by Ethereum hash
    Tx {
        /// 0x-prefixed 32-byte hash
        hash: String,
    },

    /// Look up an indexed tx by block height and eth tx index
    #[command(name = "tx-at")]
    TxAt { height: i64, index: i32 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(&cli.log_level, cli.log_json);

    let indexer = Arc::new(open_indexer(&cli.db).await?);

    let outcome = match cli.command {
        Commands::Tail {
            idle_timeout_ms,
            fetch_timeout_ms,
            checkpoint_policy,
        } => {
            let builder = TailerBuilder::new()
                .idle_timeout_ms(idle_timeout_ms)
                .fetch_timeout_ms(fetch_timeout_ms)
                .checkpoint_policy(checkpoint_policy);
            // the tailer closes the store itself
            return cmd_tail(&cli.rpc, indexer, builder).await;
        }
        Commands::CatchUp {
            from,
            to,
            fetch_timeout_ms,
        } => cmd_catch_up(&cli.rpc, &indexer, from, to, fetch_timeout_ms).await,
        Commands::Status { json } => cmd_status(&cli.rpc, &indexer, json).await,
        Commands::Tx { hash } => cmd_tx(&indexer, &hash).await,
        Commands::TxAt { height, index } => cmd_tx_at(&indexer, height, index).await,
    };

    indexer.close().await.context("closing index store")?;
    outcome
}

async fn open_indexer(db: &str) -> Result<EvmTxIndexer> {
    let backend = if db == "memory" {
        StorageBackend::Memory
    } else {
        StorageBackend::Sqlite { path: db.to_string() }
    };
    let store = backend
        .open()
        .await
        .with_context(|| format!("opening index store '{db}'"))?;
    Ok(EvmTxIndexer::new(store))
}

/// Query the node's height range, giving up after `limit`.
async fn node_status<C: ChainClient + ?Sized>(client: &C, limit: Duration) -> Result<ChainStatus> {
    with_timeout("status", limit, client.status())
        .await
        .context("querying node status")
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            token.cancel();
        }
    });
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_tail(rpc: &str, indexer: Arc<EvmTxIndexer>, builder: TailerBuilder) -> Result<()> {
    let client = Arc::new(CometRpcClient::new(rpc)?);
    tracing::info!(rpc = client.rpc_url(), "Tailing node");
    let tailer = builder.build(client, indexer);
    cancel_on_ctrl_c(tailer.cancellation_token());
    tailer.run().await.context("tailer stopped with an error")
}

async fn cmd_catch_up(
    rpc: &str,
    indexer: &EvmTxIndexer,
    from: StartHeight,
    to: EndHeight,
    fetch_timeout_ms: u64,
) -> Result<()> {
    let client = CometRpcClient::new(rpc)?;
    let fetch_timeout = Duration::from_millis(fetch_timeout_ms);
    let status = node_status(&client, fetch_timeout).await?;
    let range = resolve_range(indexer, &status, from, to).await?;

    if range.is_empty() {
        println!(
            "Nothing to index: range {range} is empty (node serves [{}, {}])",
            status.earliest_height, status.latest_height
        );
        return Ok(());
    }

    println!("Indexing {} blocks in {range}", range.len());
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let total = range.len();
    let mut done = 0u64;
    let report = run_catch_up(
        &client,
        indexer,
        range,
        fetch_timeout,
        &cancel,
        |height| {
            done += 1;
            if done % 100 == 0 || done == total {
                println!("  {done}/{total} (height {height})");
            }
        },
    )
    .await?;

    if report.cancelled {
        println!("Cancelled after {} of {total} blocks", report.indexed);
    } else {
        println!("Done: indexed {} blocks", report.indexed);
    }
    Ok(())
}

async fn cmd_status(rpc: &str, indexer: &EvmTxIndexer, as_json: bool) -> Result<()> {
    let first = indexer.first_indexed_block().await?;
    let last = indexer.last_indexed_block().await?;

    let node = match CometRpcClient::new(rpc) {
        Ok(client) => {
            let limit = TailerConfig::default().fetch_timeout();
            match node_status(&client, limit).await {
                Ok(status) => Some(status),
                Err(e) => {
                    tracing::debug!(rpc = client.rpc_url(), error = %e, "Node status unavailable");
                    None
                }
            }
        }
        Err(_) => None,
    };

    if as_json {
        let v = serde_json::json!({
            "first_indexed_block": first,
            "last_indexed_block": last,
            "node": node,
        });
        println!("{}", serde_json::to_string_pretty(&v)?);
        return Ok(());
    }

    if last == EMPTY_INDEX {
        println!("Index:  empty");
    } else {
        println!("Index:  [{first}, {last}]");
    }
    match node {
        Some(s) => {
            println!("Node:   [{}, {}]", s.earliest_height, s.latest_height);
            if last != EMPTY_INDEX && s.latest_height > last {
                println!("Behind: {} blocks", s.latest_height - last);
            }
        }
        None => println!("Node:   unreachable at {rpc}"),
    }
    Ok(())
}

async fn cmd_tx(indexer: &EvmTxIndexer, hash: &str) -> Result<()> {
    let hash: B256 = hash
        .parse()
        .with_context(|| format!("invalid tx hash '{hash}'"))?;
    print_tx(indexer.get_by_tx_hash(&hash).await?)
}

async fn cmd_tx_at(indexer: &EvmTxIndexer, height: i64, index: i32) -> Result<()> {
    print_tx(indexer.get_by_block_and_index(height, index).await?)
}

fn print_tx(tx: Option<TxResult>) -> Result<()> {
    match tx {
        Some(tx) => println!("{}", serde_json::to_string_pretty(&tx)?),
        None => anyhow::bail!("tx not found in index"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use evmindex_core::{Block, ConsensusTxResult, IndexerError};
    use evmindex_tailer::HeaderStream;

    /// A node that accepts requests and never answers.
    struct SilentNode;

    #[async_trait]
    impl ChainClient for SilentNode {
        async fn status(&self) -> Result<ChainStatus, IndexerError> {
            futures::future::pending().await
        }

        async fn block(&self, _height: i64) -> Result<Block, IndexerError> {
            futures::future::pending().await
        }

        async fn block_results(&self, _height: i64) -> Result<Vec<ConsensusTxResult>, IndexerError> {
            futures::future::pending().await
        }

        async fn subscribe_new_headers(&self) -> Result<HeaderStream, IndexerError> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn node_status_gives_up_on_a_silent_node() {
        let err = node_status(&SilentNode, Duration::from_millis(20))
            .await
            .unwrap_err();
        let cause = err.downcast_ref::<IndexerError>().unwrap();
        assert!(matches!(cause, IndexerError::Timeout { operation, ms: 20 } if operation == "status"));
    }
}
