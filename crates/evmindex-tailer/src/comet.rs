//! `CometRpcClient`: [`ChainClient`] over a CometBFT node's RPC.
//!
//! Blocks, results and status come from the URI-over-HTTP endpoints
//! (`/status`, `/block`, `/block_results`). New heights come from a
//! WebSocket `subscribe` to `tm.event='NewBlockHeader'` on `/websocket`.
//!
//! # Usage
//! ```no_run
//! use evmindex_tailer::comet::CometRpcClient;
//!
//! # fn example() -> Result<(), evmindex_core::IndexerError> {
//! let client = CometRpcClient::new("http://localhost:26657")?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use base64::Engine as _;
use futures::{channel::mpsc, SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use evmindex_core::{AbciEvent, Block, ConsensusTxResult, EventAttribute, IndexerError};

use crate::client::{ChainClient, ChainStatus, HeaderStream};

/// Query for the new-block-header subscription.
pub const NEW_BLOCK_HEADER_QUERY: &str = "tm.event='NewBlockHeader'";

/// CometBFT RPC client.
pub struct CometRpcClient {
    rpc_url: String,
    ws_url: String,
    http: reqwest::Client,
}

impl CometRpcClient {
    /// Create a client for the node at `rpc_url` (`http://` or `https://`).
    pub fn new(rpc_url: impl Into<String>) -> Result<Self, IndexerError> {
        let rpc_url = rpc_url.into().trim_end_matches('/').to_string();
        let ws_url = websocket_url(&rpc_url);
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| IndexerError::Rpc(format!("building HTTP client: {e}")))?;
        Ok(Self {
            rpc_url,
            ws_url,
            http,
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, IndexerError> {
        let url = format!("{}/{path}", self.rpc_url);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| IndexerError::Rpc(format!("{path}: {e}")))?;

        // CometBFT reports JSON-RPC errors with a non-2xx status and a body
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| IndexerError::Rpc(format!("{path}: {e}")))?;
        let envelope: RpcEnvelope<T> = serde_json::from_str(&body).map_err(|e| {
            IndexerError::Rpc(format!("{path}: HTTP {status}: undecodable response: {e}"))
        })?;
        envelope.into_result(path)
    }
}

#[async_trait]
impl ChainClient for CometRpcClient {
    async fn status(&self) -> Result<ChainStatus, IndexerError> {
        let status: StatusResult = self.get("status", &[]).await?;
        Ok(status.into())
    }

    async fn block(&self, height: i64) -> Result<Block, IndexerError> {
        let block: BlockResult = self.get("block", &[("height", height.to_string())]).await?;
        block.into_block()
    }

    async fn block_results(&self, height: i64) -> Result<Vec<ConsensusTxResult>, IndexerError> {
        let results: BlockResultsResult = self
            .get("block_results", &[("height", height.to_string())])
            .await?;
        results.into_tx_results()
    }

    async fn subscribe_new_headers(&self) -> Result<HeaderStream, IndexerError> {
        let (tx, rx) = mpsc::channel::<Result<i64, IndexerError>>(64);
        let ws_url = self.ws_url.clone();

        tokio::spawn(async move {
            run_header_subscription(ws_url, tx).await;
        });

        Ok(Box::pin(rx))
    }
}

// ─── WebSocket subscription ──────────────────────────────────────────────────

async fn run_header_subscription(ws_url: String, mut tx: mpsc::Sender<Result<i64, IndexerError>>) {
    info!(url = %ws_url, "Connecting header subscription");

    let ws_stream = match connect_async(ws_url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            error!(url = %ws_url, err = %e, "WebSocket connect failed");
            let _ = tx
                .send(Err(IndexerError::Rpc(format!("connect {ws_url}: {e}"))))
                .await;
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    let sub_msg = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 0,
        "method": "subscribe",
        "params": { "query": NEW_BLOCK_HEADER_QUERY }
    });
    if let Err(e) = write.send(Message::Text(sub_msg.to_string())).await {
        error!(err = %e, "Failed to send subscribe");
        let _ = tx
            .send(Err(IndexerError::Rpc(format!("subscribe: {e}"))))
            .await;
        return;
    }

    while let Some(msg_result) = read.next().await {
        match msg_result {
            Err(e) => {
                warn!(err = %e, "WebSocket error");
                break;
            }
            Ok(Message::Text(text)) => {
                if let Some(height) = parse_new_block_header(&text) {
                    debug!(height, "New block header");
                    if tx.send(Ok(height)).await.is_err() {
                        // receiver dropped
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket closed by server");
                break;
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(_) => {}
        }
    }

    info!("Header subscription loop ended");
}

/// Extract the height from a `NewBlockHeader` event message. Returns `None`
/// for the subscription confirmation and anything else.
fn parse_new_block_header(text: &str) -> Option<i64> {
    let v: Value = serde_json::from_str(text).ok()?;
    let data = v.get("result")?.get("data")?;
    if data.get("type")?.as_str()? != "tendermint/event/NewBlockHeader" {
        return None;
    }
    data.get("value")?
        .get("header")?
        .get("height")?
        .as_str()?
        .parse()
        .ok()
}

/// `http://host:26657` → `ws://host:26657/websocket`.
fn websocket_url(rpc_url: &str) -> String {
    let base = if let Some(rest) = rpc_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = rpc_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        rpc_url.to_string()
    };
    format!("{base}/websocket")
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<String>,
}

impl<T> RpcEnvelope<T> {
    fn into_result(self, path: &str) -> Result<T, IndexerError> {
        if let Some(err) = self.error {
            return Err(IndexerError::Rpc(format!(
                "{path}: {} ({}): {}",
                err.message,
                err.code,
                err.data.unwrap_or_default()
            )));
        }
        self.result
            .ok_or_else(|| IndexerError::Rpc(format!("{path}: response has no result")))
    }
}

#[derive(Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Deserialize)]
struct SyncInfo {
    #[serde(with = "string_int")]
    earliest_block_height: i64,
    #[serde(with = "string_int")]
    latest_block_height: i64,
}

impl From<StatusResult> for ChainStatus {
    fn from(s: StatusResult) -> Self {
        Self {
            earliest_height: s.sync_info.earliest_block_height,
            latest_height: s.sync_info.latest_block_height,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    block: WireBlock,
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    header: WireHeader,
    data: WireBlockData,
}

#[derive(Debug, Deserialize)]
struct WireHeader {
    #[serde(with = "string_int")]
    height: i64,
}

#[derive(Debug, Deserialize)]
struct WireBlockData {
    #[serde(default)]
    txs: Option<Vec<String>>,
}

impl BlockResult {
    fn into_block(self) -> Result<Block, IndexerError> {
        let height = self.block.header.height;
        let txs = self
            .block
            .data
            .txs
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(i, b64)| {
                base64::engine::general_purpose::STANDARD
                    .decode(b64)
                    .map_err(|e| IndexerError::Rpc(format!("block {height} tx {i}: bad base64: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Block::new(height, txs))
    }
}

#[derive(Deserialize)]
struct BlockResultsResult {
    #[serde(with = "string_int")]
    height: i64,
    #[serde(default)]
    txs_results: Option<Vec<WireTxResult>>,
}

#[derive(Deserialize)]
struct WireTxResult {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    log: String,
    #[serde(default, with = "string_int")]
    gas_wanted: i64,
    #[serde(default, with = "string_int")]
    gas_used: i64,
    #[serde(default)]
    events: Vec<WireEvent>,
}

#[derive(Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Vec<WireAttribute>,
}

#[derive(Deserialize)]
struct WireAttribute {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

impl BlockResultsResult {
    fn into_tx_results(self) -> Result<Vec<ConsensusTxResult>, IndexerError> {
        debug!(height = self.height, "Fetched block results");
        Ok(self
            .txs_results
            .unwrap_or_default()
            .into_iter()
            .map(|r| ConsensusTxResult {
                code: r.code,
                log: r.log,
                gas_wanted: r.gas_wanted,
                gas_used: r.gas_used,
                events: r
                    .events
                    .into_iter()
                    .map(|e| AbciEvent {
                        kind: e.kind,
                        attributes: e
                            .attributes
                            .into_iter()
                            .map(|a| EventAttribute {
                                key: a.key,
                                value: a.value.unwrap_or_default(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect())
    }
}

/// CometBFT encodes 64-bit integers as JSON strings.
mod string_int {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum StrOrNum {
            Str(String),
            Num(i64),
        }
        match StrOrNum::deserialize(d)? {
            StrOrNum::Str(s) => s.parse().map_err(serde::de::Error::custom),
            StrOrNum::Num(n) => Ok(n),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_from_rpc_url() {
        assert_eq!(websocket_url("http://localhost:26657"), "ws://localhost:26657/websocket");
        assert_eq!(websocket_url("https://rpc.example.org"), "wss://rpc.example.org/websocket");
    }

    #[test]
    fn parse_status() {
        let body = r#"{"jsonrpc":"2.0","id":-1,"result":{
            "node_info":{},
            "sync_info":{"latest_block_height":"1200","earliest_block_height":"1000","catching_up":false}
        }}"#;
        let env: RpcEnvelope<StatusResult> = serde_json::from_str(body).unwrap();
        let status: ChainStatus = env.into_result("status").unwrap().into();
        assert_eq!(status, ChainStatus { earliest_height: 1000, latest_height: 1200 });
    }

    #[test]
    fn parse_block_decodes_base64_txs() {
        let body = r#"{"jsonrpc":"2.0","id":-1,"result":{"block":{
            "header":{"height":"5"},
            "data":{"txs":["AQID","/w=="]}
        }}}"#;
        let env: RpcEnvelope<BlockResult> = serde_json::from_str(body).unwrap();
        let block = env.into_result("block").unwrap().into_block().unwrap();
        assert_eq!(block.height, 5);
        assert_eq!(block.txs, vec![vec![1, 2, 3], vec![0xff]]);
    }

    #[test]
    fn parse_empty_block() {
        let body = r#"{"result":{"block":{"header":{"height":"6"},"data":{"txs":null}}}}"#;
        let env: RpcEnvelope<BlockResult> = serde_json::from_str(body).unwrap();
        let block = env.into_result("block").unwrap().into_block().unwrap();
        assert!(block.txs.is_empty());
    }

    #[test]
    fn parse_block_results() {
        let body = r#"{"jsonrpc":"2.0","id":-1,"result":{"height":"5","txs_results":[
            {"code":0,"log":"","gas_wanted":"30000","gas_used":"21000","events":[
                {"type":"pending_ethereum_tx","attributes":[
                    {"key":"eth_hash","value":"0xabc","index":true},
                    {"key":"index","value":"0","index":true}
                ]}
            ]},
            {"code":11,"log":"out of gas","gas_wanted":"1","gas_used":"2"}
        ]}}"#;
        let env: RpcEnvelope<BlockResultsResult> = serde_json::from_str(body).unwrap();
        let results = env.into_result("block_results").unwrap().into_tx_results().unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].gas_used, 21000);
        assert_eq!(results[0].events[0].get("eth_hash"), Some("0xabc"));
        assert_eq!(results[1].code, 11);
        assert!(results[1].events.is_empty());
    }

    #[test]
    fn rpc_error_is_surfaced() {
        let body = r#"{"jsonrpc":"2.0","id":-1,"error":{"code":-32603,"message":"Internal error",
            "data":"height 10 must be less than or equal to the current blockchain height 5"}}"#;
        let env: RpcEnvelope<BlockResult> = serde_json::from_str(body).unwrap();
        let err = env.into_result("block").unwrap_err();
        assert!(matches!(err, IndexerError::Rpc(ref m) if m.contains("current blockchain height 5")));
        assert!(err.is_retryable());
    }

    #[test]
    fn parse_new_block_header_event() {
        let msg = r#"{"jsonrpc":"2.0","id":0,"result":{
            "query":"tm.event='NewBlockHeader'",
            "data":{"type":"tendermint/event/NewBlockHeader","value":{"header":{"height":"77"}}}
        }}"#;
        assert_eq!(parse_new_block_header(msg), Some(77));
    }

    #[test]
    fn skip_subscription_confirmation() {
        let msg = r#"{"jsonrpc":"2.0","id":0,"result":{}}"#;
        assert_eq!(parse_new_block_header(msg), None);
    }
}
