//! ABCI result inspection: eligibility of a consensus result and recovery of
//! per-message Ethereum execution outcomes from its events.

use std::str::FromStr;

use alloy_primitives::B256;

use crate::error::IndexerError;
use crate::tx::EthTx;
use crate::types::{AbciEvent, ConsensusTxResult};

/// Emitted once per Ethereum message before execution.
pub const PENDING_ETHEREUM_TX_EVENT: &str = "pending_ethereum_tx";
pub const PENDING_ETHEREUM_TX_ATTR_ETH_HASH: &str = "eth_hash";
pub const PENDING_ETHEREUM_TX_ATTR_INDEX: &str = "index";

/// Typed event emitted after execution; replaces the pending one.
pub const EVENT_ETHEREUM_TX: &str = "eth.evm.v1.EventEthereumTx";

/// Log fragment of a tx rejected for exceeding the block gas limit.
pub const ERR_EXCEED_BLOCK_GAS_LIMIT: &str = "out of gas in location: block gas meter; gasWanted:";
/// Log fragment of a tx whose EVM state failed to commit.
pub const ERR_STATE_DB_COMMIT: &str = "failed to commit stateDB";

// ─── Eligibility ─────────────────────────────────────────────────────────────

/// Whether a consensus result is worth indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible { reason: &'static str },
    Ineligible { reason: &'static str },
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible { .. })
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Eligible { reason } | Self::Ineligible { reason } => reason,
        }
    }
}

/// Decides whether a consensus result should be indexed at all.
pub trait TxClassifier: Send + Sync {
    fn classify(&self, result: &ConsensusTxResult) -> Eligibility;
}

/// Accepts successful txs plus the two failure modes that still charge gas.
#[derive(Debug, Default, Clone)]
pub struct AbciValidity;

impl TxClassifier for AbciValidity {
    fn classify(&self, result: &ConsensusTxResult) -> Eligibility {
        if result.code == 0 {
            Eligibility::Eligible { reason: "tx succeeded" }
        } else if result.log.contains(ERR_EXCEED_BLOCK_GAS_LIMIT) {
            Eligibility::Eligible { reason: "tx exceeded block gas limit" }
        } else if result.log.contains(ERR_STATE_DB_COMMIT) {
            Eligibility::Eligible { reason: "tx state db commit error" }
        } else {
            Eligibility::Ineligible { reason: "unexpected failure" }
        }
    }
}

// ─── Parsed events ───────────────────────────────────────────────────────────

/// Execution outcome of one Ethereum message, recovered from events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTx {
    pub msg_index: usize,
    pub eth_hash: B256,
    /// `-1` when no event carried an index.
    pub eth_tx_index: i32,
    pub gas_used: u64,
    pub failed: bool,
}

/// Outcomes of every Ethereum message in one consensus tx.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTxs {
    /// One entry per message, in message order.
    pub txs: Vec<ParsedTx>,
}

impl ParsedTxs {
    pub fn get_by_msg_index(&self, msg_index: usize) -> Option<&ParsedTx> {
        self.txs.get(msg_index)
    }
}

/// Recovers per-message execution outcomes of an Ethereum carrier tx.
pub trait EventParser: Send + Sync {
    fn parse(&self, result: &ConsensusTxResult, tx: &EthTx) -> Result<ParsedTxs, IndexerError>;
}

/// Parses `pending_ethereum_tx` and `eth.evm.v1.EventEthereumTx` events.
#[derive(Debug, Default, Clone)]
pub struct AbciEventParser;

impl EventParser for AbciEventParser {
    fn parse(&self, result: &ConsensusTxResult, tx: &EthTx) -> Result<ParsedTxs, IndexerError> {
        let mut parsed = ParsedTxs::default();

        for event in &result.events {
            if event.kind == PENDING_ETHEREUM_TX_EVENT {
                let msg_index = parsed.txs.len();
                let (eth_hash, eth_tx_index) = parse_pending_event(event)?;
                parsed.txs.push(ParsedTx {
                    msg_index,
                    eth_hash,
                    eth_tx_index,
                    gas_used: 0,
                    failed: false,
                });
            } else if event.kind == EVENT_ETHEREUM_TX {
                let Some(msg_index) = parsed.txs.len().checked_sub(1) else {
                    return Err(IndexerError::EventParse(
                        "EventEthereumTx without pending_ethereum_tx event".into(),
                    ));
                };
                parsed.txs[msg_index] = parse_committed_event(event, msg_index)?;
            }
        }

        // only a tx rejected as a whole (e.g. block gas limit) lands here
        if result.code != 0 {
            for parsed_tx in parsed.txs.iter_mut() {
                let msg = tx.eth_msg(parsed_tx.msg_index).ok_or_else(|| {
                    IndexerError::EventParse(format!(
                        "unexpected message type at index {}",
                        parsed_tx.msg_index
                    ))
                })?;
                parsed_tx.failed = true;
                parsed_tx.gas_used = msg.gas_limit;
            }
        }
        Ok(parsed)
    }
}

fn parse_pending_event(event: &AbciEvent) -> Result<(B256, i32), IndexerError> {
    let hash = event
        .get(PENDING_ETHEREUM_TX_ATTR_ETH_HASH)
        .ok_or_else(|| IndexerError::EventParse("pending_ethereum_tx without eth_hash".into()))?;
    let index = event
        .get(PENDING_ETHEREUM_TX_ATTR_INDEX)
        .ok_or_else(|| IndexerError::EventParse("pending_ethereum_tx without index".into()))?;
    Ok((parse_hash(hash)?, parse_int(index, "index")?))
}

fn parse_committed_event(event: &AbciEvent, msg_index: usize) -> Result<ParsedTx, IndexerError> {
    let typed = |key: &str| event.get(key).map(unquote);

    let eth_hash = typed("eth_hash")
        .ok_or_else(|| IndexerError::EventParse("EventEthereumTx without eth_hash".into()))?;
    let index = typed("index")
        .ok_or_else(|| IndexerError::EventParse("EventEthereumTx without index".into()))?;
    let eth_tx_index: u32 = parse_int(&index, "EthTxIndex")?;
    if eth_tx_index > i32::MAX as u32 {
        return Err(IndexerError::EventParse(format!("EthTxIndex {eth_tx_index} out of range")));
    }
    let gas_used = typed("gas_used")
        .ok_or_else(|| IndexerError::EventParse("EventEthereumTx without gas_used".into()))?;

    Ok(ParsedTx {
        msg_index,
        eth_hash: parse_hash(&eth_hash)?,
        eth_tx_index: eth_tx_index as i32,
        gas_used: parse_int(&gas_used, "GasUsed")?,
        failed: typed("eth_tx_failed").is_some_and(|f| !f.is_empty()),
    })
}

/// Typed-event attribute values are JSON encoded (`"21000"`).
fn unquote(value: &str) -> String {
    serde_json::from_str::<String>(value).unwrap_or_else(|_| value.to_string())
}

fn parse_hash(s: &str) -> Result<B256, IndexerError> {
    B256::from_str(s).map_err(|e| IndexerError::EventParse(format!("bad eth hash {s:?}: {e}")))
}

fn parse_int<T: FromStr>(s: &str, what: &str) -> Result<T, IndexerError>
where
    T::Err: std::fmt::Display,
{
    s.parse()
        .map_err(|e| IndexerError::EventParse(format!("failed to parse {what} {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{EthMsg, TxMsg};

    fn hash(b: u8) -> B256 {
        B256::repeat_byte(b)
    }

    fn pending(b: u8, index: i32) -> AbciEvent {
        AbciEvent::new(PENDING_ETHEREUM_TX_EVENT)
            .attr("eth_hash", hash(b).to_string())
            .attr("index", index.to_string())
    }

    fn committed(b: u8, index: u32, gas: u64, failed: &str) -> AbciEvent {
        AbciEvent::new(EVENT_ETHEREUM_TX)
            .attr("eth_hash", format!("\"{}\"", hash(b)))
            .attr("index", format!("\"{index}\""))
            .attr("gas_used", format!("\"{gas}\""))
            .attr("eth_tx_failed", format!("\"{failed}\""))
    }

    fn eth_tx(gas: &[u64]) -> EthTx {
        EthTx::new(
            gas.iter()
                .enumerate()
                .map(|(i, g)| TxMsg::Ethereum(EthMsg { hash: hash(i as u8 + 1), gas_limit: *g }))
                .collect(),
        )
    }

    #[test]
    fn validity_rules() {
        let ok = ConsensusTxResult::default();
        assert!(AbciValidity.classify(&ok).is_eligible());

        let gas_limit = ConsensusTxResult {
            code: 11,
            log: format!("{ERR_EXCEED_BLOCK_GAS_LIMIT} 21000"),
            ..Default::default()
        };
        assert_eq!(AbciValidity.classify(&gas_limit).reason(), "tx exceeded block gas limit");

        let commit = ConsensusTxResult {
            code: 5,
            log: "failed to commit stateDB: boom".into(),
            ..Default::default()
        };
        assert!(AbciValidity.classify(&commit).is_eligible());

        let nonce = ConsensusTxResult { code: 15, log: "nonce mismatch".into(), ..Default::default() };
        assert_eq!(
            AbciValidity.classify(&nonce),
            Eligibility::Ineligible { reason: "unexpected failure" }
        );
    }

    #[test]
    fn pending_only_event() {
        let result = ConsensusTxResult { events: vec![pending(1, 4)], ..Default::default() };
        let parsed = AbciEventParser.parse(&result, &eth_tx(&[21000])).unwrap();
        let tx = parsed.get_by_msg_index(0).unwrap();
        assert_eq!(tx.eth_tx_index, 4);
        assert_eq!(tx.gas_used, 0);
        assert!(!tx.failed);
        assert_eq!(tx.eth_hash, hash(1));
    }

    #[test]
    fn committed_event_replaces_pending() {
        let result = ConsensusTxResult {
            events: vec![
                pending(1, 0),
                committed(1, 0, 21000, ""),
                pending(2, 1),
                committed(2, 1, 50000, "reverted"),
            ],
            ..Default::default()
        };
        let parsed = AbciEventParser.parse(&result, &eth_tx(&[30000, 60000])).unwrap();
        assert_eq!(parsed.txs.len(), 2);
        assert_eq!(parsed.txs[0].gas_used, 21000);
        assert!(!parsed.txs[0].failed);
        assert_eq!(parsed.txs[1].gas_used, 50000);
        assert!(parsed.txs[1].failed);
        assert_eq!(parsed.txs[1].eth_hash, hash(2));
    }

    #[test]
    fn committed_without_pending_is_an_error() {
        let result = ConsensusTxResult { events: vec![committed(1, 0, 1, "")], ..Default::default() };
        let err = AbciEventParser.parse(&result, &eth_tx(&[1])).unwrap_err();
        assert!(matches!(err, IndexerError::EventParse(_)));
    }

    #[test]
    fn rejected_tx_charges_gas_limit() {
        let result = ConsensusTxResult {
            code: 11,
            log: ERR_EXCEED_BLOCK_GAS_LIMIT.into(),
            events: vec![pending(1, 0)],
            ..Default::default()
        };
        let parsed = AbciEventParser.parse(&result, &eth_tx(&[21000])).unwrap();
        assert!(parsed.txs[0].failed);
        assert_eq!(parsed.txs[0].gas_used, 21000);
    }

    #[test]
    fn malformed_gas_is_an_error() {
        let bad = AbciEvent::new(EVENT_ETHEREUM_TX)
            .attr("eth_hash", format!("\"{}\"", hash(1)))
            .attr("index", "\"0\"")
            .attr("gas_used", "\"lots\"");
        let result = ConsensusTxResult { events: vec![pending(1, 0), bad], ..Default::default() };
        assert!(AbciEventParser.parse(&result, &eth_tx(&[1])).is_err());
    }
}
