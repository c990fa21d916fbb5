//! Shared types for the indexing pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ─── TxResult ────────────────────────────────────────────────────────────────

/// The value stored under a tx-hash key.
///
/// Protobuf-encoded, field for field compatible with `ethermint.types.v1.TxResult`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, prost::Message)]
pub struct TxResult {
    /// Block height.
    #[prost(int64, tag = "1")]
    pub height: i64,
    /// Position of the consensus tx within the block.
    #[prost(uint32, tag = "2")]
    pub tx_index: u32,
    /// Position of the message within the consensus tx.
    #[prost(uint32, tag = "3")]
    pub msg_index: u32,
    /// Position among the indexed Ethereum txs of the block.
    #[prost(int32, tag = "4")]
    pub eth_tx_index: i32,
    #[prost(bool, tag = "5")]
    pub failed: bool,
    /// Gas used. Set to the gas limit when the whole consensus tx was rejected.
    #[prost(uint64, tag = "6")]
    pub gas_used: u64,
    /// Running gas total within the current consensus tx.
    #[prost(uint64, tag = "7")]
    pub cumulative_gas_used: u64,
}

// ─── Block ───────────────────────────────────────────────────────────────────

/// A committed block: its height and raw transaction bytes, in block order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub height: i64,
    pub txs: Vec<Vec<u8>>,
}

impl Block {
    pub fn new(height: i64, txs: Vec<Vec<u8>>) -> Self {
        Self { height, txs }
    }
}

/// CometBFT transaction hash: upper-case hex SHA-256 of the raw tx bytes.
pub fn tm_tx_hash(raw: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(raw))
}

// ─── ConsensusTxResult ───────────────────────────────────────────────────────

/// Execution result of one consensus transaction (ABCI `ExecTxResult`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusTxResult {
    /// Top-level status code; `0` means OK.
    pub code: u32,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub gas_wanted: i64,
    #[serde(default)]
    pub gas_used: i64,
    #[serde(default)]
    pub events: Vec<AbciEvent>,
}

impl ConsensusTxResult {
    /// Returns `true` if the transaction as a whole was accepted.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// An ABCI event: a type plus ordered key/value attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbciEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

impl AbciEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), attributes: vec![] }
    }

    /// Append an attribute.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(EventAttribute {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// First value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn tx_result_protobuf_layout() {
        let r = TxResult {
            height: 1,
            tx_index: 2,
            msg_index: 0,
            eth_tx_index: 0,
            failed: true,
            gas_used: 21000,
            cumulative_gas_used: 21000,
        };
        let bz = r.encode_to_vec();
        // height (field 1, varint) comes first, zero-valued fields are omitted
        assert_eq!(&bz[..2], &[0x08, 0x01]);
        assert_eq!(TxResult::decode(bz.as_slice()).unwrap(), r);
    }

    #[test]
    fn event_attribute_lookup() {
        let ev = AbciEvent::new("pending_ethereum_tx")
            .attr("eth_hash", "0xabc")
            .attr("index", "3");
        assert_eq!(ev.get("index"), Some("3"));
        assert_eq!(ev.get("missing"), None);
    }

    #[test]
    fn tm_hash_is_upper_hex_sha256() {
        let h = tm_tx_hash(b"");
        assert_eq!(h.len(), 64);
        assert!(h.starts_with("E3B0C442"));
    }
}
