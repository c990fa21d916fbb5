//! Consensus transaction decoding.
//!
//! A raw consensus transaction decodes to a closed variant: either it carries
//! the Ethereum extension option ([`DecodedTx::Ethereum`]) or it does not
//! ([`DecodedTx::NotEthereum`]). Messages inside an Ethereum carrier are
//! likewise tagged, so the indexer never inspects type URLs itself.

use std::str::FromStr;

use alloy_primitives::B256;
use prost::Message;

use crate::error::IndexerError;

/// Type URL of the extension option that marks an Ethereum carrier tx.
pub const EXTENSION_OPTIONS_ETHEREUM_TX: &str = "/eth.evm.v1.ExtensionOptionsEthereumTx";
/// Type URL of an Ethereum message.
pub const MSG_ETHEREUM_TX: &str = "/eth.evm.v1.MsgEthereumTx";

pub const LEGACY_TX: &str = "/eth.evm.v1.LegacyTx";
pub const ACCESS_LIST_TX: &str = "/eth.evm.v1.AccessListTx";
pub const DYNAMIC_FEE_TX: &str = "/eth.evm.v1.DynamicFeeTx";

/// Result of decoding a raw consensus transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedTx {
    Ethereum(EthTx),
    NotEthereum,
}

/// A consensus tx that carries the Ethereum extension option.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EthTx {
    /// Every message of the tx, in order.
    pub msgs: Vec<TxMsg>,
}

impl EthTx {
    pub fn new(msgs: Vec<TxMsg>) -> Self {
        Self { msgs }
    }

    /// The Ethereum message at position `msg_index`, if that message is one.
    pub fn eth_msg(&self, msg_index: usize) -> Option<&EthMsg> {
        match self.msgs.get(msg_index)? {
            TxMsg::Ethereum(m) => Some(m),
            TxMsg::Other { .. } => None,
        }
    }
}

/// A message inside an Ethereum carrier tx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxMsg {
    Ethereum(EthMsg),
    Other { type_url: String },
}

/// The parts of an Ethereum message the index needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthMsg {
    pub hash: B256,
    /// Declared gas limit.
    pub gas_limit: u64,
}

/// Decodes raw consensus transaction bytes.
pub trait TxDecoder: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Result<DecodedTx, IndexerError>;
}

// ─── Cosmos SDK protobuf decoder ─────────────────────────────────────────────

/// Minimal protobuf definitions for the Cosmos SDK tx envelope and the
/// `eth.evm.v1` messages. Unknown fields are skipped by `prost`.
pub mod proto {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TxRaw {
        #[prost(bytes = "vec", tag = "1")]
        pub body_bytes: Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub auth_info_bytes: Vec<u8>,
        #[prost(bytes = "vec", repeated, tag = "3")]
        pub signatures: Vec<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TxBody {
        #[prost(message, repeated, tag = "1")]
        pub messages: Vec<Any>,
        #[prost(string, tag = "2")]
        pub memo: String,
        #[prost(uint64, tag = "3")]
        pub timeout_height: u64,
        #[prost(message, repeated, tag = "1023")]
        pub extension_options: Vec<Any>,
        #[prost(message, repeated, tag = "2047")]
        pub non_critical_extension_options: Vec<Any>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Any {
        #[prost(string, tag = "1")]
        pub type_url: String,
        #[prost(bytes = "vec", tag = "2")]
        pub value: Vec<u8>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct MsgEthereumTx {
        #[prost(message, optional, tag = "1")]
        pub data: Option<Any>,
        #[prost(double, tag = "2")]
        pub size: f64,
        #[prost(string, tag = "3")]
        pub hash: String,
        #[prost(string, tag = "4")]
        pub from: String,
    }

    /// `eth.evm.v1.LegacyTx`, gas only.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct LegacyTxGas {
        #[prost(uint64, tag = "3")]
        pub gas: u64,
    }

    /// `eth.evm.v1.AccessListTx`, gas only.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct AccessListTxGas {
        #[prost(uint64, tag = "4")]
        pub gas: u64,
    }

    /// `eth.evm.v1.DynamicFeeTx`, gas only.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct DynamicFeeTxGas {
        #[prost(uint64, tag = "5")]
        pub gas: u64,
    }
}

/// Decodes Cosmos SDK `TxRaw` bytes.
#[derive(Debug, Default, Clone)]
pub struct CosmosTxDecoder;

impl CosmosTxDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl TxDecoder for CosmosTxDecoder {
    fn decode(&self, raw: &[u8]) -> Result<DecodedTx, IndexerError> {
        let tx_raw = proto::TxRaw::decode(raw).map_err(|e| IndexerError::Decode(e.to_string()))?;
        let body = proto::TxBody::decode(tx_raw.body_bytes.as_slice())
            .map_err(|e| IndexerError::Decode(format!("tx body: {e}")))?;

        if !is_eth_carrier(&body) {
            return Ok(DecodedTx::NotEthereum);
        }

        let msgs = body
            .messages
            .iter()
            .map(decode_msg)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DecodedTx::Ethereum(EthTx::new(msgs)))
    }
}

fn is_eth_carrier(body: &proto::TxBody) -> bool {
    matches!(
        body.extension_options.as_slice(),
        [opt] if opt.type_url == EXTENSION_OPTIONS_ETHEREUM_TX
    )
}

fn decode_msg(any: &proto::Any) -> Result<TxMsg, IndexerError> {
    if any.type_url != MSG_ETHEREUM_TX {
        return Ok(TxMsg::Other { type_url: any.type_url.clone() });
    }
    let msg = proto::MsgEthereumTx::decode(any.value.as_slice())
        .map_err(|e| IndexerError::Decode(format!("MsgEthereumTx: {e}")))?;
    let hash = B256::from_str(&msg.hash)
        .map_err(|e| IndexerError::Decode(format!("MsgEthereumTx hash {:?}: {e}", msg.hash)))?;
    let gas_limit = match &msg.data {
        Some(data) => decode_gas(data)?,
        None => return Err(IndexerError::Decode("MsgEthereumTx without tx data".into())),
    };
    Ok(TxMsg::Ethereum(EthMsg { hash, gas_limit }))
}

fn decode_gas(data: &proto::Any) -> Result<u64, IndexerError> {
    let bytes = data.value.as_slice();
    let gas = match data.type_url.as_str() {
        LEGACY_TX => proto::LegacyTxGas::decode(bytes).map(|t| t.gas),
        ACCESS_LIST_TX => proto::AccessListTxGas::decode(bytes).map(|t| t.gas),
        DYNAMIC_FEE_TX => proto::DynamicFeeTxGas::decode(bytes).map(|t| t.gas),
        other => return Err(IndexerError::Decode(format!("unknown tx data type {other}"))),
    };
    gas.map_err(|e| IndexerError::Decode(format!("{}: {e}", data.type_url)))
}

/// Encode an Ethereum carrier tx the way a Cosmos SDK client would.
///
/// Used by tests and tooling that need realistic tx bytes.
pub fn encode_eth_tx(msgs: &[EthMsg]) -> Vec<u8> {
    let messages = msgs
        .iter()
        .map(|m| proto::Any {
            type_url: MSG_ETHEREUM_TX.into(),
            value: proto::MsgEthereumTx {
                data: Some(proto::Any {
                    type_url: DYNAMIC_FEE_TX.into(),
                    value: proto::DynamicFeeTxGas { gas: m.gas_limit }.encode_to_vec(),
                }),
                size: 0.0,
                hash: format!("0x{}", hex::encode(m.hash)),
                from: String::new(),
            }
            .encode_to_vec(),
        })
        .collect();
    let body = proto::TxBody {
        messages,
        extension_options: vec![proto::Any {
            type_url: EXTENSION_OPTIONS_ETHEREUM_TX.into(),
            value: vec![],
        }],
        ..Default::default()
    };
    proto::TxRaw {
        body_bytes: body.encode_to_vec(),
        ..Default::default()
    }
    .encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank_send_tx() -> Vec<u8> {
        let body = proto::TxBody {
            messages: vec![proto::Any {
                type_url: "/cosmos.bank.v1beta1.MsgSend".into(),
                value: vec![],
            }],
            ..Default::default()
        };
        proto::TxRaw { body_bytes: body.encode_to_vec(), ..Default::default() }.encode_to_vec()
    }

    #[test]
    fn decodes_eth_carrier() {
        let msg = EthMsg { hash: B256::repeat_byte(7), gas_limit: 21000 };
        let decoded = CosmosTxDecoder.decode(&encode_eth_tx(&[msg])).unwrap();
        match decoded {
            DecodedTx::Ethereum(tx) => {
                assert_eq!(tx.msgs.len(), 1);
                assert_eq!(tx.eth_msg(0), Some(&msg));
            }
            DecodedTx::NotEthereum => panic!("expected an ethereum tx"),
        }
    }

    #[test]
    fn plain_cosmos_tx_is_not_ethereum() {
        assert_eq!(CosmosTxDecoder.decode(&bank_send_tx()).unwrap(), DecodedTx::NotEthereum);
    }

    #[test]
    fn eth_msgs_without_extension_option_are_not_ethereum() {
        let msg = EthMsg { hash: B256::repeat_byte(1), gas_limit: 1 };
        let raw = encode_eth_tx(&[msg]);
        let tx_raw = proto::TxRaw::decode(raw.as_slice()).unwrap();
        let mut body = proto::TxBody::decode(tx_raw.body_bytes.as_slice()).unwrap();
        body.extension_options.clear();
        let raw = proto::TxRaw { body_bytes: body.encode_to_vec(), ..Default::default() }
            .encode_to_vec();
        assert_eq!(CosmosTxDecoder.decode(&raw).unwrap(), DecodedTx::NotEthereum);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = CosmosTxDecoder.decode(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, IndexerError::Decode(_)));
    }

    #[test]
    fn non_eth_msg_inside_carrier_is_tagged_other() {
        let tx = EthTx::new(vec![TxMsg::Other { type_url: "/x.Msg".into() }]);
        assert!(tx.eth_msg(0).is_none());
        assert!(tx.eth_msg(5).is_none());
    }
}
