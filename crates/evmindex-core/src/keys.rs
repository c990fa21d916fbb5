//! Key codec for the two index key families.
//!
//! ```text
//! 0x01 ‖ tx_hash[32]                          → TxResult (protobuf)
//! 0x02 ‖ height (u64 BE) ‖ eth_tx_index (u64 BE) → tx_hash[32]
//! ```
//!
//! Both integers of the index key are fixed-width big-endian, so the byte
//! order of index keys is the (height, eth_tx_index) order.

use alloy_primitives::B256;

use crate::error::IndexerError;

pub const KEY_PREFIX_TX_HASH: u8 = 1;
pub const KEY_PREFIX_TX_INDEX: u8 = 2;

/// Length of a tx-hash key.
pub const TX_HASH_KEY_LEN: usize = 1 + 32;
/// Length of a tx-index key.
pub const TX_INDEX_KEY_LEN: usize = 1 + 8 + 8;

/// Key for `tx hash → tx result`.
pub fn tx_hash_key(hash: &B256) -> [u8; TX_HASH_KEY_LEN] {
    let mut key = [0u8; TX_HASH_KEY_LEN];
    key[0] = KEY_PREFIX_TX_HASH;
    key[1..].copy_from_slice(hash.as_slice());
    key
}

/// Key for `(block height, eth tx index) → tx hash`.
pub fn tx_index_key(height: i64, eth_tx_index: i32) -> [u8; TX_INDEX_KEY_LEN] {
    let mut key = [0u8; TX_INDEX_KEY_LEN];
    key[0] = KEY_PREFIX_TX_INDEX;
    key[1..9].copy_from_slice(&(height as u64).to_be_bytes());
    key[9..].copy_from_slice(&(eth_tx_index as i64 as u64).to_be_bytes());
    key
}

/// Half-open `[start, end)` range covering every tx-index key.
pub fn tx_index_key_range() -> ([u8; 1], [u8; 1]) {
    ([KEY_PREFIX_TX_INDEX], [KEY_PREFIX_TX_INDEX + 1])
}

/// Decode the block height out of a tx-index key.
pub fn parse_block_number_from_key(key: &[u8]) -> Result<i64, IndexerError> {
    if key.len() != TX_INDEX_KEY_LEN {
        return Err(IndexerError::MalformedKey {
            expected: TX_INDEX_KEY_LEN,
            got: key.len(),
        });
    }
    let mut height = [0u8; 8];
    height.copy_from_slice(&key[1..9]);
    Ok(u64::from_be_bytes(height) as i64)
}
