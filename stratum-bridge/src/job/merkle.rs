//! Merkle root computation over a template's transaction ids.

use std::str::FromStr;

use bitcoin::hash_types::{TxMerkleNode, Txid};
use bitcoin::hashes::{Hash, sha256d};

use super::AssemblyError;

/// Compute the merkle root of an ordered list of transaction ids.
///
/// Ids arrive in display (big-endian) hex, the way the node reports them,
/// and are hashed in their internal little-endian byte order. Returns `None`
/// for an empty list. A single id is its own root. Levels with an odd node
/// count pair their last node with itself.
///
/// Display the result with `to_string()` to get big-endian hex back.
pub fn merkle_root<S: AsRef<str>>(txids: &[S]) -> Result<Option<TxMerkleNode>, AssemblyError> {
    let mut level = txids
        .iter()
        .map(|txid| parse_txid(txid.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    if level.is_empty() {
        return Ok(None);
    }

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1];
            level.push(last);
        }

        level = level
            .chunks_exact(2)
            .map(|pair| {
                let mut combined = [0u8; 64];
                combined[..32].copy_from_slice(&pair[0]);
                combined[32..].copy_from_slice(&pair[1]);
                sha256d::Hash::hash(&combined).to_byte_array()
            })
            .collect();
    }

    Ok(Some(TxMerkleNode::from_byte_array(level[0])))
}

/// Parse a display-hex txid into internal byte order.
fn parse_txid(hex: &str) -> Result<[u8; 32], AssemblyError> {
    Txid::from_str(hex)
        .map(|txid| txid.to_byte_array())
        .map_err(|e| AssemblyError::InvalidTxid {
            txid: hex.to_string(),
            reason: e.to_string(),
        })
}
