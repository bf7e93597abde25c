//! Block header serialization and hashing.

use bitcoin::block::{Header, Version};
use bitcoin::consensus::serialize;
use bitcoin::hash_types::{BlockHash, TxMerkleNode};
use bitcoin::pow::CompactTarget;

/// Version field used for assembled headers (BIP9 top bits, no signals).
pub const HEADER_VERSION: i32 = 0x2000_0000;

/// An 80-byte header together with its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledHeader {
    /// Serialized header, every integer little-endian and both hashes in
    /// internal byte order
    pub bytes: Vec<u8>,

    /// Double-SHA256 of `bytes`. Its `Display` is the big-endian form.
    pub hash: BlockHash,
}

/// Assemble a header with the bridge's fixed version.
///
/// `prev_blockhash` and `merkle_root` are typed hashes, so the reversal from
/// display hex into internal order already happened when they were parsed.
pub fn assemble_header(
    prev_blockhash: BlockHash,
    merkle_root: TxMerkleNode,
    time: u32,
    bits: CompactTarget,
    nonce: u32,
) -> AssembledHeader {
    serialize_header(HEADER_VERSION, prev_blockhash, merkle_root, time, bits, nonce)
}

/// Assemble a header with an explicit version.
pub fn serialize_header(
    version: i32,
    prev_blockhash: BlockHash,
    merkle_root: TxMerkleNode,
    time: u32,
    bits: CompactTarget,
    nonce: u32,
) -> AssembledHeader {
    let header = Header {
        version: Version::from_consensus(version),
        prev_blockhash,
        merkle_root,
        time,
        bits,
        nonce,
    };

    AssembledHeader {
        bytes: serialize(&header),
        hash: header.block_hash(),
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bitcoin::hashes::Hash;

    use super::*;

    fn genesis() -> AssembledHeader {
        serialize_header(
            1,
            BlockHash::all_zeros(),
            TxMerkleNode::from_str(
                "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
            )
            .unwrap(),
            1_231_006_505,
            CompactTarget::from_consensus(0x1d00ffff),
            2_083_236_893,
        )
    }

    #[test]
    fn genesis_header_bytes() {
        let header = genesis();
        let expected = concat!(
            "01000000",
            "0000000000000000000000000000000000000000000000000000000000000000",
            "3ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a",
            "29ab5f49",
            "ffff001d",
            "1dac2b7c",
        );
        assert_eq!(hex::encode(&header.bytes), expected);
        assert_eq!(header.bytes.len(), 80);
    }

    #[test]
    fn genesis_header_hash() {
        assert_eq!(
            genesis().hash.to_string(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
    }

    #[test]
    fn field_layout_with_bridge_version() {
        let prev = BlockHash::from_str(
            "000000000002d01c1fccc21636b607dfd930d31d01c3a62104612a1719011250",
        )
        .unwrap();
        let header = assemble_header(
            prev,
            TxMerkleNode::all_zeros(),
            0x11223344,
            CompactTarget::from_consensus(0x1b04864c),
            0,
        );

        let bytes = &header.bytes;
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x00, 0x20]);
        // Display hex ends ...1250, so internal order starts 50 12
        assert_eq!(&bytes[4..6], &[0x50, 0x12]);
        assert_eq!(&bytes[29..36], &[0xd0, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[36..68], &[0u8; 32]);
        assert_eq!(&bytes[68..72], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(&bytes[72..76], &[0x4c, 0x86, 0x04, 0x1b]);
        assert_eq!(&bytes[76..80], &[0u8; 4]);
    }

    #[test]
    fn assembly_is_deterministic() {
        let build = || {
            assemble_header(
                BlockHash::all_zeros(),
                TxMerkleNode::all_zeros(),
                1_700_000_000,
                CompactTarget::from_consensus(0x1d00ffff),
                7,
            )
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn nonce_changes_hash() {
        let with_nonce = |nonce| {
            assemble_header(
                BlockHash::all_zeros(),
                TxMerkleNode::all_zeros(),
                1_700_000_000,
                CompactTarget::from_consensus(0x1d00ffff),
                nonce,
            )
        };
        assert_ne!(with_nonce(0).hash, with_nonce(1).hash);
    }
}
