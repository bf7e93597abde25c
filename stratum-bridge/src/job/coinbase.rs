//! Coinbase skeleton construction.
//!
//! The coinbase built here has the right shape (one null-outpoint input
//! carrying height and extranonces, one output) but pays nothing: its single
//! output is zero-valued with an empty script. Encoding a real payout
//! address belongs to whoever finalizes blocks, not to this bridge.

use bitcoin::absolute::LockTime;
use bitcoin::consensus::serialize;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

/// Build a serialized coinbase transaction.
///
/// The input script is the height push followed by `extranonce1`,
/// `extranonce2` and, if given, the placeholder script bytes, concatenated
/// as-is.
pub fn build_coinbase(
    extranonce1: &[u8],
    extranonce2: &[u8],
    height: u64,
    payout_script: Option<&[u8]>,
) -> Vec<u8> {
    let mut script_sig = height_push(height);
    script_sig.extend_from_slice(extranonce1);
    script_sig.extend_from_slice(extranonce2);
    if let Some(script) = payout_script {
        script_sig.extend_from_slice(script);
    }

    let tx = Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(script_sig),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: ScriptBuf::new(),
        }],
    };

    serialize(&tx)
}

/// Encode a block height as a minimal length-prefixed script push.
///
/// The number is little-endian with no trailing zero bytes, except that a
/// zero byte is appended when the top bit of the last byte is set so the
/// value does not read as negative.
pub fn height_push(height: u64) -> Vec<u8> {
    let mut number = Vec::with_capacity(9);
    let mut rest = height;
    while rest > 0 {
        number.push((rest & 0xff) as u8);
        rest >>= 8;
    }
    if number.last().is_some_and(|byte| byte & 0x80 != 0) {
        number.push(0x00);
    }

    let mut push = Vec::with_capacity(number.len() + 1);
    push.push(number.len() as u8);
    push.extend_from_slice(&number);
    push
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::consensus::deserialize;

    #[test]
    fn height_push_is_minimal() {
        assert_eq!(height_push(0), vec![0x00]);
        assert_eq!(height_push(1), vec![0x01, 0x01]);
        assert_eq!(height_push(100), vec![0x01, 0x64]);
        assert_eq!(height_push(127), vec![0x01, 0x7f]);
        assert_eq!(height_push(128), vec![0x02, 0x80, 0x00]);
        assert_eq!(height_push(255), vec![0x02, 0xff, 0x00]);
        assert_eq!(height_push(256), vec![0x02, 0x00, 0x01]);
        // 881,423 = 0x0d730f
        assert_eq!(height_push(881_423), vec![0x03, 0x0f, 0x73, 0x0d]);
    }

    #[test]
    fn byte_layout() {
        let bytes = build_coinbase(&[0xaa, 0xbb, 0xcc, 0xdd], &[0xee], 100, None);

        let mut expected = Vec::new();
        expected.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]); // version
        expected.push(0x01); // input count
        expected.extend_from_slice(&[0x00; 32]); // null prevout txid
        expected.extend_from_slice(&[0xff; 4]); // null prevout index
        expected.push(0x07); // script length
        expected.extend_from_slice(&[0x01, 0x64]); // height 100
        expected.extend_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee]); // extranonces
        expected.extend_from_slice(&[0xff; 4]); // sequence
        expected.push(0x01); // output count
        expected.extend_from_slice(&[0x00; 8]); // zero value
        expected.push(0x00); // empty script
        expected.extend_from_slice(&[0x00; 4]); // locktime

        assert_eq!(bytes, expected);
    }

    #[test]
    fn placeholder_script_follows_extranonces() {
        let bytes = build_coinbase(&[0x00; 4], &[0x00], 100, Some(b"/bridge/"));
        let tx: Transaction = deserialize(&bytes).expect("coinbase should parse");

        let script = tx.input[0].script_sig.as_bytes();
        assert!(script.ends_with(b"/bridge/"));
        assert_eq!(script.len(), 2 + 5 + 8);
    }

    #[test]
    fn parses_as_coinbase() {
        let bytes = build_coinbase(&[0x00; 4], &[0x00], 881_423, None);
        let tx: Transaction = deserialize(&bytes).expect("coinbase should parse");

        assert!(tx.is_coinbase());
        assert_eq!(tx.output.len(), 1);
        assert_eq!(tx.output[0].value, Amount::ZERO);
        assert!(tx.output[0].script_pubkey.is_empty());
        assert_eq!(tx.lock_time, LockTime::ZERO);
    }
}
