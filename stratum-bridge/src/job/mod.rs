//! Job assembly.
//!
//! Turns a node's block template into the job handed to workers: merkle
//! root over the template's transactions, a coinbase skeleton and a
//! serialized header. Everything in here is a pure function of its inputs,
//! apart from the random job id and creation time stamped onto each [`Job`].

mod coinbase;
mod header;
mod merkle;
mod template;

use std::str::FromStr;

use bitcoin::hash_types::{BlockHash, TxMerkleNode};
use bitcoin::hashes::Hash;
use bitcoin::pow::CompactTarget;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

pub use coinbase::{build_coinbase, height_push};
pub use header::{AssembledHeader, HEADER_VERSION, assemble_header, serialize_header};
pub use merkle::merkle_root;
pub use template::{BlockTemplate, TemplateTransaction};

/// Extranonce1 placed in assembled coinbases.
pub const EXTRANONCE1: [u8; 4] = [0x00; 4];

/// Extranonce2 placed in assembled coinbases.
pub const EXTRANONCE2: [u8; 1] = [0x00];

/// Compact target used when the template carries no `bits`.
pub const DEFAULT_BITS: u32 = 0x1d00ffff;

/// Reasons a template cannot be turned into a job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("invalid previous block hash {hash:?}: {reason}")]
    InvalidPrevHash { hash: String, reason: String },

    #[error("invalid txid {txid:?}: {reason}")]
    InvalidTxid { txid: String, reason: String },

    #[error("invalid bits {0:?}")]
    InvalidBits(String),
}

/// A unit of work derived from one block template.
///
/// Immutable once assembled. The broadcaster shares a single current job
/// with every session through an `Arc`.
#[derive(Debug, Clone)]
pub struct Job {
    /// Opaque unique identifier
    pub job_id: String,

    /// Height of the block being built
    pub height: u64,

    /// Previous block hash
    pub prev_blockhash: BlockHash,

    /// Target advertised to workers (full target or compact bits, as hex)
    pub target: String,

    /// Coinbase reward from the template, in satoshis
    pub coinbase_value: u64,

    /// Merkle root over the template transactions; `None` without any
    pub merkle_root: Option<TxMerkleNode>,

    /// Serialized coinbase skeleton
    pub coinbase: Vec<u8>,

    /// Serialized 80-byte header and its hash
    pub header: AssembledHeader,

    /// When this job was assembled
    pub created_at: OffsetDateTime,

    /// Publication order, stamped by the broadcaster; 0 until published
    pub sequence: u64,
}

impl Job {
    /// Assemble a job from a template.
    ///
    /// With no transactions the header's merkle field is all zeros while
    /// [`Job::merkle_root`] stays `None`.
    pub fn assemble(template: &BlockTemplate) -> Result<Self, AssemblyError> {
        let prev_blockhash = BlockHash::from_str(&template.previous_block_hash).map_err(|e| {
            AssemblyError::InvalidPrevHash {
                hash: template.previous_block_hash.clone(),
                reason: e.to_string(),
            }
        })?;

        let bits = match template.bits.as_deref() {
            Some(bits) => parse_bits(bits)?,
            None => CompactTarget::from_consensus(DEFAULT_BITS),
        };

        let merkle_root = merkle_root(&template.txids())?;
        let coinbase = build_coinbase(&EXTRANONCE1, &EXTRANONCE2, template.height, None);

        let created_at = OffsetDateTime::now_utc();
        let time = template
            .cur_time
            .unwrap_or_else(|| created_at.unix_timestamp().clamp(0, u32::MAX as i64) as u32);

        let header = assemble_header(
            prev_blockhash,
            merkle_root.unwrap_or_else(TxMerkleNode::all_zeros),
            time,
            bits,
            0,
        );

        Ok(Self {
            job_id: Uuid::new_v4().to_string(),
            height: template.height,
            prev_blockhash,
            target: template.advertised_target(),
            coinbase_value: template.coinbase_value,
            merkle_root,
            coinbase,
            header,
            created_at,
            sequence: 0,
        })
    }
}

fn parse_bits(bits: &str) -> Result<CompactTarget, AssemblyError> {
    u32::from_str_radix(bits.trim_start_matches("0x"), 16)
        .map(CompactTarget::from_consensus)
        .map_err(|_| AssemblyError::InvalidBits(bits.to_string()))
}
