// Proof of work

use crate::core::{sha256, Block, Hash256};
use num_bigint::BigUint;
use std::time::Instant;

/// Number of leading zero bits a valid block hash must carry.
pub const TARGET_BITS: u32 = 16;

/// Upper bound of the nonce search.
pub const MAX_NONCE: u64 = i64::MAX as u64;

/// Nonce search and verification against the fixed difficulty target.
pub struct ProofOfWork<'a> {
    block: &'a Block,
    target: BigUint,
}

impl<'a> ProofOfWork<'a> {
    pub fn new(block: &'a Block) -> Self {
        // target = 2^(256 - TARGET_BITS); a hash is valid iff, read as a
        // big-endian integer, it is strictly below this.
        let target = BigUint::from(1u8) << (256 - TARGET_BITS as usize);
        Self { block, target }
    }

    /// The hashed payload for one attempt: previous hash, transaction
    /// commitment, then timestamp, target bits and nonce as big-endian
    /// 64-bit integers.
    fn prepare_data(&self, nonce: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 + 32 + 8 + 8 + 8);
        data.extend_from_slice(self.block.prev_block_hash.as_bytes());
        data.extend_from_slice(self.block.hash_transactions().as_bytes());
        data.extend_from_slice(&self.block.timestamp.to_be_bytes());
        data.extend_from_slice(&(TARGET_BITS as u64).to_be_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        data
    }

    /// Search for a nonce whose digest falls below the target. Returns
    /// the nonce and the solution digest, or `None` if the nonce space
    /// is exhausted.
    pub fn run(&self) -> Option<(u64, Hash256)> {
        let started = Instant::now();
        log::debug!("mining a new block with {} target bits", TARGET_BITS);

        for nonce in 0..MAX_NONCE {
            let hash = sha256(&self.prepare_data(nonce));
            let hash_int = BigUint::from_bytes_be(hash.as_bytes());

            if hash_int < self.target {
                log::debug!(
                    "found nonce {} after {:?}, hash {}",
                    nonce,
                    started.elapsed(),
                    hash
                );
                return Some((nonce, hash));
            }
        }

        None
    }

    /// Recompute the digest with the stored nonce and check it against
    /// the target.
    pub fn validate(&self) -> bool {
        let hash = sha256(&self.prepare_data(self.block.nonce));
        let hash_int = BigUint::from_bytes_be(hash.as_bytes());
        hash == self.block.hash && hash_int < self.target
    }
}
