// Block data structures

use crate::core::serialize::{
    get_array, get_bytes, get_format_version, get_u64, get_varint, put_bytes, put_format_version,
    put_u64, put_varint, Serializable,
};
use crate::core::{sha256, Hash256, Transaction};
use crate::error::Result;
use std::io::Cursor;

/// Block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Unix timestamp at creation
    pub timestamp: u64,
    /// Transactions, coinbase first
    pub transactions: Vec<Transaction>,
    /// Hash of the previous block (zero for genesis)
    pub prev_block_hash: Hash256,
    /// The proof-of-work digest that sealed this block
    pub hash: Hash256,
    /// Nonce that produced the sealing digest
    pub nonce: u64,
}

impl Block {
    /// Create an unsealed block. The caller runs proof-of-work and fills
    /// in `hash` and `nonce` before the block is stored or shipped.
    pub fn new(timestamp: u64, transactions: Vec<Transaction>, prev_block_hash: Hash256) -> Self {
        Self {
            timestamp,
            transactions,
            prev_block_hash,
            hash: Hash256::zero(),
            nonce: 0,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash.is_zero()
    }

    /// Transaction commitment: SHA-256 over the concatenation of all
    /// transaction ids in block order.
    pub fn hash_transactions(&self) -> Hash256 {
        let mut data = Vec::with_capacity(self.transactions.len() * 32);
        for tx in &self.transactions {
            data.extend_from_slice(tx.id.as_bytes());
        }
        sha256(&data)
    }
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_format_version(&mut buf);
        put_u64(&mut buf, self.timestamp);
        buf.extend_from_slice(self.prev_block_hash.as_bytes());
        buf.extend_from_slice(self.hash.as_bytes());
        put_u64(&mut buf, self.nonce);

        put_varint(&mut buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            put_bytes(&mut buf, &tx.serialize());
        }

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        get_format_version(&mut cursor)?;

        let timestamp = get_u64(&mut cursor)?;
        let prev_block_hash = Hash256::new(get_array(&mut cursor)?);
        let hash = Hash256::new(get_array(&mut cursor)?);
        let nonce = get_u64(&mut cursor)?;

        let tx_count = get_varint(&mut cursor)? as usize;
        let mut transactions = Vec::with_capacity(tx_count);
        for _ in 0..tx_count {
            let tx_bytes = get_bytes(&mut cursor)?;
            transactions.push(Transaction::deserialize(&tx_bytes)?);
        }

        Ok(Self {
            timestamp,
            transactions,
            prev_block_hash,
            hash,
            nonce,
        })
    }
}
