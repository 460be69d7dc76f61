// Crate-wide error type

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Spend request exceeds the sender's unspent outputs
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },

    /// Address fails the base58check checksum
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A transaction input signature does not verify
    #[error("invalid signature on transaction {0}")]
    InvalidSignature(String),

    /// A transaction input references an output that is not on the chain
    #[error("referenced output not found for transaction {0}")]
    UnknownReferencedOutput(String),

    /// Block lookup failed
    #[error("block not found: {0}")]
    BlockNotFound(String),

    /// Transaction lookup failed
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    /// A chain store already exists where `createblockchain` would put one
    #[error("blockchain already exists")]
    ChainExists,

    /// No chain store found; `createblockchain` has not been run
    #[error("no existing blockchain found, create one first")]
    ChainNotFound,

    /// No wallet for the given address in the wallet file
    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    /// A peer could not be dialed
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    /// Wire or stored bytes failed to decode
    #[error("decode error: {0}")]
    Decode(String),

    /// Local persisted state failed to decode; fatal
    #[error("corrupt store: {0}")]
    CorruptStore(String),

    /// The nonce search ran out of nonces
    #[error("mining failed: {0}")]
    Mining(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
