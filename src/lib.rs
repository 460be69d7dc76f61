// Educational peer-to-peer cryptocurrency node

pub mod cli;
pub mod consensus;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use cli::{Cli, CliHandler};
pub use core::{Block, Hash256, Transaction, TxInput, TxOutput};
pub use error::{Error, Result};
pub use network::{Mempool, Message, NodeContext, Peers};
pub use storage::{Blockchain, UtxoSet};
pub use wallet::{Wallet, Wallets};
