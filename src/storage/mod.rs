// Storage layer: chain store and the derived UTXO index

mod chain;
mod utxo_set;

pub use chain::{Blockchain, ChainIterator};
pub use utxo_set::{UtxoRecord, UtxoSet};
