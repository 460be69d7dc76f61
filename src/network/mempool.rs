// Transient pool of transactions awaiting inclusion in a block

use crate::core::Transaction;
use std::collections::HashMap;

/// Unordered map from hex transaction id to transaction. No size bound,
/// no replacement policy; entries leave when a block is mined.
#[derive(Debug, Default)]
pub struct Mempool {
    txs: HashMap<String, Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self {
            txs: HashMap::new(),
        }
    }

    pub fn insert(&mut self, tx: Transaction) {
        self.txs.insert(tx.id.to_hex(), tx);
    }

    pub fn contains(&self, txid_hex: &str) -> bool {
        self.txs.contains_key(txid_hex)
    }

    pub fn get(&self, txid_hex: &str) -> Option<&Transaction> {
        self.txs.get(txid_hex)
    }

    /// Remove and return every pending transaction.
    pub fn drain(&mut self) -> Vec<Transaction> {
        self.txs.drain().map(|(_, tx)| tx).collect()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    fn sample_tx() -> Transaction {
        let wallet = Wallet::new();
        Transaction::coinbase(wallet.pubkey_hash(), Vec::new())
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut mempool = Mempool::new();
        let tx = sample_tx();
        let id = tx.id.to_hex();

        assert!(!mempool.contains(&id));
        mempool.insert(tx);
        assert!(mempool.contains(&id));
        assert_eq!(mempool.get(&id).unwrap().id.to_hex(), id);
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_insert_same_id_is_idempotent() {
        let mut mempool = Mempool::new();
        let tx = sample_tx();
        mempool.insert(tx.clone());
        mempool.insert(tx);
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_drain_empties_pool() {
        let mut mempool = Mempool::new();
        mempool.insert(sample_tx());
        mempool.insert(sample_tx());

        let drained = mempool.drain();
        assert_eq!(drained.len(), 2);
        assert!(mempool.is_empty());
    }
}
