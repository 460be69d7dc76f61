// UTXO index derived from the chain store

use crate::core::serialize::{
    get_array, get_format_version, get_i32, get_u64, get_varint, put_format_version, put_i32,
    put_u64, put_varint,
};
use crate::core::{Block, Hash256};
use crate::error::{Error, Result};
use crate::storage::Blockchain;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;

const UTXO_PREFIX: u8 = b'u';

/// One unspent output of an indexed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoRecord {
    pub vout: i32,
    pub value: u64,
    pub pubkey_hash: [u8; 20],
}

/// Index of unspent outputs keyed by transaction id, stored in the same
/// database as the chain. The index borrows the chain store; it never
/// owns it.
pub struct UtxoSet<'a> {
    chain: &'a Blockchain,
}

impl<'a> UtxoSet<'a> {
    pub fn new(chain: &'a Blockchain) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> &Blockchain {
        self.chain
    }

    /// Rebuild the index from scratch by walking the chain from tip to
    /// genesis, dropping every output later consumed as an input.
    pub fn reindex(&self) -> Result<()> {
        let db = self.chain.db();

        let stale: Vec<sled::IVec> = db
            .scan_prefix([UTXO_PREFIX])
            .keys()
            .collect::<std::result::Result<_, sled::Error>>()?;
        for key in stale {
            db.remove(key)?;
        }

        let mut spent: HashMap<Hash256, HashSet<i32>> = HashMap::new();
        let mut unspent: HashMap<Hash256, Vec<UtxoRecord>> = HashMap::new();

        // Walking backwards means every spend is seen before the block
        // that created the output; within a block, spends are registered
        // before outputs for the same reason.
        for block in self.chain.iter()? {
            let block = block?;
            for tx in &block.transactions {
                if tx.is_coinbase() {
                    continue;
                }
                for input in &tx.inputs {
                    spent
                        .entry(input.prev_txid)
                        .or_default()
                        .insert(input.vout);
                }
            }
            for tx in &block.transactions {
                let spent_here = spent.get(&tx.id);
                for (idx, output) in tx.outputs.iter().enumerate() {
                    let vout = idx as i32;
                    if spent_here.is_some_and(|s| s.contains(&vout)) {
                        continue;
                    }
                    unspent.entry(tx.id).or_default().push(UtxoRecord {
                        vout,
                        value: output.value,
                        pubkey_hash: output.pubkey_hash,
                    });
                }
            }
        }

        let count = unspent.len();
        for (txid, records) in unspent {
            db.insert(utxo_key(&txid), encode_records(&records))?;
        }
        db.flush()?;

        log::info!("reindexed utxo set: {} transaction(s)", count);
        Ok(())
    }

    /// Apply a single block: consume each non-coinbase input's referenced
    /// output, then index every transaction's outputs.
    pub fn update(&self, block: &Block) -> Result<()> {
        let db = self.chain.db();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let key = utxo_key(&input.prev_txid);
                    let stored = db.get(&key)?.ok_or_else(|| {
                        Error::CorruptStore(format!(
                            "utxo entry missing for spent transaction {}",
                            input.prev_txid
                        ))
                    })?;
                    let remaining: Vec<UtxoRecord> = decode_records(&stored)?
                        .into_iter()
                        .filter(|record| record.vout != input.vout)
                        .collect();

                    if remaining.is_empty() {
                        db.remove(&key)?;
                    } else {
                        db.insert(&key, encode_records(&remaining))?;
                    }
                }
            }

            let records: Vec<UtxoRecord> = tx
                .outputs
                .iter()
                .enumerate()
                .map(|(idx, output)| UtxoRecord {
                    vout: idx as i32,
                    value: output.value,
                    pubkey_hash: output.pubkey_hash,
                })
                .collect();
            db.insert(utxo_key(&tx.id), encode_records(&records))?;
        }

        db.flush()?;
        Ok(())
    }

    /// Accumulate outputs locked to `pubkey_hash` until `amount` is
    /// covered. Returns the accumulated value (possibly short) and the
    /// chosen output indices per transaction.
    pub fn find_spendable_outputs(
        &self,
        pubkey_hash: &[u8; 20],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<i32>>)> {
        let mut accumulated = 0u64;
        let mut outputs: HashMap<String, Vec<i32>> = HashMap::new();

        'scan: for item in self.chain.db().scan_prefix([UTXO_PREFIX]) {
            let (key, value) = item?;
            let txid = hex::encode(&key[1..]);

            for record in decode_records(&value)? {
                if record.pubkey_hash != *pubkey_hash {
                    continue;
                }
                accumulated += record.value;
                outputs.entry(txid.clone()).or_default().push(record.vout);

                if accumulated >= amount {
                    break 'scan;
                }
            }
        }

        Ok((accumulated, outputs))
    }

    /// All unspent outputs locked to `pubkey_hash`, for balance queries.
    pub fn find_utxo(&self, pubkey_hash: &[u8; 20]) -> Result<Vec<UtxoRecord>> {
        let mut found = Vec::new();
        for item in self.chain.db().scan_prefix([UTXO_PREFIX]) {
            let (_, value) = item?;
            for record in decode_records(&value)? {
                if record.pubkey_hash == *pubkey_hash {
                    found.push(record);
                }
            }
        }
        Ok(found)
    }

    /// Number of distinct transactions with unspent outputs.
    pub fn count_transactions(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.chain.db().scan_prefix([UTXO_PREFIX]) {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

fn utxo_key(txid: &Hash256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(UTXO_PREFIX);
    key.extend_from_slice(txid.as_bytes());
    key
}

fn encode_records(records: &[UtxoRecord]) -> Vec<u8> {
    let mut buf = Vec::new();
    put_format_version(&mut buf);
    put_varint(&mut buf, records.len() as u64);
    for record in records {
        put_i32(&mut buf, record.vout);
        put_u64(&mut buf, record.value);
        buf.extend_from_slice(&record.pubkey_hash);
    }
    buf
}

fn decode_records(data: &[u8]) -> Result<Vec<UtxoRecord>> {
    let mut cursor = Cursor::new(data);
    let decode = |cursor: &mut Cursor<&[u8]>| -> Result<Vec<UtxoRecord>> {
        get_format_version(cursor)?;
        let count = get_varint(cursor)? as usize;
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            records.push(UtxoRecord {
                vout: get_i32(cursor)?,
                value: get_u64(cursor)?,
                pubkey_hash: get_array(cursor)?,
            });
        }
        Ok(records)
    };
    decode(&mut cursor).map_err(|e| Error::CorruptStore(format!("utxo records: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::wallet::{new_utxo_transaction, Wallet};

    fn indexed_chain(wallet: &Wallet) -> Blockchain {
        let chain = Blockchain::create_temporary(&wallet.address()).unwrap();
        UtxoSet::new(&chain).reindex().unwrap();
        chain
    }

    fn snapshot(chain: &Blockchain) -> HashMap<String, Vec<UtxoRecord>> {
        let mut map = HashMap::new();
        for item in chain.db().scan_prefix([UTXO_PREFIX]) {
            let (key, value) = item.unwrap();
            let mut records = decode_records(&value).unwrap();
            records.sort_by_key(|r| r.vout);
            map.insert(hex::encode(&key[1..]), records);
        }
        map
    }

    #[test]
    fn test_reindex_counts_genesis() {
        let wallet = Wallet::new();
        let chain = indexed_chain(&wallet);
        assert_eq!(UtxoSet::new(&chain).count_transactions().unwrap(), 1);
    }

    #[test]
    fn test_find_utxo_by_owner() {
        let wallet = Wallet::new();
        let other = Wallet::new();
        let chain = indexed_chain(&wallet);
        let utxo_set = UtxoSet::new(&chain);

        let mine = utxo_set.find_utxo(&wallet.pubkey_hash()).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].value, 10);

        assert!(utxo_set.find_utxo(&other.pubkey_hash()).unwrap().is_empty());
    }

    #[test]
    fn test_find_spendable_outputs_short_and_covered() {
        let wallet = Wallet::new();
        let chain = indexed_chain(&wallet);
        let utxo_set = UtxoSet::new(&chain);

        let (acc, outputs) = utxo_set
            .find_spendable_outputs(&wallet.pubkey_hash(), 4)
            .unwrap();
        assert!(acc >= 4);
        assert_eq!(outputs.len(), 1);

        let (acc, _) = utxo_set
            .find_spendable_outputs(&wallet.pubkey_hash(), 50)
            .unwrap();
        assert_eq!(acc, 10);
    }

    #[test]
    fn test_update_consumes_and_creates() {
        let alice = Wallet::new();
        let bob = Wallet::new();
        let chain = indexed_chain(&alice);
        let utxo_set = UtxoSet::new(&chain);

        let tx = new_utxo_transaction(&chain, &alice, &bob.address(), 4).unwrap();
        let coinbase = Transaction::coinbase(alice.pubkey_hash(), Vec::new());
        let block = chain.mine_block(vec![coinbase, tx]).unwrap();
        utxo_set.update(&block).unwrap();

        let alice_total: u64 = utxo_set
            .find_utxo(&alice.pubkey_hash())
            .unwrap()
            .iter()
            .map(|r| r.value)
            .sum();
        let bob_total: u64 = utxo_set
            .find_utxo(&bob.pubkey_hash())
            .unwrap()
            .iter()
            .map(|r| r.value)
            .sum();

        assert_eq!(alice_total, 16); // 10 coinbase + 6 change
        assert_eq!(bob_total, 4);
    }

    #[test]
    fn test_reindex_matches_incremental_updates() {
        let alice = Wallet::new();
        let bob = Wallet::new();
        let chain = indexed_chain(&alice);
        let utxo_set = UtxoSet::new(&chain);

        for amount in [2, 3] {
            let tx = new_utxo_transaction(&chain, &alice, &bob.address(), amount).unwrap();
            let coinbase = Transaction::coinbase(alice.pubkey_hash(), Vec::new());
            let block = chain.mine_block(vec![coinbase, tx]).unwrap();
            utxo_set.update(&block).unwrap();
        }

        let incremental = snapshot(&chain);
        utxo_set.reindex().unwrap();
        let rebuilt = snapshot(&chain);

        assert_eq!(incremental, rebuilt);
    }
}
