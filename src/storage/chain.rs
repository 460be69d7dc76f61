// Persisted block store

use crate::consensus::ProofOfWork;
use crate::core::{Block, Hash256, Serializable, Transaction};
use crate::error::{Error, Result};
use secp256k1::SecretKey;
use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

const TIP_KEY: &[u8] = b"tip";
const HEIGHT_KEY: &[u8] = b"height";
const BLOCK_PREFIX: u8 = b'b';

const GENESIS_COINBASE_DATA: &[u8] = b"First block of the chain";

/// Blockchain backed by a sled database. Blocks are stored under their
/// hash; distinguished keys hold the tip hash and the best height.
pub struct Blockchain {
    db: sled::Db,
}

impl Blockchain {
    /// Initialise a new chain with a genesis coinbase paying `address`.
    /// Fails if a chain already exists at `path`.
    pub fn create<P: AsRef<Path>>(path: P, address: &str) -> Result<Self> {
        let db = sled::open(path)?;
        if db.contains_key(TIP_KEY)? {
            return Err(Error::ChainExists);
        }
        let chain = Self { db };
        chain.write_genesis(address)?;
        Ok(chain)
    }

    /// Open an existing chain. Fails if none has been created yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        if !db.contains_key(TIP_KEY)? {
            return Err(Error::ChainNotFound);
        }
        Ok(Self { db })
    }

    /// Fresh chain in a temporary database (dropped on close), for tests.
    pub fn create_temporary(address: &str) -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let chain = Self { db };
        chain.write_genesis(address)?;
        Ok(chain)
    }

    fn write_genesis(&self, address: &str) -> Result<()> {
        let pubkey_hash = crate::wallet::pubkey_hash_from_address(address)?;
        let coinbase = Transaction::coinbase(pubkey_hash, GENESIS_COINBASE_DATA.to_vec());

        let mut genesis = Block::new(unix_now(), vec![coinbase], Hash256::zero());
        let (nonce, hash) = ProofOfWork::new(&genesis)
            .run()
            .ok_or_else(|| Error::Mining("nonce space exhausted".to_string()))?;
        genesis.nonce = nonce;
        genesis.hash = hash;

        self.add_block(&genesis)?;
        log::info!("created blockchain with genesis block {}", genesis.hash);
        Ok(())
    }

    pub(crate) fn db(&self) -> &sled::Db {
        &self.db
    }

    pub fn tip(&self) -> Result<Hash256> {
        match self.db.get(TIP_KEY)? {
            Some(bytes) => Hash256::from_slice(&bytes)
                .map_err(|e| Error::CorruptStore(format!("tip hash: {}", e))),
            None => Err(Error::ChainNotFound),
        }
    }

    /// Height of the tip; the genesis block sits at height 0.
    pub fn get_best_height(&self) -> Result<u64> {
        match self.db.get(HEIGHT_KEY)? {
            Some(bytes) if bytes.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes);
                Ok(u64::from_be_bytes(raw))
            }
            Some(_) => Err(Error::CorruptStore("height key".to_string())),
            None => Err(Error::ChainNotFound),
        }
    }

    pub fn has_block(&self, hash: &Hash256) -> Result<bool> {
        Ok(self.db.contains_key(block_key(hash))?)
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Block> {
        match self.db.get(block_key(hash))? {
            Some(bytes) => Block::deserialize(&bytes)
                .map_err(|e| Error::CorruptStore(format!("block {}: {}", hash, e))),
            None => Err(Error::BlockNotFound(hash.to_hex())),
        }
    }

    /// Idempotent insert. A block whose parent is the current tip (or
    /// that lands in an empty store) advances the tip; any other block
    /// is stored without advancing it.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        let key = block_key(&block.hash);
        if self.db.contains_key(&key)? {
            return Ok(());
        }
        self.db.insert(key, block.serialize())?;

        match self.db.get(TIP_KEY)? {
            None => {
                self.db.insert(TIP_KEY, block.hash.as_bytes().as_slice())?;
                self.db.insert(HEIGHT_KEY, &0u64.to_be_bytes())?;
            }
            Some(tip_bytes) if tip_bytes.as_ref() == block.prev_block_hash.as_bytes() => {
                let height = self.get_best_height()?;
                self.db.insert(TIP_KEY, block.hash.as_bytes().as_slice())?;
                self.db.insert(HEIGHT_KEY, &(height + 1).to_be_bytes())?;
            }
            Some(_) => {
                log::debug!("stored non-extending block {}", block.hash);
            }
        }

        self.db.flush()?;
        Ok(())
    }

    /// Verify every non-coinbase transaction, seal a block extending the
    /// tip with proof-of-work, store it and advance the tip.
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        for tx in &transactions {
            if !tx.is_coinbase() {
                self.verify_transaction(tx)?;
            }
        }

        let tip = self.tip()?;
        let mut block = Block::new(unix_now(), transactions, tip);
        let (nonce, hash) = ProofOfWork::new(&block)
            .run()
            .ok_or_else(|| Error::Mining("nonce space exhausted".to_string()))?;
        block.nonce = nonce;
        block.hash = hash;

        self.add_block(&block)?;
        log::info!(
            "mined block {} with {} transaction(s)",
            block.hash,
            block.transactions.len()
        );
        Ok(block)
    }

    /// Hashes of all blocks strictly above `since_height`, oldest first.
    pub fn get_block_hashes(&self, since_height: u64) -> Result<Vec<Hash256>> {
        let best = self.get_best_height()?;
        if since_height >= best {
            return Ok(Vec::new());
        }

        let missing = (best - since_height) as usize;
        let mut hashes = Vec::with_capacity(missing);
        for block in self.iter()? {
            hashes.push(block?.hash);
            if hashes.len() == missing {
                break;
            }
        }
        hashes.reverse();
        Ok(hashes)
    }

    /// Walk the chain from the tip back to the genesis block.
    pub fn iter(&self) -> Result<ChainIterator<'_>> {
        Ok(ChainIterator {
            chain: self,
            current: self.tip()?,
        })
    }

    /// Linear scan of the chain for a transaction by id.
    pub fn find_transaction(&self, id: &Hash256) -> Result<Transaction> {
        for block in self.iter()? {
            let block = block?;
            for tx in block.transactions {
                if tx.id == *id {
                    return Ok(tx);
                }
            }
        }
        Err(Error::TransactionNotFound(id.to_hex()))
    }

    /// The transactions referenced by `tx`'s inputs, keyed by hex id.
    fn referenced_transactions(&self, tx: &Transaction) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        for input in &tx.inputs {
            if input.is_coinbase() {
                continue;
            }
            let prev = self.find_transaction(&input.prev_txid).map_err(|_| {
                Error::UnknownReferencedOutput(input.prev_txid.to_hex())
            })?;
            prev_txs.insert(prev.id.to_hex(), prev);
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, secret_key: &SecretKey) -> Result<()> {
        let prev_txs = self.referenced_transactions(tx)?;
        tx.sign(secret_key, &prev_txs)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<()> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let prev_txs = self.referenced_transactions(tx)?;
        tx.verify(&prev_txs)
    }
}

fn block_key(hash: &Hash256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(BLOCK_PREFIX);
    key.extend_from_slice(hash.as_bytes());
    key
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Tip-to-genesis block iterator
pub struct ChainIterator<'a> {
    chain: &'a Blockchain,
    current: Hash256,
}

impl Iterator for ChainIterator<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_zero() {
            return None;
        }
        match self.chain.get_block(&self.current) {
            Ok(block) => {
                self.current = block.prev_block_hash;
                Some(Ok(block))
            }
            Err(e) => {
                self.current = Hash256::zero();
                Some(Err(e))
            }
        }
    }
}
