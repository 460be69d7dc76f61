// Transaction data structures, signing and verification

use crate::core::serialize::{
    get_array, get_bytes, get_format_version, get_i32, get_u64, get_varint, put_bytes,
    put_format_version, put_i32, put_u64, put_varint, Serializable,
};
use crate::core::{sha256, Hash256};
use crate::error::{Error, Result};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read};

/// Fixed block subsidy paid by every coinbase transaction.
pub const SUBSIDY: u64 = 10;

/// Output index carried by the coinbase input.
pub const COINBASE_VOUT: i32 = -1;

/// Transaction input - spends one output of a prior transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Id of the transaction whose output is being spent (zero for coinbase)
    pub prev_txid: Hash256,
    /// Index of the output within that transaction (-1 for coinbase)
    pub vout: i32,
    /// Compact (r || s) ECDSA signature over the spending context
    pub signature: Vec<u8>,
    /// Spender's raw uncompressed public key (arbitrary data for coinbase)
    pub pubkey: Vec<u8>,
}

impl TxInput {
    pub fn new(prev_txid: Hash256, vout: i32, pubkey: Vec<u8>) -> Self {
        Self {
            prev_txid,
            vout,
            signature: Vec::new(),
            pubkey,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.prev_txid.is_zero() && self.vout == COINBASE_VOUT
    }
}

/// Transaction output - locks a value to a public-key hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub pubkey_hash: [u8; 20],
}

impl TxOutput {
    pub fn new(value: u64, pubkey_hash: [u8; 20]) -> Self {
        Self { value, pubkey_hash }
    }

    pub fn is_locked_with(&self, pubkey_hash: &[u8; 20]) -> bool {
        self.pubkey_hash == *pubkey_hash
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// SHA-256 of the serialized transaction with this field zeroed
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash256::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.hash();
        tx
    }

    /// Create a coinbase transaction paying the subsidy to `to`.
    /// When `data` is empty, random bytes are used so that repeated
    /// rewards to the same address still get distinct ids.
    pub fn coinbase(to: [u8; 20], data: Vec<u8>) -> Self {
        let data = if data.is_empty() {
            let random: [u8; 20] = rand::random();
            random.to_vec()
        } else {
            data
        };

        let input = TxInput {
            prev_txid: Hash256::zero(),
            vout: COINBASE_VOUT,
            signature: Vec::new(),
            pubkey: data,
        };
        let output = TxOutput::new(SUBSIDY, to);
        Self::new(vec![input], vec![output])
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Transaction id: SHA-256 of the serialized form with the id cleared
    pub fn hash(&self) -> Hash256 {
        let mut copy = self.clone();
        copy.id = Hash256::zero();
        sha256(&copy.serialize())
    }

    /// Copy with every input's signature and public-key fields cleared,
    /// the shape both signing and verification hash over.
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                prev_txid: input.prev_txid,
                vout: input.vout,
                signature: Vec::new(),
                pubkey: Vec::new(),
            })
            .collect();
        let outputs = self.outputs.clone();

        Transaction {
            id: self.id,
            inputs,
            outputs,
        }
    }

    /// The digest signed for input `index`: the trimmed copy carries the
    /// referenced output's pubkey-hash in that input's public-key field,
    /// and is hashed with its id cleared.
    fn signing_digest(
        trimmed: &mut Transaction,
        index: usize,
        prev_txs: &HashMap<String, Transaction>,
    ) -> Result<Hash256> {
        let input = &trimmed.inputs[index];
        let prev_tx = prev_txs
            .get(&input.prev_txid.to_hex())
            .ok_or_else(|| Error::UnknownReferencedOutput(input.prev_txid.to_hex()))?;
        let referenced = prev_tx
            .outputs
            .get(input.vout as usize)
            .ok_or_else(|| Error::UnknownReferencedOutput(input.prev_txid.to_hex()))?;

        trimmed.inputs[index].pubkey = referenced.pubkey_hash.to_vec();
        let digest = trimmed.hash();
        trimmed.inputs[index].pubkey = Vec::new();
        Ok(digest)
    }

    /// Sign every input with the spender's secret key. `prev_txs` must
    /// contain each referenced transaction, keyed by hex id.
    pub fn sign(
        &mut self,
        secret_key: &SecretKey,
        prev_txs: &HashMap<String, Transaction>,
    ) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let secp = Secp256k1::new();
        let mut trimmed = self.trimmed_copy();

        for index in 0..self.inputs.len() {
            let digest = Self::signing_digest(&mut trimmed, index, prev_txs)?;
            let message = Message::from_digest_slice(digest.as_bytes())
                .map_err(|e| Error::InvalidSignature(format!("{}: {}", self.id, e)))?;
            let signature = secp.sign_ecdsa(&message, secret_key);
            self.inputs[index].signature = signature.serialize_compact().to_vec();
        }

        Ok(())
    }

    /// Verify every input's signature against its stored public key.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let secp = Secp256k1::verification_only();
        let mut trimmed = self.trimmed_copy();

        for index in 0..self.inputs.len() {
            let digest = Self::signing_digest(&mut trimmed, index, prev_txs)?;
            let input = &self.inputs[index];

            let message = Message::from_digest_slice(digest.as_bytes())
                .map_err(|e| Error::InvalidSignature(format!("{}: {}", self.id, e)))?;
            let signature = Signature::from_compact(&input.signature)
                .map_err(|_| Error::InvalidSignature(self.id.to_hex()))?;
            let pubkey = PublicKey::from_slice(&input.pubkey)
                .map_err(|_| Error::InvalidSignature(self.id.to_hex()))?;

            secp.verify_ecdsa(&message, &signature, &pubkey)
                .map_err(|_| Error::InvalidSignature(self.id.to_hex()))?;
        }

        Ok(())
    }

    pub(crate) fn from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        get_format_version(reader)?;
        let id = Hash256::new(get_array(reader)?);

        let input_count = get_varint(reader)? as usize;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TxInput {
                prev_txid: Hash256::new(get_array(reader)?),
                vout: get_i32(reader)?,
                signature: get_bytes(reader)?,
                pubkey: get_bytes(reader)?,
            });
        }

        let output_count = get_varint(reader)? as usize;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TxOutput {
                value: get_u64(reader)?,
                pubkey_hash: get_array(reader)?,
            });
        }

        Ok(Self {
            id,
            inputs,
            outputs,
        })
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_format_version(&mut buf);
        buf.extend_from_slice(self.id.as_bytes());

        put_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            buf.extend_from_slice(input.prev_txid.as_bytes());
            put_i32(&mut buf, input.vout);
            put_bytes(&mut buf, &input.signature);
            put_bytes(&mut buf, &input.pubkey);
        }

        put_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            put_u64(&mut buf, output.value);
            buf.extend_from_slice(&output.pubkey_hash);
        }

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        Self::from_reader(&mut cursor)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "--- Transaction {}", self.id)?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "    Input {}:", i)?;
            writeln!(f, "      TXID:      {}", input.prev_txid)?;
            writeln!(f, "      Out:       {}", input.vout)?;
            writeln!(f, "      Signature: {}", hex::encode(&input.signature))?;
            writeln!(f, "      PubKey:    {}", hex::encode(&input.pubkey))?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "    Output {}:", i)?;
            writeln!(f, "      Value:  {}", output.value)?;
            writeln!(f, "      Script: {}", hex::encode(output.pubkey_hash))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    fn coinbase_to(wallet: &Wallet) -> Transaction {
        Transaction::coinbase(wallet.pubkey_hash(), Vec::new())
    }

    /// One input spending `prev`'s first output, paying `to_hash`.
    fn spend(prev: &Transaction, pubkey: Vec<u8>, to_hash: [u8; 20]) -> Transaction {
        let input = TxInput::new(prev.id, 0, pubkey);
        let output = TxOutput::new(prev.outputs[0].value, to_hash);
        Transaction::new(vec![input], vec![output])
    }

    #[test]
    fn test_coinbase_shape() {
        let wallet = Wallet::new();
        let tx = coinbase_to(&wallet);

        assert!(tx.is_coinbase());
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.inputs[0].vout, COINBASE_VOUT);
        assert!(tx.inputs[0].prev_txid.is_zero());
        assert_eq!(tx.outputs[0].value, SUBSIDY);
    }

    #[test]
    fn test_coinbase_ids_are_distinct() {
        let wallet = Wallet::new();
        let a = coinbase_to(&wallet);
        let b = coinbase_to(&wallet);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_serialize_round_trip() {
        let wallet = Wallet::new();
        let tx = coinbase_to(&wallet);

        let decoded = Transaction::deserialize(&tx.serialize()).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn test_id_ignores_stored_id() {
        let wallet = Wallet::new();
        let mut tx = coinbase_to(&wallet);
        let id = tx.hash();

        tx.id = Hash256::new([9u8; 32]);
        assert_eq!(tx.hash(), id);
    }

    #[test]
    fn test_sign_and_verify() {
        let sender = Wallet::new();
        let recipient = Wallet::new();

        let prev = coinbase_to(&sender);
        let mut prev_txs = HashMap::new();
        prev_txs.insert(prev.id.to_hex(), prev.clone());

        let mut tx = spend(&prev, sender.pubkey_bytes(), recipient.pubkey_hash());
        tx.sign(sender.secret_key(), &prev_txs).unwrap();

        assert!(tx.verify(&prev_txs).is_ok());
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let sender = Wallet::new();
        let thief = Wallet::new();
        let recipient = Wallet::new();

        let prev = coinbase_to(&sender);
        let mut prev_txs = HashMap::new();
        prev_txs.insert(prev.id.to_hex(), prev.clone());

        // Signed by the thief but claiming the sender's key
        let mut tx = spend(&prev, sender.pubkey_bytes(), recipient.pubkey_hash());
        tx.sign(thief.secret_key(), &prev_txs).unwrap();

        assert!(matches!(
            tx.verify(&prev_txs),
            Err(Error::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_verify_rejects_tampered_output() {
        let sender = Wallet::new();
        let recipient = Wallet::new();

        let prev = coinbase_to(&sender);
        let mut prev_txs = HashMap::new();
        prev_txs.insert(prev.id.to_hex(), prev.clone());

        let mut tx = spend(&prev, sender.pubkey_bytes(), recipient.pubkey_hash());
        tx.sign(sender.secret_key(), &prev_txs).unwrap();

        tx.outputs[0].value += 1;
        assert!(tx.verify(&prev_txs).is_err());
    }

    #[test]
    fn test_verify_unknown_referenced_output() {
        let sender = Wallet::new();
        let recipient = Wallet::new();

        let prev = coinbase_to(&sender);
        let tx = spend(&prev, sender.pubkey_bytes(), recipient.pubkey_hash());

        // Empty map: the referenced transaction is nowhere on the chain
        let result = tx.verify(&HashMap::new());
        assert!(matches!(result, Err(Error::UnknownReferencedOutput(_))));
    }
}
