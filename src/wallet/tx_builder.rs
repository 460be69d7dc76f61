// Building signed value transfers from unspent outputs

use crate::core::{Hash256, Transaction, TxInput, TxOutput};
use crate::error::{Error, Result};
use crate::storage::{Blockchain, UtxoSet};
use crate::wallet::{pubkey_hash_from_address, Wallet};

/// Build and sign a transaction sending `amount` from `wallet` to the
/// `to` address, spending a minimal prefix of the sender's unspent
/// outputs and returning change to the sender.
pub fn new_utxo_transaction(
    chain: &Blockchain,
    wallet: &Wallet,
    to: &str,
    amount: u64,
) -> Result<Transaction> {
    let to_pubkey_hash = pubkey_hash_from_address(to)?;
    let sender_pubkey_hash = wallet.pubkey_hash();

    let utxo_set = UtxoSet::new(chain);
    let (accumulated, spendable) = utxo_set.find_spendable_outputs(&sender_pubkey_hash, amount)?;
    if accumulated < amount {
        return Err(Error::InsufficientFunds {
            have: accumulated,
            need: amount,
        });
    }

    let mut inputs = Vec::new();
    for (txid_hex, vouts) in spendable {
        let prev_txid = Hash256::from_hex(&txid_hex)?;
        for vout in vouts {
            inputs.push(TxInput::new(prev_txid, vout, wallet.pubkey_bytes()));
        }
    }

    let mut outputs = vec![TxOutput::new(amount, to_pubkey_hash)];
    let change = accumulated - amount;
    if change > 0 {
        outputs.push(TxOutput::new(change, sender_pubkey_hash));
    }

    let mut tx = Transaction::new(inputs, outputs);
    chain.sign_transaction(&mut tx, wallet.secret_key())?;
    Ok(tx)
}
