// Wallets and transaction building

mod keys;
mod tx_builder;
mod wallets;

pub use keys::{
    address_from_pubkey_hash, pubkey_hash_from_address, validate_address, Wallet, ADDRESS_VERSION,
};
pub use tx_builder::new_utxo_transaction;
pub use wallets::{Wallets, WALLET_FILE};
