// Key pairs and base58check addresses

use crate::core::{double_sha256, hash160};
use crate::error::{Error, Result};
use rand::rngs::OsRng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};

/// Version byte prefixed to the pubkey hash before encoding.
pub const ADDRESS_VERSION: u8 = 0x00;

const CHECKSUM_LEN: usize = 4;

/// A single key pair
#[derive(Clone)]
pub struct Wallet {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl Wallet {
    /// Generate a fresh key pair
    pub fn new() -> Self {
        let secp = Secp256k1::new();
        let mut rng = OsRng;
        let secret_key = SecretKey::new(&mut rng);
        let public_key = secret_key.public_key(&secp);

        Self {
            secret_key,
            public_key,
        }
    }

    /// Rebuild a wallet from a stored 32-byte secret key
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| Error::Decode(format!("invalid secret key: {}", e)))?;
        let public_key = secret_key.public_key(&secp);

        Ok(Self {
            secret_key,
            public_key,
        })
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret_key.secret_bytes()
    }

    /// Raw uncompressed SEC1 public key (65 bytes), the form carried in
    /// transaction inputs
    pub fn pubkey_bytes(&self) -> Vec<u8> {
        self.public_key.serialize_uncompressed().to_vec()
    }

    /// RIPEMD160(SHA256(pubkey))
    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.pubkey_bytes())
    }

    /// base58(version || pubkey_hash || checksum)
    pub fn address(&self) -> String {
        address_from_pubkey_hash(&self.pubkey_hash())
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// First four bytes of SHA256(SHA256(payload))
fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = double_sha256(payload);
    let mut sum = [0u8; CHECKSUM_LEN];
    sum.copy_from_slice(&digest[..CHECKSUM_LEN]);
    sum
}

pub fn address_from_pubkey_hash(pubkey_hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(1 + 20 + CHECKSUM_LEN);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(pubkey_hash);
    let sum = checksum(&payload);
    payload.extend_from_slice(&sum);
    bs58::encode(payload).into_string()
}

/// Decode an address back to its pubkey hash, verifying the checksum.
pub fn pubkey_hash_from_address(address: &str) -> Result<[u8; 20]> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|_| Error::InvalidAddress(address.to_string()))?;
    if decoded.len() != 1 + 20 + CHECKSUM_LEN {
        return Err(Error::InvalidAddress(address.to_string()));
    }

    let (payload, stored_sum) = decoded.split_at(decoded.len() - CHECKSUM_LEN);
    if checksum(payload) != stored_sum || payload[0] != ADDRESS_VERSION {
        return Err(Error::InvalidAddress(address.to_string()));
    }

    let mut pubkey_hash = [0u8; 20];
    pubkey_hash.copy_from_slice(&payload[1..]);
    Ok(pubkey_hash)
}

pub fn validate_address(address: &str) -> bool {
    pubkey_hash_from_address(address).is_ok()
}
