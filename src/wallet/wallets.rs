// Wallet file persistence

use crate::core::serialize::{
    get_array, get_bytes, get_format_version, get_varint, put_bytes, put_format_version,
    put_varint, Serializable,
};
use crate::error::{Error, Result};
use crate::wallet::Wallet;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

/// File name of the persisted wallet set, relative to the data directory.
pub const WALLET_FILE: &str = "wallet.dat";

/// Collection of wallets keyed by address, persisted as a single file.
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
}

impl Wallets {
    pub fn new() -> Self {
        Self {
            wallets: HashMap::new(),
        }
    }

    /// Load the wallet set, or start empty if the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read(path)?;
        Self::deserialize(&content)
            .map_err(|e| Error::CorruptStore(format!("wallet file {}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.serialize())?;
        Ok(())
    }

    /// Generate a new wallet and return its address.
    pub fn create_wallet(&mut self) -> String {
        let wallet = Wallet::new();
        let address = wallet.address();
        self.wallets.insert(address.clone(), wallet);
        address
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}

impl Default for Wallets {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializable for Wallets {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_format_version(&mut buf);
        put_varint(&mut buf, self.wallets.len() as u64);
        for wallet in self.wallets.values() {
            buf.extend_from_slice(&wallet.secret_bytes());
            put_bytes(&mut buf, &wallet.pubkey_bytes());
        }
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        get_format_version(&mut cursor)?;

        let count = get_varint(&mut cursor)? as usize;
        let mut wallets = HashMap::with_capacity(count);
        for _ in 0..count {
            let secret: [u8; 32] = get_array(&mut cursor)?;
            // The public key is stored alongside but derivable; decode it
            // only to keep the record length explicit.
            let _pubkey = get_bytes(&mut cursor)?;
            let wallet = Wallet::from_secret_bytes(&secret)?;
            wallets.insert(wallet.address(), wallet);
        }

        Ok(Self { wallets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{}-{}", name, std::process::id()))
    }

    #[test]
    fn test_create_and_lookup() {
        let mut wallets = Wallets::new();
        assert!(wallets.is_empty());

        let address = wallets.create_wallet();
        assert_eq!(wallets.len(), 1);
        assert!(wallets.get_wallet(&address).is_some());
        assert!(wallets.addresses().contains(&address));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = temp_path("wallets-round-trip");
        let mut wallets = Wallets::new();
        let a = wallets.create_wallet();
        let b = wallets.create_wallet();
        wallets.save(&path).unwrap();

        let loaded = Wallets::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.get_wallet(&a).is_some());
        assert!(loaded.get_wallet(&b).is_some());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let path = temp_path("wallets-missing");
        let _ = std::fs::remove_file(&path);
        let wallets = Wallets::load(&path).unwrap();
        assert!(wallets.is_empty());
    }

    #[test]
    fn test_load_corrupt_file_is_fatal_kind() {
        let path = temp_path("wallets-corrupt");
        std::fs::write(&path, b"not a wallet file").unwrap();

        let result = Wallets::load(&path);
        assert!(matches!(result, Err(Error::CorruptStore(_))));

        let _ = std::fs::remove_file(&path);
    }
}
