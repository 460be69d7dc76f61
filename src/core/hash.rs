// Hashing primitives

use crate::core::Hash256;
use sha2::{Digest, Sha256};

/// Single SHA-256 hash
pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    Hash256::new(bytes)
}

/// SHA256(SHA256(data)), used for address checksums
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(&first);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&second);
    bytes
}

/// RIPEMD160(SHA256(data)), the public-key fingerprint outputs lock to
pub fn hash160(data: &[u8]) -> [u8; 20] {
    use ripemd::{Digest as RipemdDigest, Ripemd160};
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(&sha);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&ripemd);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_deterministic() {
        let a = sha256(b"hello world");
        let b = sha256(b"hello world");
        assert_eq!(a, b);
        assert_ne!(a, sha256(b"hello worlds"));
    }

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            sha256(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash160_length() {
        assert_eq!(hash160(b"some public key").len(), 20);
    }

    #[test]
    fn test_double_sha256_differs_from_single() {
        let data = b"checksum input";
        assert_ne!(&double_sha256(data)[..], sha256(data).as_bytes());
    }
}
