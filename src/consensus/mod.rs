// Consensus logic

pub mod pow;

pub use pow::{ProofOfWork, MAX_NONCE, TARGET_BITS};
