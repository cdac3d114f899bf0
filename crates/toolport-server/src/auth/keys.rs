//! Bearer secrets: machine keys, run tokens and the ingestion secret.
//!
//! Secrets are compared by their SHA-256 digest; plaintext never reaches
//! storage.

use rand::RngExt;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SECRET_CHARSET: &[u8] = b"0123456789abcdef";

/// Length of generated machine keys and run tokens.
pub const SECRET_LEN: usize = 64;

/// Hash a secret for storage or comparison.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Generate a random hex secret of [`SECRET_LEN`] characters.
pub fn generate_secret() -> String {
    let mut rng = rand::rng();
    (0..SECRET_LEN)
        .map(|_| {
            let idx = rng.random_range(0..SECRET_CHARSET.len());
            SECRET_CHARSET[idx] as char
        })
        .collect()
}

/// Mint a fresh secret. Returns `(plaintext, hash)`.
pub fn mint_secret() -> (String, String) {
    let secret = generate_secret();
    let hash = hash_secret(&secret);
    (secret, hash)
}

/// Compare a presented secret against a configured one via their digests.
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    matches_hash(presented, &hash_secret(expected))
}

/// Constant-time check of a presented secret against a stored digest.
pub fn matches_hash(presented: &str, stored_hash: &str) -> bool {
    hash_secret(presented)
        .as_bytes()
        .ct_eq(stored_hash.as_bytes())
        .into()
}
