//! Authentication for the portal.
//!
//! JWT access tokens for users and operators, hashed bearer secrets for
//! machines, runs and the ingestion webhook.

pub mod claims;
pub mod jwt;
pub mod keys;

pub use claims::Claims;
pub use jwt::JwtManager;
pub use keys::{generate_secret, hash_secret, matches_hash, mint_secret, secrets_match};
