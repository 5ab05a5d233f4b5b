//! Key derivation for the two-level key hierarchy.
//!
//! The user key is SHA-256 of the password's UTF-8 bytes. The master key
//! is SHA-256 of 255 bytes from the OS RNG; it lives base64-encoded in the
//! sentinel record and never changes for the lifetime of a store.

use crate::crypto::sealed::SecretKey;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Derive the user key from a password.
pub fn derive_user_key(password: &str) -> SecretKey {
    let digest = Sha256::digest(password.as_bytes());
    SecretKey::from_bytes(digest.into())
}

/// Generate a fresh random master key.
pub fn generate_master_key() -> SecretKey {
    let mut seed = [0u8; 255];
    OsRng.fill_bytes(&mut seed);
    let digest = Sha256::digest(seed);
    SecretKey::from_bytes(digest.into())
}

/// A base64 string of 255 random bytes, used to pad the sentinel record
/// so its sealed size does not reveal an empty store.
pub fn random_filler() -> String {
    let mut bytes = [0u8; 255];
    OsRng.fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}
