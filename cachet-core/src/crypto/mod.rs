//! Cryptographic primitives for the secret store.
//!
//! This module provides:
//! - XChaCha20-Poly1305 sealed boxes (32-byte key, 24-byte nonce)
//! - SHA-256 key derivation from the user password
//! - Master-key and nonce generation
//! - Random password generation

pub mod kdf;
pub mod password;
pub mod sealed;

pub use kdf::{derive_user_key, generate_master_key, random_filler};
pub use password::generate_password;
pub use sealed::{new_nonce, open, seal, Nonce, SecretKey, KEY_SIZE, NONCE_SIZE};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("encryption failed")]
    SealFailed,

    #[error("decryption failed - wrong key or corrupted data")]
    DecryptionFailed,

    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
