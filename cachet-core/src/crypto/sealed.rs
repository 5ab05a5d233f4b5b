//! XChaCha20-Poly1305 sealed boxes for record encryption.
//!
//! Every record is sealed independently with:
//! - 256-bit key
//! - 192-bit (24 byte) nonce, unique per record
//! - 128-bit authentication tag
//!
//! The sealed blob starts with the 24-byte nonce, followed by the
//! ciphertext and tag, so a blob is self-contained for decryption.

use crate::crypto::{CryptoError, Result};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305, XNonce,
};
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

/// Key length in bytes
pub const KEY_SIZE: usize = 32;

/// Nonce length in bytes
pub const NONCE_SIZE: usize = 24;

/// A per-record nonce
pub type Nonce = [u8; NONCE_SIZE];

/// A 32-byte symmetric key, zeroized when dropped.
///
/// Both the user key (derived from the password) and the master key
/// (randomly generated) use this type. Keys are only resident in memory
/// while the store is unlocked.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecretKey {
    key: [u8; KEY_SIZE],
}

impl SecretKey {
    /// Create a key from raw bytes
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Create a key from a slice, checking the length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                got: bytes.len(),
            })?;
        Ok(Self { key })
    }

    /// Get a reference to the key bytes (use sparingly)
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Constant-time equality check
    pub fn ct_eq(&self, other: &SecretKey) -> bool {
        self.key.as_slice().ct_eq(other.key.as_slice()).into()
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Generate a fresh 24-byte nonce from the OS RNG.
///
/// RNG failure aborts the process; a store running without a working
/// crypto source must not continue.
pub fn new_nonce() -> Nonce {
    XChaCha20Poly1305::generate_nonce(&mut OsRng).into()
}

/// Seal plaintext with the given key and nonce.
///
/// Returns `nonce || ciphertext || tag`.
pub fn seal(plaintext: &[u8], key: &SecretKey, nonce: &Nonce) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::SealFailed)?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Open a sealed blob produced by [`seal`].
///
/// Fails with `DecryptionFailed` on a wrong key, a truncated blob, or any
/// other integrity violation.
pub fn open(blob: &[u8], key: &SecretKey) -> Result<Vec<u8>> {
    if blob.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    let (nonce, boxed) = blob.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(XNonce::from_slice(nonce), boxed)
        .map_err(|_| CryptoError::DecryptionFailed)
}
