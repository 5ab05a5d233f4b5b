//! Random password generation.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};

/// Length of generated passwords in characters
pub const GENERATED_PASSWORD_LEN: usize = 16;

/// Generate a random password of 16 base64url characters.
pub fn generate_password() -> String {
    let mut bytes = [0u8; GENERATED_PASSWORD_LEN];
    OsRng.fill_bytes(&mut bytes);
    let mut password = URL_SAFE_NO_PAD.encode(bytes);
    password.truncate(GENERATED_PASSWORD_LEN);
    password
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_length() {
        assert_eq!(generate_password().len(), GENERATED_PASSWORD_LEN);
    }

    #[test]
    fn test_generated_charset() {
        let password = generate_password();
        assert!(password
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_passwords_are_unique() {
        assert_ne!(generate_password(), generate_password());
    }
}
