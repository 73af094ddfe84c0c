//! Letter content encryption
//!
//! Password-protected letters store their content as AES-256-GCM
//! ciphertext keyed by an Argon2id derivation of the letter password.

use crate::error::{AppError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher};
use rand::RngCore;
use serde::{Deserialize, Serialize};

const NONCE_SIZE: usize = 12;
const SALT_SIZE: usize = 16;
const KEY_SIZE: usize = 32;

/// Ciphertext with the parameters needed to open it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Encrypt letter text under `password`
pub fn encrypt_text(plaintext: &str, password: &str) -> Result<EncryptedData> {
    if password.is_empty() {
        return Err(AppError::Crypto("Password must not be empty".to_string()));
    }

    let mut salt = vec![0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);

    let mut nonce_bytes = vec![0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = cipher_for(password, &salt)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .map_err(|e| AppError::Crypto(format!("Encryption failed: {}", e)))?;

    Ok(EncryptedData {
        salt,
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypt letter text; a wrong password fails authentication
pub fn decrypt_text(encrypted: &EncryptedData, password: &str) -> Result<String> {
    if encrypted.nonce.len() != NONCE_SIZE {
        return Err(AppError::Crypto("Malformed nonce".to_string()));
    }

    let cipher = cipher_for(password, &encrypted.salt)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&encrypted.nonce), encrypted.ciphertext.as_ref())
        .map_err(|_| AppError::Crypto("Incorrect password or corrupted letter".to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|e| AppError::Crypto(format!("Decrypted content is not UTF-8: {}", e)))
}

fn cipher_for(password: &str, salt: &[u8]) -> Result<Aes256Gcm> {
    let key = derive_key(password, salt)?;
    Aes256Gcm::new_from_slice(&key)
        .map_err(|e| AppError::Crypto(format!("Cipher initialization failed: {}", e)))
}

/// Derive a 256-bit key from the password with Argon2id
fn derive_key(password: &str, salt: &[u8]) -> Result<Vec<u8>> {
    let salt_string = SaltString::encode_b64(salt)
        .map_err(|e| AppError::Crypto(format!("Salt encoding failed: {}", e)))?;

    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt_string)
        .map_err(|e| AppError::Crypto(format!("Key derivation failed: {}", e)))?;

    let hash = password_hash
        .hash
        .ok_or_else(|| AppError::Crypto("No hash generated".to_string()))?;

    let key_bytes = hash.as_bytes();
    if key_bytes.len() < KEY_SIZE {
        return Err(AppError::Crypto("Derived key too short".to_string()));
    }

    Ok(key_bytes[..KEY_SIZE].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_text() {
        let encrypted = encrypt_text("Dear future me", "lantern").unwrap();

        assert_eq!(decrypt_text(&encrypted, "lantern").unwrap(), "Dear future me");
    }

    #[test]
    fn test_wrong_password() {
        let encrypted = encrypt_text("secret", "right").unwrap();

        assert!(matches!(
            decrypt_text(&encrypted, "wrong"),
            Err(AppError::Crypto(_))
        ));
    }

    #[test]
    fn test_empty_password_rejected() {
        assert!(encrypt_text("secret", "").is_err());
    }

    #[test]
    fn test_fresh_salt_per_letter() {
        let a = encrypt_text("same", "pw").unwrap();
        let b = encrypt_text("same", "pw").unwrap();

        assert_ne!(a.salt, b.salt);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_unicode_content() {
        let text = "\u{1f48c} lettre d'amour, \u{043f}\u{0438}\u{0441}\u{044c}\u{043c}\u{043e}";
        let encrypted = encrypt_text(text, "pw").unwrap();

        assert_eq!(decrypt_text(&encrypted, "pw").unwrap(), text);
    }

    #[test]
    fn test_truncated_nonce_rejected() {
        let mut encrypted = encrypt_text("secret", "pw").unwrap();
        encrypted.nonce.pop();

        assert!(decrypt_text(&encrypted, "pw").is_err());
    }
}
