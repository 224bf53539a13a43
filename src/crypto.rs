//! At-rest encryption for mail transport credentials.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;

const HKDF_SALT: &[u8] = b"mailroom-credentials-v1";
const HKDF_INFO: &[u8] = b"smtp-password";
const NONCE_LEN: usize = 12;

fn cipher(key: &str) -> Result<Aes256Gcm, String> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), key.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(HKDF_INFO, &mut okm)
        .map_err(|e| format!("Key derivation failed: {e}"))?;
    Aes256Gcm::new_from_slice(&okm).map_err(|e| format!("Invalid key: {e}"))
}

/// Encrypt with AES-256-GCM. Output is `nonce || ciphertext`.
pub fn encrypt(plaintext: &str, key: &str) -> Result<Vec<u8>, String> {
    let cipher = cipher(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| format!("Encryption failed: {e}"))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn decrypt(data: &[u8], key: &str) -> Result<String, String> {
    if data.len() < NONCE_LEN {
        return Err("Ciphertext too short".to_string());
    }

    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    let plaintext = cipher(key)?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| format!("Decryption failed: {e}"))?;

    String::from_utf8(plaintext).map_err(|e| format!("Invalid UTF-8: {e}"))
}
