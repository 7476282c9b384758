//
// cipher.rs
// dicom-deid
//
// AES-256-GCM encryption of short identifier strings stored back into DICOM fields.
//
// Thales Matheus Mendonça Santos - November 2025

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{DeidError, Result};
use crate::keystore::{KeyMaterial, KEY_LEN};

/// Width of the LO/PN fields the tokens are written into.
pub const MAX_FIELD_LEN: usize = 64;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Longest plaintext (in bytes) whose token still fits in `MAX_FIELD_LEN`.
pub const MAX_PLAINTEXT_LEN: usize = MAX_FIELD_LEN * 3 / 4 - NONCE_LEN - TAG_LEN;

/// What to do when a token is wider than the destination field.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiphertextPolicy {
    /// Fail the request and leave the record alone.
    #[default]
    Reject,
    /// Cut the token to the field width. The stored value can no longer be decrypted.
    Truncate,
}

/// Authenticated cipher bound to one key.
pub struct ReversibleCipher {
    aead: Aes256Gcm,
}

impl ReversibleCipher {
    pub fn new(key: &KeyMaterial) -> Result<Self> {
        let text = std::str::from_utf8(key.as_bytes())
            .map_err(|_| DeidError::InvalidKey("key is not base64 text".into()))?;
        let mut raw = URL_SAFE
            .decode(text.trim())
            .map_err(|err| DeidError::InvalidKey(err.to_string()))?;
        if raw.len() != KEY_LEN {
            let len = raw.len();
            raw.zeroize();
            return Err(DeidError::InvalidKey(format!(
                "expected {} key bytes, found {}",
                KEY_LEN, len
            )));
        }
        let aead = Aes256Gcm::new_from_slice(&raw)
            .map_err(|err| DeidError::InvalidKey(err.to_string()));
        raw.zeroize();
        Ok(Self { aead: aead? })
    }

    /// Encrypts with a fresh nonce; output is `base64url(nonce || ciphertext || tag)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| DeidError::EncryptionFailed)?;

        let mut token = Vec::with_capacity(NONCE_LEN + sealed.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    pub fn decrypt(&self, token: &str) -> Result<String> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| DeidError::DecryptionFailed)?;
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(DeidError::DecryptionFailed);
        }
        let (nonce, sealed) = bytes.split_at(NONCE_LEN);
        let plain = self
            .aead
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| DeidError::DecryptionFailed)?;
        String::from_utf8(plain).map_err(|_| DeidError::DecryptionFailed)
    }

    /// Encrypts and applies `policy` so the result fits in a record field.
    pub fn encrypt_for_field(&self, plaintext: &str, policy: CiphertextPolicy) -> Result<String> {
        fit_to_field(self.encrypt(plaintext)?, policy)
    }
}

pub fn encrypt(key: &KeyMaterial, plaintext: &str) -> Result<String> {
    ReversibleCipher::new(key)?.encrypt(plaintext)
}

pub fn decrypt(key: &KeyMaterial, token: &str) -> Result<String> {
    ReversibleCipher::new(key)?.decrypt(token)
}

pub fn fit_to_field(token: String, policy: CiphertextPolicy) -> Result<String> {
    if token.len() <= MAX_FIELD_LEN {
        return Ok(token);
    }
    match policy {
        CiphertextPolicy::Reject => Err(DeidError::CiphertextTooLong {
            len: token.len(),
            max: MAX_FIELD_LEN,
        }),
        CiphertextPolicy::Truncate => {
            tracing::warn!(
                len = token.len(),
                max = MAX_FIELD_LEN,
                "truncating ciphertext; the stored value cannot be decrypted"
            );
            // Tokens are ASCII so byte truncation is a char boundary.
            let mut token = token;
            token.truncate(MAX_FIELD_LEN);
            Ok(token)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_for_short_values() {
        let key = KeyMaterial::generate();
        let cipher = ReversibleCipher::new(&key).expect("cipher");
        let widest = "a".repeat(MAX_PLAINTEXT_LEN);
        for plain in ["", "Doe^John", "PAT123", widest.as_str()] {
            let token = cipher
                .encrypt_for_field(plain, CiphertextPolicy::Reject)
                .expect("fits");
            assert!(token.len() <= MAX_FIELD_LEN);
            assert_eq!(cipher.decrypt(&token).expect("decrypt"), plain);
        }
    }

    #[test]
    fn encryption_is_randomized() {
        let key = KeyMaterial::generate();
        assert_ne!(
            encrypt(&key, "PAT123").expect("first"),
            encrypt(&key, "PAT123").expect("second")
        );
    }

    #[test]
    fn wrong_key_is_rejected() {
        let k1 = KeyMaterial::generate();
        let k2 = KeyMaterial::generate();
        for plain in ["Doe^John", "PAT123", "x"] {
            let token = encrypt(&k1, plain).expect("encrypt");
            assert!(matches!(decrypt(&k2, &token), Err(DeidError::DecryptionFailed)));
        }
    }

    #[test]
    fn tampered_token_is_rejected() {
        let key = KeyMaterial::generate();
        let token = encrypt(&key, "PAT123").expect("encrypt");
        let mut bytes = URL_SAFE_NO_PAD.decode(&token).expect("b64");
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(bytes);
        assert!(matches!(decrypt(&key, &tampered), Err(DeidError::DecryptionFailed)));
        assert!(matches!(decrypt(&key, "not a token"), Err(DeidError::DecryptionFailed)));
    }

    #[test]
    fn long_plaintext_is_rejected_by_default() {
        let key = KeyMaterial::generate();
        let cipher = ReversibleCipher::new(&key).expect("cipher");
        let long = "b".repeat(MAX_PLAINTEXT_LEN + 1);
        let err = cipher
            .encrypt_for_field(&long, CiphertextPolicy::Reject)
            .unwrap_err();
        assert!(matches!(err, DeidError::CiphertextTooLong { max: MAX_FIELD_LEN, .. }));
    }

    #[test]
    fn truncated_token_does_not_decrypt() {
        let key = KeyMaterial::generate();
        let cipher = ReversibleCipher::new(&key).expect("cipher");
        let long = "Very^Long^Patient^Name^Here";
        let token = cipher
            .encrypt_for_field(long, CiphertextPolicy::Truncate)
            .expect("truncated");
        assert_eq!(token.len(), MAX_FIELD_LEN);
        assert!(cipher.decrypt(&token).is_err());
    }

    #[test]
    fn key_with_trailing_newline_is_accepted() {
        let key = KeyMaterial::generate();
        let mut padded = key.as_bytes().to_vec();
        padded.push(b'\n');
        let token = encrypt(&key, "PAT123").expect("encrypt");
        let plain = decrypt(&KeyMaterial::from_bytes(padded), &token).expect("decrypt");
        assert_eq!(plain, "PAT123");
    }

    #[test]
    fn malformed_key_material_is_invalid_key() {
        let short = KeyMaterial::from_bytes(URL_SAFE.encode([7u8; 16]).into_bytes());
        assert!(matches!(ReversibleCipher::new(&short), Err(DeidError::InvalidKey(_))));
        let junk = KeyMaterial::from_bytes(b"%%%".to_vec());
        assert!(matches!(ReversibleCipher::new(&junk), Err(DeidError::InvalidKey(_))));
    }
}
