//! Credential cipher.
//!
//! Provider tokens are stored either as plaintext (no secret configured) or as
//! `enc:v1:` + base64(nonce ‖ tag ‖ body). The body is the plaintext XORed with
//! an AES-256 counter-mode keystream, so its length equals the plaintext length;
//! the tag is HMAC-SHA256 over nonce and body, which makes decryption with the
//! wrong secret fail deterministically instead of yielding garbage.
//!
//! Keys are derived from the configured secret with SHA-256. Changing the secret
//! makes existing ciphertext unreadable; users must resubmit their tokens.

use aes::Aes256;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use couponclaw_core::error::{CouponClawError, Result};
use couponclaw_core::types::{Credential, StoredCredential};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Marks a stored credential as encrypted.
pub const ENCRYPTED_PREFIX: &str = "enc:v1:";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 32;
const BLOCK_LEN: usize = 16;

/// Stored credential could not be turned back into a token.
///
/// Permanent for that stored value: callers must not retry, and must not
/// report it as a provider authentication failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecryptionError {
    #[error("credential was encrypted with a different secret")]
    KeyMismatch,
    #[error("credential is encrypted but no secret is configured")]
    SecretMissing,
    #[error("malformed encrypted credential: {0}")]
    Malformed(String),
}

/// True if the stored value carries the encryption marker.
pub fn is_encrypted(stored: &StoredCredential) -> bool {
    stored.as_str().starts_with(ENCRYPTED_PREFIX)
}

/// Storage strategy for credentials, chosen once at startup.
pub enum CredentialCipher {
    Plaintext,
    Encrypted(CipherKeys),
}

/// Keys derived from the configured secret.
pub struct CipherKeys {
    stream: [u8; 32],
    mac: [u8; 32],
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialCipher::Plaintext => f.write_str("CredentialCipher::Plaintext"),
            CredentialCipher::Encrypted(_) => f.write_str("CredentialCipher::Encrypted(***)"),
        }
    }
}

impl CredentialCipher {
    /// `None` or an empty secret selects plaintext storage.
    pub fn from_secret(secret: Option<&str>) -> Self {
        match secret.filter(|s| !s.is_empty()) {
            Some(secret) => CredentialCipher::Encrypted(CipherKeys {
                stream: derive_key("couponclaw::cipher::", secret),
                mac: derive_key("couponclaw::mac::", secret),
            }),
            None => {
                tracing::warn!("⚠️ No credential secret configured, tokens are stored as plaintext");
                CredentialCipher::Plaintext
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, CredentialCipher::Encrypted(_))
    }

    /// Turn a freshly submitted token into its stored form.
    pub fn encrypt(&self, plaintext: &str) -> Result<StoredCredential> {
        let keys = match self {
            CredentialCipher::Plaintext => return Ok(StoredCredential::new(plaintext)),
            CredentialCipher::Encrypted(keys) => keys,
        };

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut body = plaintext.as_bytes().to_vec();
        apply_keystream(&keys.stream, &nonce, &mut body);
        let tag = compute_tag(&keys.mac, &nonce, &body)?;

        let mut packed = Vec::with_capacity(NONCE_LEN + TAG_LEN + body.len());
        packed.extend_from_slice(&nonce);
        packed.extend_from_slice(&tag);
        packed.extend_from_slice(&body);

        Ok(StoredCredential::new(format!("{ENCRYPTED_PREFIX}{}", BASE64.encode(packed))))
    }

    /// Recover the token. Plaintext values pass through under either strategy.
    pub fn decrypt(&self, stored: &StoredCredential) -> std::result::Result<Credential, DecryptionError> {
        let Some(encoded) = stored.as_str().strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(Credential::new(stored.as_str()));
        };
        let keys = match self {
            CredentialCipher::Plaintext => return Err(DecryptionError::SecretMissing),
            CredentialCipher::Encrypted(keys) => keys,
        };

        let packed = BASE64
            .decode(encoded.trim())
            .map_err(|e| DecryptionError::Malformed(format!("base64: {e}")))?;
        if packed.len() < NONCE_LEN + TAG_LEN {
            return Err(DecryptionError::Malformed("too short".into()));
        }
        let (nonce, rest) = packed.split_at(NONCE_LEN);
        let (tag, body) = rest.split_at(TAG_LEN);

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&keys.mac)
            .map_err(|e| DecryptionError::Malformed(e.to_string()))?;
        mac.update(nonce);
        mac.update(body);
        mac.verify_slice(tag).map_err(|_| DecryptionError::KeyMismatch)?;

        let mut plain = body.to_vec();
        let mut nonce_arr = [0u8; NONCE_LEN];
        nonce_arr.copy_from_slice(nonce);
        apply_keystream(&keys.stream, &nonce_arr, &mut plain);

        String::from_utf8(plain)
            .map(Credential::new)
            .map_err(|e| DecryptionError::Malformed(format!("utf-8: {e}")))
    }
}

fn derive_key(domain: &str, secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    hasher.update(secret.as_bytes());
    let result = hasher.finalize();

    let mut key = [0u8; 32];
    key.copy_from_slice(&result);
    key
}

/// XOR `data` with AES-256(nonce ‖ counter) blocks.
fn apply_keystream(key: &[u8; 32], nonce: &[u8; NONCE_LEN], data: &mut [u8]) {
    let cipher = Aes256::new(GenericArray::from_slice(key));

    for (counter, chunk) in data.chunks_mut(BLOCK_LEN).enumerate() {
        let mut input = [0u8; BLOCK_LEN];
        input[..NONCE_LEN].copy_from_slice(nonce);
        input[NONCE_LEN..].copy_from_slice(&(counter as u32).to_be_bytes());

        let mut block = GenericArray::clone_from_slice(&input);
        cipher.encrypt_block(&mut block);
        for (byte, k) in chunk.iter_mut().zip(block.iter()) {
            *byte ^= k;
        }
    }
}

fn compute_tag(key: &[u8; 32], nonce: &[u8], body: &[u8]) -> Result<[u8; TAG_LEN]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| CouponClawError::Security(format!("MAC init failed: {e}")))?;
    mac.update(nonce);
    mac.update(body);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypted_len(token: &str) -> usize {
        let cipher = CredentialCipher::from_secret(Some("k"));
        let stored = cipher.encrypt(token).unwrap();
        let raw = stored.as_str().strip_prefix(ENCRYPTED_PREFIX).unwrap();
        BASE64.decode(raw).unwrap().len()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let long = "x".repeat(300);
        let tokens = ["", "a", "eyJhbGciOiJIUzI1NiJ9.payload.sig", "令牌-with-unicode", long.as_str()];
        for secret in ["s1", "a much longer secret with spaces", "🔑"] {
            let cipher = CredentialCipher::from_secret(Some(secret));
            for token in tokens {
                let stored = cipher.encrypt(token).unwrap();
                assert!(is_encrypted(&stored));
                assert_eq!(cipher.decrypt(&stored).unwrap().expose(), token);
            }
        }
    }

    #[test]
    fn test_wrong_secret_fails() {
        let a = CredentialCipher::from_secret(Some("secret-one"));
        let b = CredentialCipher::from_secret(Some("secret-two"));
        let stored = a.encrypt("provider-token").unwrap();
        assert_eq!(b.decrypt(&stored), Err(DecryptionError::KeyMismatch));
        // Deterministic: same answer every time.
        assert_eq!(b.decrypt(&stored), Err(DecryptionError::KeyMismatch));
    }

    #[test]
    fn test_ciphertext_length_tracks_plaintext_length() {
        let overhead = NONCE_LEN + TAG_LEN;
        assert_eq!(encrypted_len(""), overhead);
        assert_eq!(encrypted_len("abcd"), overhead + 4);
        assert_eq!(encrypted_len(&"z".repeat(33)), overhead + 33);
    }

    #[test]
    fn test_plaintext_strategy_passthrough() {
        let cipher = CredentialCipher::from_secret(None);
        assert!(!cipher.is_enabled());
        let stored = cipher.encrypt("plain-token").unwrap();
        assert_eq!(stored.as_str(), "plain-token");
        assert!(!is_encrypted(&stored));
        assert_eq!(cipher.decrypt(&stored).unwrap().expose(), "plain-token");
        assert!(!CredentialCipher::from_secret(Some("")).is_enabled());
    }

    #[test]
    fn test_encrypted_value_without_secret() {
        let stored = CredentialCipher::from_secret(Some("k")).encrypt("tok").unwrap();
        let plain = CredentialCipher::from_secret(None);
        assert_eq!(plain.decrypt(&stored), Err(DecryptionError::SecretMissing));
    }

    #[test]
    fn test_legacy_plaintext_readable_after_secret_added() {
        let cipher = CredentialCipher::from_secret(Some("new-secret"));
        let legacy = StoredCredential::new("old-plain-token");
        assert_eq!(cipher.decrypt(&legacy).unwrap().expose(), "old-plain-token");
    }

    #[test]
    fn test_malformed_ciphertext() {
        let cipher = CredentialCipher::from_secret(Some("k"));
        let bad = StoredCredential::new(format!("{ENCRYPTED_PREFIX}!!!not-base64"));
        assert!(matches!(cipher.decrypt(&bad), Err(DecryptionError::Malformed(_))));
        let short = StoredCredential::new(format!("{ENCRYPTED_PREFIX}{}", BASE64.encode([1u8; 5])));
        assert!(matches!(cipher.decrypt(&short), Err(DecryptionError::Malformed(_))));
    }

    #[test]
    fn test_nonce_randomizes_ciphertext() {
        let cipher = CredentialCipher::from_secret(Some("k"));
        let a = cipher.encrypt("same-token").unwrap();
        let b = cipher.encrypt("same-token").unwrap();
        assert_ne!(a, b);
    }
}
