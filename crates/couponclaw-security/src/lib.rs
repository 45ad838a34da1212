//! # CouponClaw Security
//! Encryption at rest for provider credentials.

pub mod cipher;

pub use cipher::{CredentialCipher, DecryptionError, ENCRYPTED_PREFIX, is_encrypted};
