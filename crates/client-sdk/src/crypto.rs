//! AES-256-GCM, SHA-256, and the two PBKDF2 profiles used by the
//! master and fragment layers.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const MASTER_SALT_LEN: usize = 32;
pub const FRAGMENT_SALT_LEN: usize = 16;

pub const MASTER_KDF_ITERATIONS: u32 = 100_000;
pub const FRAGMENT_KDF_ITERATIONS: u32 = 10_000;

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Master-layer key from a user password: PBKDF2-HMAC-SHA256, 100k
/// iterations, 32-byte salt.
pub fn derive_master_key(password: &str, salt: &[u8; MASTER_SALT_LEN]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, MASTER_KDF_ITERATIONS, &mut key);
    key
}

/// Fragment-layer effective key from a random raw key: PBKDF2-HMAC-SHA256,
/// 10k iterations, 16-byte salt.
pub fn derive_fragment_key(
    raw_key: &[u8; KEY_LEN],
    salt: &[u8; FRAGMENT_SALT_LEN],
) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(raw_key, salt, FRAGMENT_KDF_ITERATIONS, &mut key);
    key
}

/// AES-256-GCM with the tag detached, so checksums and stored bytes
/// cover the ciphertext proper.
pub fn encrypt(
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN]), StorageError> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| StorageError::CipherFailure)?;
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| StorageError::CipherFailure)?;

    let split_at = sealed.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&sealed[split_at..]);
    sealed.truncate(split_at);
    Ok((sealed, tag))
}

/// Inverse of [`encrypt`]. Any tag mismatch fails without returning
/// partial plaintext.
pub fn decrypt(
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Vec<u8>, StorageError> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| StorageError::CipherFailure)?;
    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);
    cipher
        .decrypt(Nonce::from_slice(iv), sealed.as_ref())
        .map_err(|_| StorageError::AuthenticationFailed)
}
