// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! AES-256-GCM sealing of secret material.
//!
//! Each [`seal`] draws a fresh 96-bit nonce from the system CSPRNG; a nonce
//! must never repeat under the same key.

use hoprelay_core::RelayError;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// Ciphertext (with appended GCM tag) and the nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
}

impl SealedBox {
    /// Rebuild a box from stored columns, checking the nonce length.
    pub fn from_parts(ciphertext: Vec<u8>, nonce: &[u8]) -> Result<Self, RelayError> {
        let nonce = nonce.try_into().map_err(|_| {
            RelayError::Vault(format!(
                "corrupted nonce: expected {NONCE_LEN} bytes, got {}",
                nonce.len()
            ))
        })?;
        Ok(Self { ciphertext, nonce })
    }

    /// Decrypt with `key`. Fails on a wrong key or tampered data.
    pub fn open(&self, key: &[u8; KEY_LEN]) -> Result<Zeroizing<Vec<u8>>, RelayError> {
        let mut buffer = Zeroizing::new(self.ciphertext.clone());
        let plaintext_len = aead_key(key)?
            .open_in_place(
                Nonce::assume_unique_for_key(self.nonce),
                Aad::empty(),
                buffer.as_mut_slice(),
            )
            .map_err(|_| {
                RelayError::Vault("decryption failed: wrong key or corrupted data".to_string())
            })?
            .len();
        buffer.truncate(plaintext_len);
        Ok(buffer)
    }
}

/// Encrypt `plaintext` under `key` with a random nonce.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<SealedBox, RelayError> {
    let nonce: [u8; NONCE_LEN] = random_bytes()?;
    let mut ciphertext = plaintext.to_vec();
    aead_key(key)?
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce),
            Aad::empty(),
            &mut ciphertext,
        )
        .map_err(|_| RelayError::Vault("encryption failed".to_string()))?;
    Ok(SealedBox { ciphertext, nonce })
}

/// A fresh random AES-256 key.
pub fn random_key() -> Result<Zeroizing<[u8; KEY_LEN]>, RelayError> {
    random_bytes().map(Zeroizing::new)
}

pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N], RelayError> {
    let mut bytes = [0u8; N];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| RelayError::Vault("system random source unavailable".to_string()))?;
    Ok(bytes)
}

fn aead_key(key: &[u8; KEY_LEN]) -> Result<LessSafeKey, RelayError> {
    UnboundKey::new(&AES_256_GCM, key)
        .map(LessSafeKey::new)
        .map_err(|_| RelayError::Vault("invalid AES-256-GCM key".to_string()))
}
