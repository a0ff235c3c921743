// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Argon2id derivation of the key that wraps the vault master key.

use hoprelay_config::model::VaultConfig;
use hoprelay_core::RelayError;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{KEY_LEN, random_bytes};

pub const SALT_LEN: usize = 16;

/// Argon2id cost parameters. Persisted next to the wrapped key so that a
/// vault stays unlockable after the config changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_cost: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl From<&VaultConfig> for KdfParams {
    fn from(config: &VaultConfig) -> Self {
        Self {
            memory_cost: config.kdf_memory_cost,
            iterations: config.kdf_iterations,
            parallelism: config.kdf_parallelism,
        }
    }
}

impl KdfParams {
    pub fn derive(
        &self,
        passphrase: &[u8],
        salt: &[u8; SALT_LEN],
    ) -> Result<Zeroizing<[u8; KEY_LEN]>, RelayError> {
        let params = argon2::Params::new(
            self.memory_cost,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| RelayError::Vault(format!("invalid Argon2id parameters: {e}")))?;

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
            .hash_password_into(passphrase, salt, key.as_mut())
            .map_err(|e| RelayError::Vault(format!("key derivation failed: {e}")))?;
        Ok(key)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RelayError> {
        serde_json::to_vec(self).map_err(|e| RelayError::Vault(format!("encode KDF params: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(bytes)
            .map_err(|e| RelayError::Vault(format!("corrupted KDF params: {e}")))
    }
}

pub fn generate_salt() -> Result<[u8; SALT_LEN], RelayError> {
    random_bytes()
}
