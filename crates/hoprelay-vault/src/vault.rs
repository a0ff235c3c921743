// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vault lifecycle and secret storage.
//!
//! A random master key encrypts every entry in `vault_entries`. The master
//! key is stored in `vault_meta` wrapped by an Argon2id key derived from the
//! passphrase, so changing the passphrase re-wraps one key and touches no
//! entries.

use std::collections::HashMap;

use hoprelay_config::model::VaultConfig;
use hoprelay_core::RelayError;
use hoprelay_storage::Database;
use rusqlite::{OptionalExtension, params};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::{self, KEY_LEN, SealedBox};
use crate::kdf::{self, KdfParams, SALT_LEN};

const META_WRAPPED_KEY: &str = "wrapped_master_key";
const META_WRAP_NONCE: &str = "master_key_nonce";
const META_SALT: &str = "kdf_salt";
const META_PARAMS: &str = "kdf_params";

/// An unlocked vault. The master key lives only in memory.
pub struct Vault {
    master_key: Zeroizing<[u8; KEY_LEN]>,
    db: Database,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

/// Wrapped master key plus everything needed to re-derive its wrapping key.
struct WrappedKey {
    sealed: SealedBox,
    salt: [u8; SALT_LEN],
    params: KdfParams,
}

impl WrappedKey {
    fn wrap(
        master_key: &[u8; KEY_LEN],
        passphrase: &SecretString,
        params: KdfParams,
    ) -> Result<Self, RelayError> {
        let salt = kdf::generate_salt()?;
        let wrapping = params.derive(passphrase.expose_secret().as_bytes(), &salt)?;
        Ok(Self {
            sealed: crypto::seal(&wrapping, master_key)?,
            salt,
            params,
        })
    }

    fn unwrap_with(&self, passphrase: &SecretString) -> Result<Zeroizing<[u8; KEY_LEN]>, RelayError> {
        let wrapping = self
            .params
            .derive(passphrase.expose_secret().as_bytes(), &self.salt)?;
        let bytes = self.sealed.open(&wrapping).map_err(|_| {
            RelayError::Vault("invalid passphrase or corrupted vault".to_string())
        })?;
        let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            RelayError::Vault(format!("corrupted master key: expected {KEY_LEN} bytes"))
        })?;
        Ok(Zeroizing::new(key))
    }

    fn to_rows(&self) -> Result<Vec<(&'static str, Vec<u8>)>, RelayError> {
        Ok(vec![
            (META_WRAPPED_KEY, self.sealed.ciphertext.clone()),
            (META_WRAP_NONCE, self.sealed.nonce.to_vec()),
            (META_SALT, self.salt.to_vec()),
            (META_PARAMS, self.params.to_bytes()?),
        ])
    }

    fn from_rows(mut rows: HashMap<String, Vec<u8>>) -> Result<Self, RelayError> {
        let mut take = |key: &str| {
            rows.remove(key)
                .ok_or_else(|| RelayError::Vault(format!("vault metadata is missing `{key}`")))
        };
        let ciphertext = take(META_WRAPPED_KEY)?;
        let nonce = take(META_WRAP_NONCE)?;
        let salt = take(META_SALT)?;
        let params = KdfParams::from_bytes(&take(META_PARAMS)?)?;
        Ok(Self {
            sealed: SealedBox::from_parts(ciphertext, &nonce)?,
            salt: salt.as_slice().try_into().map_err(|_| {
                RelayError::Vault(format!("corrupted salt: expected {SALT_LEN} bytes"))
            })?,
            params,
        })
    }
}

impl Vault {
    /// Whether a vault has been created in this database.
    pub async fn exists(db: &Database) -> Result<bool, RelayError> {
        db.connection()
            .call(|conn| -> Result<bool, rusqlite::Error> {
                conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM vault_meta WHERE key = ?1)",
                    params![META_WRAPPED_KEY],
                    |row| row.get(0),
                )
            })
            .await
            .map_err(map_tr_err)
    }

    /// Create a vault with a fresh master key wrapped by `passphrase`.
    pub async fn create(
        db: Database,
        passphrase: &SecretString,
        config: &VaultConfig,
    ) -> Result<Self, RelayError> {
        let master_key = crypto::random_key()?;
        let wrapped = WrappedKey::wrap(&master_key, passphrase, KdfParams::from(config))?;
        write_meta(&db, wrapped.to_rows()?).await?;
        info!("vault created");
        Ok(Self { master_key, db })
    }

    /// Unlock an existing vault. Uses the KDF parameters stored at creation
    /// time, not the current config.
    pub async fn unlock(db: Database, passphrase: &SecretString) -> Result<Self, RelayError> {
        let rows = db
            .connection()
            .call(|conn| -> Result<HashMap<String, Vec<u8>>, rusqlite::Error> {
                let mut stmt = conn.prepare("SELECT key, value FROM vault_meta")?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect()
            })
            .await
            .map_err(map_tr_err)?;
        if rows.is_empty() {
            return Err(RelayError::Vault("no vault exists in this database".to_string()));
        }

        let master_key = WrappedKey::from_rows(rows)?.unwrap_with(passphrase)?;
        debug!("vault unlocked");
        Ok(Self { master_key, db })
    }

    /// Encrypt and store `plaintext` under `name`, replacing any previous value.
    pub async fn store_secret(&self, name: &str, plaintext: &SecretString) -> Result<(), RelayError> {
        let sealed = crypto::seal(&self.master_key, plaintext.expose_secret().as_bytes())?;
        let owned = name.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO vault_entries (name, ciphertext, nonce) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE SET
                        ciphertext = excluded.ciphertext,
                        nonce = excluded.nonce,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                    params![owned, sealed.ciphertext, sealed.nonce.to_vec()],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!(name, "secret stored");
        Ok(())
    }

    pub async fn retrieve_secret(&self, name: &str) -> Result<Option<SecretString>, RelayError> {
        let owned = name.to_string();
        let row = self
            .db
            .connection()
            .call(move |conn| -> Result<Option<(Vec<u8>, Vec<u8>)>, rusqlite::Error> {
                conn.query_row(
                    "SELECT ciphertext, nonce FROM vault_entries WHERE name = ?1",
                    params![owned],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
            })
            .await
            .map_err(map_tr_err)?;

        let Some((ciphertext, nonce)) = row else {
            return Ok(None);
        };
        let plaintext = SealedBox::from_parts(ciphertext, &nonce)?.open(&self.master_key)?;
        let value = String::from_utf8(plaintext.to_vec())
            .map_err(|_| RelayError::Vault(format!("secret `{name}` is not valid UTF-8")))?;
        Ok(Some(SecretString::from(value)))
    }

    pub async fn contains(&self, name: &str) -> Result<bool, RelayError> {
        let owned = name.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM vault_entries WHERE name = ?1)",
                    params![owned],
                    |row| row.get(0),
                )
            })
            .await
            .map_err(map_tr_err)
    }

    /// `(name, masked preview)` for every entry, sorted by name.
    pub async fn list_secrets(&self) -> Result<Vec<(String, String)>, RelayError> {
        let names = self
            .db
            .connection()
            .call(|conn| -> Result<Vec<String>, rusqlite::Error> {
                let mut stmt = conn.prepare("SELECT name FROM vault_entries ORDER BY name")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            })
            .await
            .map_err(map_tr_err)?;

        let mut listing = Vec::with_capacity(names.len());
        for name in names {
            let preview = match self.retrieve_secret(&name).await {
                Ok(Some(secret)) => mask_secret(secret.expose_secret()),
                Ok(None) | Err(_) => "[unreadable]".to_string(),
            };
            listing.push((name, preview));
        }
        Ok(listing)
    }

    /// Remove an entry. Returns whether it existed.
    pub async fn delete_secret(&self, name: &str) -> Result<bool, RelayError> {
        let owned = name.to_string();
        let removed = self
            .db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                conn.execute("DELETE FROM vault_entries WHERE name = ?1", params![owned])
            })
            .await
            .map_err(map_tr_err)?;
        debug!(name, removed, "secret deleted");
        Ok(removed > 0)
    }

    /// Re-wrap the master key under a new passphrase and the current KDF
    /// parameters.
    pub async fn change_passphrase(
        &self,
        new_passphrase: &SecretString,
        config: &VaultConfig,
    ) -> Result<(), RelayError> {
        let wrapped = WrappedKey::wrap(&self.master_key, new_passphrase, KdfParams::from(config))?;
        write_meta(&self.db, wrapped.to_rows()?).await?;
        info!("vault passphrase changed");
        Ok(())
    }
}

async fn write_meta(db: &Database, rows: Vec<(&'static str, Vec<u8>)>) -> Result<(), RelayError> {
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            for (key, value) in &rows {
                tx.execute(
                    "INSERT OR REPLACE INTO vault_meta (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )?;
            }
            tx.commit()
        })
        .await
        .map_err(map_tr_err)
}

/// Preview of a secret for display: `"1234...wxyz"`, or `"****"` when the
/// value is too short to reveal any of it.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < 10 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> RelayError {
    RelayError::Vault(format!("vault database error: {e}"))
}
