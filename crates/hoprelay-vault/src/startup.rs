// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Opening the credential vault when the service or CLI starts.

use hoprelay_config::model::VaultConfig;
use hoprelay_core::RelayError;
use hoprelay_storage::Database;
use secrecy::SecretString;
use tracing::info;

use crate::credentials::CredentialVault;
use crate::prompt;
use crate::vault::Vault;

/// Unlock the vault with `passphrase`, creating it first if this database
/// has none.
pub async fn unlock_or_create(
    db: Database,
    passphrase: &SecretString,
    config: &VaultConfig,
) -> Result<CredentialVault, RelayError> {
    let vault = if Vault::exists(&db).await? {
        Vault::unlock(db.clone(), passphrase).await?
    } else {
        info!("no vault in database, creating one");
        Vault::create(db.clone(), passphrase, config).await?
    };
    Ok(CredentialVault::new(db, vault))
}

/// [`unlock_or_create`] with the passphrase taken from the environment or
/// the terminal. A new vault asks for confirmation.
pub async fn open_credentials(
    db: Database,
    config: &VaultConfig,
) -> Result<CredentialVault, RelayError> {
    let passphrase = if Vault::exists(&db).await? {
        prompt::get_vault_passphrase()?
    } else {
        prompt::get_vault_passphrase_with_confirm()?
    };
    let creds = unlock_or_create(db, &passphrase, config).await?;
    info!("credential vault unlocked");
    Ok(creds)
}
