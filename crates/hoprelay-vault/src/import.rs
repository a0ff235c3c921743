// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Startup import of identities declared in the config file.
//!
//! Declared metadata is upserted every start. A plaintext `secret` is only
//! written when the vault has none for that identity, so the config value
//! never overwrites a credential rotated through the CLI.

use hoprelay_config::HoprelayConfig;
use hoprelay_core::RelayError;
use hoprelay_storage::NewIdentity;
use secrecy::SecretString;
use tracing::{info, warn};

use crate::credentials::CredentialVault;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// Identities whose metadata was upserted.
    pub registered: Vec<String>,
    /// Secrets copied from the config into the vault.
    pub imported: Vec<String>,
    /// Secrets left alone because the vault already had one.
    pub skipped: Vec<String>,
    /// Declared identities with no credential anywhere.
    pub missing: Vec<String>,
}

pub async fn import_config_secrets(
    creds: &CredentialVault,
    config: &HoprelayConfig,
) -> Result<ImportReport, RelayError> {
    let mut report = ImportReport::default();

    for decl in &config.identities {
        let identity = NewIdentity {
            name: decl.name.clone(),
            kind: decl.kind,
            max_pairs: decl
                .max_pairs
                .unwrap_or(config.scheduler.default_identity_capacity),
            priority: decl.priority.unwrap_or(config.scheduler.default_priority),
        };
        creds.declare(&identity).await?;
        report.registered.push(decl.name.clone());

        let plaintext = decl.secret.as_deref().filter(|s| !s.is_empty());
        let stored = creds.has_credential(&decl.name).await?;
        match (plaintext, stored) {
            (Some(_), true) => {
                info!(identity = %decl.name, "credential already in vault, config value ignored");
                report.skipped.push(decl.name.clone());
            }
            (Some(secret), false) => {
                creds
                    .vault()
                    .store_secret(
                        &crate::credentials::secret_name(&decl.name),
                        &SecretString::from(secret.to_string()),
                    )
                    .await?;
                warn!(
                    identity = %decl.name,
                    "imported plaintext credential from config; remove `secret` from the file"
                );
                report.imported.push(decl.name.clone());
            }
            (None, true) => {}
            (None, false) => {
                warn!(identity = %decl.name, "declared identity has no stored credential");
                report.missing.push(decl.name.clone());
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use hoprelay_config::model::VaultConfig;
    use hoprelay_storage::Database;
    use secrecy::ExposeSecret;
    use tempfile::tempdir;

    use super::*;
    use crate::vault::Vault;

    async fn setup() -> (CredentialVault, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("import.db").to_str().unwrap())
            .await
            .unwrap();
        let config = VaultConfig {
            kdf_memory_cost: 32768,
            kdf_iterations: 2,
            kdf_parallelism: 1,
        };
        let vault = Vault::create(db.clone(), &SecretString::from("pw".to_string()), &config)
            .await
            .unwrap();
        (CredentialVault::new(db, vault), dir)
    }

    const CONFIG: &str = r#"
[scheduler]
default_identity_capacity = 12
default_priority = 4

[[identities]]
name = "alpha"
secret = "alpha-session"
max_pairs = 20

[[identities]]
name = "poster"
kind = "bot_token"
secret = "123:bot"

[[identities]]
name = "bare"
"#;

    #[tokio::test]
    async fn imports_declared_secrets_once() {
        let (creds, _dir) = setup().await;
        let config = hoprelay_config::load_and_validate_str(CONFIG).unwrap();

        let first = import_config_secrets(&creds, &config).await.unwrap();
        assert_eq!(first.registered, vec!["alpha", "poster", "bare"]);
        assert_eq!(first.imported, vec!["alpha", "poster"]);
        assert_eq!(first.missing, vec!["bare"]);

        let poster = creds.get("poster").await.unwrap();
        assert_eq!(poster.max_pairs, 12);
        assert_eq!(poster.priority, 4);
        assert_eq!(creds.get("alpha").await.unwrap().max_pairs, 20);

        let second = import_config_secrets(&creds, &config).await.unwrap();
        assert!(second.imported.is_empty());
        assert_eq!(second.skipped, vec!["alpha", "poster"]);
    }

    #[tokio::test]
    async fn rotated_credential_is_not_overwritten() {
        let (creds, _dir) = setup().await;
        let config = hoprelay_config::load_and_validate_str(CONFIG).unwrap();
        import_config_secrets(&creds, &config).await.unwrap();

        creds
            .vault()
            .store_secret(
                &crate::credentials::secret_name("alpha"),
                &SecretString::from("rotated".to_string()),
            )
            .await
            .unwrap();
        import_config_secrets(&creds, &config).await.unwrap();

        let handle = creds.get_credential("alpha").await.unwrap();
        assert_eq!(handle.expose(), "rotated");
        let raw = creds
            .vault()
            .retrieve_secret("identity.alpha")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw.expose_secret(), "rotated");
    }
}
