// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity registry with encrypted credentials.
//!
//! Identity metadata (capacity, priority, health) lives in the `identities`
//! table in the clear; the secret lives in the vault under
//! `identity.<name>`. Callers only ever see a [`CredentialHandle`].

use hoprelay_core::{CredentialHandle, HealthState, Identity, RelayError};
use hoprelay_storage::queries::identities;
use hoprelay_storage::{Database, NewIdentity};
use secrecy::SecretString;
use tracing::info;

use crate::vault::Vault;

/// Vault entry name for an identity's secret.
pub fn secret_name(identity: &str) -> String {
    format!("identity.{identity}")
}

#[derive(Debug)]
pub struct CredentialVault {
    db: Database,
    vault: Vault,
}

impl CredentialVault {
    pub fn new(db: Database, vault: Vault) -> Self {
        Self { db, vault }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// Register an identity, or update its capacity and priority, and store
    /// its secret. Health of an existing identity is preserved.
    pub async fn register(
        &self,
        identity: NewIdentity,
        secret: &SecretString,
    ) -> Result<Identity, RelayError> {
        if identity.name.trim().is_empty() {
            return Err(RelayError::Config("identity name must not be empty".to_string()));
        }
        if identity.max_pairs == 0 {
            return Err(RelayError::Config(format!(
                "identity `{}` must allow at least one pair",
                identity.name
            )));
        }
        self.vault
            .store_secret(&secret_name(&identity.name), secret)
            .await?;
        let stored = identities::upsert_identity(&self.db, &identity).await?;
        info!(
            identity = %stored.name,
            kind = %stored.kind,
            max_pairs = stored.max_pairs,
            priority = stored.priority,
            "identity registered"
        );
        Ok(stored)
    }

    /// Register or update identity metadata without touching its secret.
    pub async fn declare(&self, identity: &NewIdentity) -> Result<Identity, RelayError> {
        if identity.max_pairs == 0 {
            return Err(RelayError::Config(format!(
                "identity `{}` must allow at least one pair",
                identity.name
            )));
        }
        identities::upsert_identity(&self.db, identity).await
    }

    pub async fn get(&self, name: &str) -> Result<Identity, RelayError> {
        identities::get_identity(&self.db, name)
            .await?
            .ok_or_else(|| RelayError::UnknownIdentity(name.to_string()))
    }

    /// All identities, highest priority first.
    pub async fn list(&self) -> Result<Vec<Identity>, RelayError> {
        identities::list_identities(&self.db).await
    }

    /// Opaque handle to an identity's secret.
    ///
    /// A registered identity without a stored secret cannot authenticate,
    /// which is reported as an authorization failure.
    pub async fn get_credential(&self, name: &str) -> Result<CredentialHandle, RelayError> {
        self.get(name).await?;
        match self.vault.retrieve_secret(&secret_name(name)).await? {
            Some(secret) => Ok(CredentialHandle::new(name, secret)),
            None => Err(RelayError::Authorization {
                identity: name.to_string(),
                message: "no credential stored".to_string(),
            }),
        }
    }

    pub async fn has_credential(&self, name: &str) -> Result<bool, RelayError> {
        self.vault.contains(&secret_name(name)).await
    }

    pub async fn update_health(
        &self,
        name: &str,
        state: HealthState,
        reason: Option<&str>,
        verified: bool,
    ) -> Result<(), RelayError> {
        identities::update_identity_health(&self.db, name, state, reason, verified).await
    }

    /// Remove an identity and its secret. Rejected with
    /// [`RelayError::IdentityInUse`] while pairs still reference it.
    pub async fn remove(&self, name: &str) -> Result<bool, RelayError> {
        let removed = identities::delete_identity(&self.db, name).await?;
        let had_secret = self.vault.delete_secret(&secret_name(name)).await?;
        if removed {
            info!(identity = name, "identity removed");
        }
        Ok(removed || had_secret)
    }
}

#[cfg(test)]
mod tests {
    use hoprelay_config::model::VaultConfig;
    use hoprelay_core::IdentityKind;
    use hoprelay_storage::NewPair;
    use hoprelay_storage::queries::pairs;
    use tempfile::tempdir;

    use super::*;

    async fn setup() -> (CredentialVault, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("creds.db").to_str().unwrap())
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

    fn new_identity(name: &str, max_pairs: u32) -> NewIdentity {
        NewIdentity {
            name: name.to_string(),
            kind: IdentityKind::Session,
            max_pairs,
            priority: 1,
        }
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[tokio::test]
    async fn register_then_fetch_credential() {
        let (creds, _dir) = setup().await;
        let identity = creds
            .register(new_identity("alpha", 25), &secret("session-alpha"))
            .await
            .unwrap();
        assert_eq!(identity.health, HealthState::Healthy);
        assert_eq!(identity.max_pairs, 25);

        let handle = creds.get_credential("alpha").await.unwrap();
        assert_eq!(handle.identity(), "alpha");
        assert_eq!(handle.expose(), "session-alpha");
        assert!(!format!("{handle:?}").contains("session-alpha"));
    }

    #[tokio::test]
    async fn unknown_identity_and_missing_secret() {
        let (creds, _dir) = setup().await;
        assert!(matches!(
            creds.get_credential("ghost").await,
            Err(RelayError::UnknownIdentity(_))
        ));

        creds
            .register(new_identity("beta", 5), &secret("s"))
            .await
            .unwrap();
        creds.vault().delete_secret(&secret_name("beta")).await.unwrap();
        let err = creds.get_credential("beta").await.unwrap_err();
        assert!(err.is_authorization());
    }

    #[tokio::test]
    async fn zero_capacity_is_rejected() {
        let (creds, _dir) = setup().await;
        assert!(creds
            .register(new_identity("empty", 0), &secret("s"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn health_updates_are_visible() {
        let (creds, _dir) = setup().await;
        creds
            .register(new_identity("alpha", 5), &secret("s"))
            .await
            .unwrap();
        creds
            .update_health("alpha", HealthState::Unauthorized, Some("revoked"), true)
            .await
            .unwrap();
        let identity = creds.get("alpha").await.unwrap();
        assert_eq!(identity.health, HealthState::Unauthorized);
        assert_eq!(identity.health_reason.as_deref(), Some("revoked"));
        assert!(identity.last_verified.is_some());
    }

    #[tokio::test]
    async fn remove_is_blocked_by_attached_pairs() {
        let (creds, _dir) = setup().await;
        creds
            .register(new_identity("alpha", 5), &secret("s"))
            .await
            .unwrap();
        let pair = pairs::insert_pair(
            &creds.db,
            &NewPair {
                name: "news".into(),
                source_channel: "src".into(),
                relay_channel: "rly".into(),
                destination_channel: "dst".into(),
                identity: "alpha".into(),
                destination_identity: None,
                enabled: true,
            },
        )
        .await
        .unwrap();

        let err = creds.remove("alpha").await.unwrap_err();
        assert!(matches!(err, RelayError::IdentityInUse { pairs: 1, .. }));
        assert!(creds.has_credential("alpha").await.unwrap());

        pairs::delete_pair(&creds.db, pair.id).await.unwrap();
        assert!(creds.remove("alpha").await.unwrap());
        assert!(!creds.has_credential("alpha").await.unwrap());
        assert!(creds.get("alpha").await.is_err());
    }
}
