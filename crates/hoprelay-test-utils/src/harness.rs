// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for integration tests.
//!
//! `TestHarness` sets up a temporary database, an unlocked credential vault
//! with registered identities, inserted pairs, and the mock collaborators.
//! Timing settings are shrunk so retries and probes finish in milliseconds.

use std::collections::HashMap;
use std::sync::Arc;

use hoprelay_config::HoprelayConfig;
use hoprelay_core::{IdentityKind, PairId, RelayError};
use hoprelay_storage::queries::pairs;
use hoprelay_storage::{Database, NewIdentity, NewPair, SqliteMappingStore};
use hoprelay_vault::CredentialVault;
use secrecy::SecretString;

use crate::mock_factory::MockFactory;
use crate::mock_prober::MockProber;

struct IdentitySpec {
    name: String,
    kind: IdentityKind,
    max_pairs: u32,
    priority: i32,
}

struct PairSpec {
    name: String,
    identity: String,
    destination_identity: Option<String>,
    enabled: bool,
}

pub struct TestHarnessBuilder {
    identities: Vec<IdentitySpec>,
    pairs: Vec<PairSpec>,
    config: HoprelayConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut config = HoprelayConfig::default();
        config.retry.base_backoff_ms = 1;
        config.retry.max_backoff_ms = 5;
        config.retry.jitter = false;
        config.relay.hop_timeout_secs = 2;
        config.relay.shutdown_timeout_secs = 2;
        config.health.probe_timeout_secs = 1;
        config.vault.kdf_memory_cost = 32768;
        config.vault.kdf_iterations = 2;
        config.vault.kdf_parallelism = 1;
        Self {
            identities: Vec::new(),
            pairs: Vec::new(),
            config,
        }
    }

    /// A session identity.
    pub fn identity(mut self, name: &str, max_pairs: u32, priority: i32) -> Self {
        self.identities.push(IdentitySpec {
            name: name.to_string(),
            kind: IdentityKind::Session,
            max_pairs,
            priority,
        });
        self
    }

    /// A bot-token identity, typically a destination poster.
    pub fn bot(mut self, name: &str, max_pairs: u32) -> Self {
        self.identities.push(IdentitySpec {
            name: name.to_string(),
            kind: IdentityKind::BotToken,
            max_pairs,
            priority: 0,
        });
        self
    }

    pub fn pair(mut self, name: &str, identity: &str) -> Self {
        self.pairs.push(PairSpec {
            name: name.to_string(),
            identity: identity.to_string(),
            destination_identity: None,
            enabled: true,
        });
        self
    }

    pub fn pair_with_poster(mut self, name: &str, identity: &str, poster: &str) -> Self {
        self.pairs.push(PairSpec {
            name: name.to_string(),
            identity: identity.to_string(),
            destination_identity: Some(poster.to_string()),
            enabled: true,
        });
        self
    }

    pub fn disabled_pair(mut self, name: &str, identity: &str) -> Self {
        self.pairs.push(PairSpec {
            name: name.to_string(),
            identity: identity.to_string(),
            destination_identity: None,
            enabled: false,
        });
        self
    }

    /// Adjust any config value before the harness is built.
    pub fn configure(mut self, f: impl FnOnce(&mut HoprelayConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub async fn build(mut self) -> Result<TestHarness, RelayError> {
        let dir = tempfile::TempDir::new().map_err(|e| RelayError::Storage { source: e.into() })?;
        self.config.storage.database_path =
            dir.path().join("hoprelay.db").to_string_lossy().into_owned();

        let db = Database::open_with_config(&self.config.storage).await?;
        let creds = hoprelay_vault::unlock_or_create(
            db.clone(),
            &SecretString::from("harness-passphrase".to_string()),
            &self.config.vault,
        )
        .await?;

        for spec in &self.identities {
            creds
                .register(
                    NewIdentity {
                        name: spec.name.clone(),
                        kind: spec.kind,
                        max_pairs: spec.max_pairs,
                        priority: spec.priority,
                    },
                    &SecretString::from(format!("secret-{}", spec.name)),
                )
                .await?;
        }

        let mut pair_ids = HashMap::new();
        for spec in &self.pairs {
            let pair = pairs::insert_pair(
                &db,
                &NewPair {
                    name: spec.name.clone(),
                    source_channel: format!("source/{}", spec.name),
                    relay_channel: format!("relay/{}", spec.name),
                    destination_channel: format!("destination/{}", spec.name),
                    identity: spec.identity.clone(),
                    destination_identity: spec.destination_identity.clone(),
                    enabled: spec.enabled,
                },
            )
            .await?;
            pair_ids.insert(spec.name.clone(), pair.id);
        }

        Ok(TestHarness {
            config: self.config,
            db,
            creds: Arc::new(creds),
            prober: Arc::new(MockProber::new()),
            factory: Arc::new(MockFactory::new()),
            pair_ids,
            _dir: dir,
        })
    }
}

pub struct TestHarness {
    pub config: HoprelayConfig,
    pub db: Database,
    pub creds: Arc<CredentialVault>,
    pub prober: Arc<MockProber>,
    pub factory: Arc<MockFactory>,
    pair_ids: HashMap<String, PairId>,
    _dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Id of a pair declared on the builder.
    pub fn pair_id(&self, name: &str) -> Option<PairId> {
        self.pair_ids.get(name).copied()
    }

    pub fn mapping_store(&self) -> Arc<SqliteMappingStore> {
        Arc::new(SqliteMappingStore::new(self.db.clone()))
    }
}
