// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared startup for subcommands: database, vault, config import, and an
//! orchestrator wired to the journal hops.

use std::sync::Arc;

use hoprelay_config::HoprelayConfig;
use hoprelay_core::RelayError;
use hoprelay_relay::Orchestrator;
use hoprelay_storage::queries::pairs;
use hoprelay_storage::{Database, NewPair};
use hoprelay_vault::{CredentialVault, import_config_secrets};
use tracing::{info, warn};

use crate::journal::{Journal, JournalFactory, StaticProber};

pub struct App {
    pub config: HoprelayConfig,
    pub db: Database,
    pub creds: Arc<CredentialVault>,
    pub journal: Arc<Journal>,
    pub orchestrator: Arc<Orchestrator>,
}

/// Open storage and the vault (prompting for the passphrase if needed),
/// import identities declared in config, and build the orchestrator.
/// `echo` makes the journal print hop calls to stdout.
pub async fn open(config: HoprelayConfig, echo: bool) -> Result<App, RelayError> {
    let db = Database::open_with_config(&config.storage).await?;
    let creds = Arc::new(hoprelay_vault::open_credentials(db.clone(), &config.vault).await?);
    with_credentials(config, db, creds, echo).await
}

/// [`open`] with an already unlocked vault.
pub async fn with_credentials(
    config: HoprelayConfig,
    db: Database,
    creds: Arc<CredentialVault>,
    echo: bool,
) -> Result<App, RelayError> {
    let report = import_config_secrets(&creds, &config).await?;
    if !report.imported.is_empty() {
        info!(identities = ?report.imported, "imported credentials from config");
    }
    for name in &report.missing {
        warn!(identity = %name, "declared identity has no credential");
    }

    let journal = Arc::new(if echo {
        Journal::echoing()
    } else {
        Journal::default()
    });
    let orchestrator = Orchestrator::new(
        config.clone(),
        db.clone(),
        creds.clone(),
        Arc::new(StaticProber),
        Arc::new(JournalFactory::new(journal.clone())),
    )
    .await?;

    Ok(App {
        config,
        db,
        creds,
        journal,
        orchestrator,
    })
}

/// Create the pairs declared in config that storage does not have yet.
/// Existing pairs are left alone; the CLI owns them after creation.
pub async fn apply_declared_pairs(app: &App) -> Result<usize, RelayError> {
    let mut added = 0;
    for decl in &app.config.pairs {
        if pairs::get_pair_by_name(&app.db, &decl.name).await?.is_some() {
            continue;
        }
        let new = NewPair {
            name: decl.name.clone(),
            source_channel: decl.source.clone(),
            relay_channel: decl.relay.clone(),
            destination_channel: decl.destination.clone(),
            identity: decl.identity.clone(),
            destination_identity: decl.destination_identity.clone(),
            enabled: decl.enabled,
        };
        match app.orchestrator.add_pair(new).await {
            Ok(pair) => {
                info!(pair_id = %pair.id, pair = %pair.name, "declared pair created");
                added += 1;
            }
            Err(e) => warn!(pair = %decl.name, error = %e, "declared pair not activated"),
        }
    }
    Ok(added)
}
