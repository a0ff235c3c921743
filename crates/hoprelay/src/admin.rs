// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `hoprelay identity ...`, `hoprelay pair ...`, and `hoprelay sweep`.
//!
//! Every command goes through the orchestrator, so the CLI and health-driven
//! rebalancing share one mutation path. Changes land in storage; a running
//! `serve` picks them up on its next start.

use hoprelay_config::HoprelayConfig;
use hoprelay_core::{IdentityKind, PairId, RelayError};
use hoprelay_storage::queries::pairs;
use hoprelay_storage::{Database, NewIdentity, NewPair};
use secrecy::SecretString;

use crate::app::{self, App};

/// Environment variable read by `identity add` before prompting.
pub const IDENTITY_SECRET_ENV_VAR: &str = "HOPRELAY_IDENTITY_SECRET";

#[derive(Debug, Clone)]
pub struct IdentityArgs {
    pub name: String,
    pub kind: IdentityKind,
    pub max_pairs: Option<u32>,
    pub priority: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct PairArgs {
    pub name: String,
    pub source: String,
    pub relay: String,
    pub destination: String,
    pub identity: String,
    pub poster: Option<String>,
    pub disabled: bool,
}

pub async fn identity_list(config: HoprelayConfig) -> Result<(), RelayError> {
    let app = app::open(config, false).await?;
    let loads = app.orchestrator.scheduler().snapshot().await.identities;
    let identities = app.creds.list().await?;
    if identities.is_empty() {
        println!("no identities registered");
    }
    for identity in identities {
        let assigned = loads
            .iter()
            .find(|l| l.name == identity.name)
            .map_or(0, |l| l.assigned);
        println!(
            "{:<16} {:<10} {:<13} pairs {}/{}  priority {}  verified {}",
            identity.name,
            identity.kind,
            identity.health,
            assigned,
            identity.max_pairs,
            identity.priority,
            identity.last_verified.as_deref().unwrap_or("never"),
        );
    }
    finish(app).await
}

pub async fn identity_add(config: HoprelayConfig, args: IdentityArgs) -> Result<(), RelayError> {
    let secret = read_identity_secret(&args.name)?;
    let app = app::open(config, false).await?;
    let identity = NewIdentity {
        max_pairs: args
            .max_pairs
            .unwrap_or(app.config.scheduler.default_identity_capacity),
        priority: args
            .priority
            .unwrap_or(app.config.scheduler.default_priority),
        name: args.name,
        kind: args.kind,
    };
    let name = identity.name.clone();
    app.orchestrator.add_identity(identity, &secret).await?;
    println!("identity `{name}` registered");
    finish(app).await
}

pub async fn identity_remove(config: HoprelayConfig, name: &str) -> Result<(), RelayError> {
    let app = app::open(config, false).await?;
    if app.orchestrator.remove_identity(name).await? {
        println!("identity `{name}` removed");
    } else {
        println!("identity `{name}` did not exist");
    }
    finish(app).await
}

pub async fn pair_list(config: HoprelayConfig) -> Result<(), RelayError> {
    let app = app::open(config, false).await?;
    let all = pairs::list_pairs(&app.db).await?;
    if all.is_empty() {
        println!("no pairs configured");
    }
    for pair in all {
        let group = app
            .orchestrator
            .scheduler()
            .group_of(pair.id)
            .await
            .map_or_else(|| "-".to_string(), |g| g.id);
        println!(
            "{:>4}  {:<16} {:<9} {:<16} group {:<24} {} -> {} -> {}",
            pair.id,
            pair.name,
            pair.status,
            pair.identity,
            group,
            pair.source_channel,
            pair.relay_channel,
            pair.destination_channel,
        );
    }
    finish(app).await
}

pub async fn pair_add(config: HoprelayConfig, args: PairArgs) -> Result<(), RelayError> {
    let app = app::open(config, false).await?;
    let new = NewPair {
        name: args.name,
        source_channel: args.source,
        relay_channel: args.relay,
        destination_channel: args.destination,
        identity: args.identity,
        destination_identity: args.poster,
        enabled: !args.disabled,
    };
    let pair = app.orchestrator.add_pair(new).await?;
    println!(
        "pair `{}` created with id {} ({})",
        pair.name, pair.id, pair.status
    );
    finish(app).await
}

pub async fn pair_remove(config: HoprelayConfig, pair: &str) -> Result<(), RelayError> {
    let app = app::open(config, false).await?;
    let id = resolve_pair(&app.db, pair).await?;
    app.orchestrator.remove_pair(id).await?;
    println!("pair {id} removed with its mappings");
    finish(app).await
}

pub async fn pair_set_enabled(
    config: HoprelayConfig,
    pair: &str,
    enabled: bool,
) -> Result<(), RelayError> {
    let app = app::open(config, false).await?;
    let id = resolve_pair(&app.db, pair).await?;
    let pair = if enabled {
        app.orchestrator.enable_pair(id).await?
    } else {
        app.orchestrator.disable_pair(id).await?
    };
    println!("pair `{}` is now {}", pair.name, pair.status);
    finish(app).await
}

pub async fn pair_reassign(
    config: HoprelayConfig,
    pair_refs: &[String],
    identity: &str,
) -> Result<(), RelayError> {
    let app = app::open(config, false).await?;
    let mut ids = Vec::with_capacity(pair_refs.len());
    for pair in pair_refs {
        ids.push(resolve_pair(&app.db, pair).await?);
    }
    let report = app.orchestrator.reassign(&ids, identity).await;
    for assignment in &report.assigned {
        println!(
            "moved    pair {} -> {} (group {})",
            assignment.pair, assignment.identity, assignment.group_id
        );
    }
    for (pair, err) in &report.rejected {
        println!("rejected pair {pair}: {err}");
    }
    println!(
        "{} of {} pairs reassigned to `{identity}`",
        report.assigned.len(),
        ids.len()
    );
    finish(app).await
}

pub async fn pair_test(config: HoprelayConfig, pair: &str) -> Result<(), RelayError> {
    let app = app::open(config, false).await?;
    let id = resolve_pair(&app.db, pair).await?;
    let check = app.orchestrator.test_pair(id).await?;
    println!("identity    {:<16} {}", check.identity, check.identity_outcome);
    println!("destination {:<16} {}", check.poster, check.destination_outcome);
    println!("{}", if check.ok { "ok" } else { "FAILED" });
    finish(app).await
}

pub async fn sweep(config: HoprelayConfig) -> Result<(), RelayError> {
    let app = app::open(config, false).await?;
    let removed = app.orchestrator.sweep_now().await?;
    println!(
        "removed {removed} mappings older than {} days",
        app.config.retention.horizon_days
    );
    finish(app).await
}

async fn finish(app: App) -> Result<(), RelayError> {
    app.orchestrator.shutdown().await;
    Ok(())
}

/// Accept a numeric pair id or a pair name.
pub async fn resolve_pair(db: &Database, reference: &str) -> Result<PairId, RelayError> {
    if let Ok(raw) = reference.parse::<i64>() {
        let id = PairId(raw);
        if pairs::get_pair(db, id).await?.is_some() {
            return Ok(id);
        }
    }
    pairs::get_pair_by_name(db, reference)
        .await?
        .map(|p| p.id)
        .ok_or_else(|| RelayError::Config(format!("no pair with id or name `{reference}`")))
}

fn read_identity_secret(name: &str) -> Result<SecretString, RelayError> {
    if let Ok(secret) = std::env::var(IDENTITY_SECRET_ENV_VAR)
        && !secret.is_empty()
    {
        return Ok(SecretString::from(secret));
    }
    let secret = rpassword::prompt_password(format!("Credential for `{name}`: "))
        .map_err(|e| RelayError::Vault(format!("failed to read credential: {e}")))?;
    if secret.is_empty() {
        return Err(RelayError::Vault("credential must not be empty".to_string()));
    }
    Ok(SecretString::from(secret))
}

#[cfg(test)]
mod tests {
    use hoprelay_test_utils::TestHarness;
    use secrecy::ExposeSecret;
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn identity_secret_comes_from_the_environment() {
        // SAFETY: env mutation is confined to #[serial] tests.
        unsafe { std::env::set_var(IDENTITY_SECRET_ENV_VAR, "session-blob") };
        let secret = read_identity_secret("alpha");
        unsafe { std::env::remove_var(IDENTITY_SECRET_ENV_VAR) };
        assert_eq!(secret.unwrap().expose_secret(), "session-blob");
    }

    #[tokio::test]
    async fn pairs_resolve_by_id_or_name() {
        let harness = TestHarness::builder()
            .identity("alpha", 5, 1)
            .pair("news", "alpha")
            .build()
            .await
            .unwrap();
        let news = harness.pair_id("news").unwrap();

        assert_eq!(resolve_pair(&harness.db, "news").await.unwrap(), news);
        assert_eq!(
            resolve_pair(&harness.db, &news.to_string()).await.unwrap(),
            news
        );
        assert!(resolve_pair(&harness.db, "sports").await.is_err());
        assert!(resolve_pair(&harness.db, "999").await.is_err());
    }
}
