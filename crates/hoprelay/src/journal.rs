// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Loopback hop clients for `hoprelay serve`.
//!
//! Platform adapters are not part of this repository, so the service runs
//! against a journal: every send, edit, and delete is kept in memory and,
//! when echo is on, written to stdout as one JSON line. Edits and deletes of
//! ids the journal never issued come back as not-found, as they would from a
//! real platform.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hoprelay_core::{
    AdapterType, CredentialHandle, ForwardingPair, HealthStatus, Hop, HopAdapter,
    HopAdapterFactory, HopAdapters, HopMessageId, HopOutcome, Identity, IdentityProber,
    PairId, PluginAdapter, ProbeOutcome, RelayError,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalAction {
    Send,
    Edit,
    Delete,
}

/// One hop call as recorded by the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub hop: Hop,
    pub pair: PairId,
    pub channel: String,
    pub identity: String,
    pub action: JournalAction,
    pub id: HopMessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<HopMessageId>,
    /// False when an edit or delete named an unknown message.
    pub found: bool,
}

#[derive(Default)]
struct JournalState {
    entries: Vec<JournalEntry>,
    live: HashMap<HopMessageId, String>,
}

#[derive(Default)]
pub struct Journal {
    state: Mutex<JournalState>,
    next_id: AtomicU64,
    echo: bool,
}

impl Journal {
    /// A journal that also prints each entry to stdout.
    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    pub async fn call_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    #[cfg(test)]
    pub async fn entries(&self) -> Vec<JournalEntry> {
        self.state.lock().await.entries.clone()
    }

    #[cfg(test)]
    pub async fn live_content(&self, id: &HopMessageId) -> Option<String> {
        self.state.lock().await.live.get(id).cloned()
    }

    fn issue_id(&self, hop: Hop) -> HopMessageId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        HopMessageId(format!("{hop}-{n}"))
    }

    async fn record(&self, entry: JournalEntry) {
        if self.echo {
            match serde_json::to_string(&entry) {
                Ok(line) => {
                    let mut out = std::io::stdout().lock();
                    if let Err(e) = writeln!(out, "{line}") {
                        warn!(error = %e, "journal line not written");
                    }
                }
                Err(e) => warn!(error = %e, "journal entry not serializable"),
            }
        }
        self.state.lock().await.entries.push(entry);
    }
}

/// A hop client that writes to a [`Journal`].
pub struct JournalHop {
    journal: Arc<Journal>,
    name: String,
    hop: Hop,
    pair: PairId,
    channel: String,
    identity: String,
}

impl JournalHop {
    pub fn new(
        journal: Arc<Journal>,
        hop: Hop,
        pair: &ForwardingPair,
        identity: impl Into<String>,
    ) -> Self {
        let channel = match hop {
            Hop::Source => pair.source_channel.clone(),
            Hop::Relay => pair.relay_channel.clone(),
            Hop::Destination => pair.destination_channel.clone(),
        };
        Self {
            journal,
            name: format!("journal-{hop}-{}", pair.id),
            hop,
            pair: pair.id,
            channel,
            identity: identity.into(),
        }
    }

    fn entry(
        &self,
        action: JournalAction,
        id: HopMessageId,
        content: Option<&str>,
        reply_to: Option<&HopMessageId>,
        found: bool,
    ) -> JournalEntry {
        JournalEntry {
            hop: self.hop,
            pair: self.pair,
            channel: self.channel.clone(),
            identity: self.identity.clone(),
            action,
            id,
            content: content.map(str::to_string),
            reply_to: reply_to.cloned(),
            found,
        }
    }
}

#[async_trait]
impl PluginAdapter for JournalHop {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Hop
    }

    async fn health_check(&self) -> Result<HealthStatus, RelayError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), RelayError> {
        Ok(())
    }
}

#[async_trait]
impl HopAdapter for JournalHop {
    fn hop(&self) -> Hop {
        self.hop
    }

    async fn send(
        &self,
        content: &str,
        reply_to: Option<&HopMessageId>,
    ) -> Result<HopMessageId, RelayError> {
        let id = self.journal.issue_id(self.hop);
        self.journal
            .state
            .lock()
            .await
            .live
            .insert(id.clone(), content.to_string());
        self.journal
            .record(self.entry(JournalAction::Send, id.clone(), Some(content), reply_to, true))
            .await;
        debug!(hop = %self.hop, pair_id = %self.pair, id = %id, "journal send");
        Ok(id)
    }

    async fn edit(&self, id: &HopMessageId, content: &str) -> Result<HopOutcome, RelayError> {
        let found = match self.journal.state.lock().await.live.get_mut(id) {
            Some(current) => {
                *current = content.to_string();
                true
            }
            None => false,
        };
        self.journal
            .record(self.entry(JournalAction::Edit, id.clone(), Some(content), None, found))
            .await;
        Ok(if found {
            HopOutcome::Applied
        } else {
            HopOutcome::NotFound
        })
    }

    async fn delete(&self, id: &HopMessageId) -> Result<HopOutcome, RelayError> {
        let found = self.journal.state.lock().await.live.remove(id).is_some();
        self.journal
            .record(self.entry(JournalAction::Delete, id.clone(), None, None, found))
            .await;
        Ok(if found {
            HopOutcome::Applied
        } else {
            HopOutcome::NotFound
        })
    }
}

/// Builds journal hops for every pair. An empty credential is rejected the
/// way a platform rejects a revoked session.
pub struct JournalFactory {
    journal: Arc<Journal>,
}

impl JournalFactory {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self { journal }
    }
}

fn reject_empty(credential: &CredentialHandle) -> Result<(), RelayError> {
    if credential.expose().trim().is_empty() {
        return Err(RelayError::Authorization {
            identity: credential.identity().to_string(),
            message: "empty credential".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl HopAdapterFactory for JournalFactory {
    async fn build(
        &self,
        pair: &ForwardingPair,
        relay_credential: &CredentialHandle,
        destination_credential: &CredentialHandle,
    ) -> Result<HopAdapters, RelayError> {
        reject_empty(relay_credential)?;
        reject_empty(destination_credential)?;
        Ok(HopAdapters {
            relay: Arc::new(JournalHop::new(
                self.journal.clone(),
                Hop::Relay,
                pair,
                relay_credential.identity(),
            )),
            destination: Arc::new(JournalHop::new(
                self.journal.clone(),
                Hop::Destination,
                pair,
                destination_credential.identity(),
            )),
            relay_identity: relay_credential.identity().to_string(),
            destination_identity: destination_credential.identity().to_string(),
        })
    }
}

/// Prober for the journal setup: a credential is valid when it is not empty.
#[derive(Debug, Default)]
pub struct StaticProber;

#[async_trait]
impl PluginAdapter for StaticProber {
    fn name(&self) -> &str {
        "static-prober"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Prober
    }

    async fn health_check(&self) -> Result<HealthStatus, RelayError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), RelayError> {
        Ok(())
    }
}

#[async_trait]
impl IdentityProber for StaticProber {
    async fn probe_identity(
        &self,
        _identity: &Identity,
        credential: &CredentialHandle,
    ) -> ProbeOutcome {
        match reject_empty(credential) {
            Ok(()) => ProbeOutcome::Ok,
            Err(e) => ProbeOutcome::Unauthorized(e.to_string()),
        }
    }

    async fn probe_destination(
        &self,
        _identity: &Identity,
        credential: &CredentialHandle,
        _pair: &ForwardingPair,
    ) -> ProbeOutcome {
        match reject_empty(credential) {
            Ok(()) => ProbeOutcome::Ok,
            Err(e) => ProbeOutcome::Unauthorized(e.to_string()),
        }
    }
}
