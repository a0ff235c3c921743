// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic identity probing.
//!
//! The monitor only observes: it persists health and publishes
//! [`HealthTransition`]s, and leaves pair placement to whoever consumes
//! the transition channel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hoprelay_config::model::HealthConfig;
use hoprelay_core::{
    CredentialHandle, ForwardingPair, HealthState, Identity, IdentityProber, ProbeOutcome,
    RelayError,
};
use hoprelay_storage::Database;
use hoprelay_storage::queries::{health, pairs};
use hoprelay_vault::CredentialVault;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tracker::ProbeTracker;

/// A change of an identity's health state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthTransition {
    pub identity: String,
    pub from: HealthState,
    pub to: HealthState,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Result of a read-only check of one pair's credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairCheck {
    pub identity: String,
    pub identity_outcome: String,
    pub poster: String,
    pub destination_outcome: String,
    pub ok: bool,
}

pub struct HealthMonitor {
    db: Database,
    creds: Arc<CredentialVault>,
    prober: Arc<dyn IdentityProber>,
    config: HealthConfig,
    trackers: Mutex<HashMap<String, ProbeTracker>>,
    events: mpsc::UnboundedSender<HealthTransition>,
}

impl HealthMonitor {
    /// Create a monitor and the receiving end of its transition channel.
    pub fn new(
        db: Database,
        creds: Arc<CredentialVault>,
        prober: Arc<dyn IdentityProber>,
        config: HealthConfig,
    ) -> (Self, mpsc::UnboundedReceiver<HealthTransition>) {
        let (events, rx) = mpsc::unbounded_channel();
        let monitor = Self {
            db,
            creds,
            prober,
            config,
            trackers: Mutex::new(HashMap::new()),
            events,
        };
        (monitor, rx)
    }

    /// Probe every identity each `probe_interval` until cancelled. The first
    /// cycle runs immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.probe_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.probe_interval_secs,
            "health monitor started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.probe_cycle().await {
                        warn!(error = %e, "health probe cycle failed");
                    }
                }
            }
        }
        info!("health monitor stopped");
    }

    /// Probe all identities concurrently. Returns the resulting states.
    pub async fn probe_cycle(&self) -> Result<Vec<(String, HealthState)>, RelayError> {
        let identities = self.creds.list().await?;
        let probes = identities.iter().map(|identity| async move {
            let result = self.probe_identity(identity).await;
            (identity.name.clone(), result)
        });

        let mut states = Vec::with_capacity(identities.len());
        for (name, result) in futures::future::join_all(probes).await {
            match result {
                Ok(state) => states.push((name, state)),
                Err(e) => warn!(identity = %name, error = %e, "identity probe failed"),
            }
        }
        debug!(probed = states.len(), "health probe cycle complete");
        Ok(states)
    }

    /// Check one identity's credential and, if that passes, its permission
    /// on every destination channel it posts to.
    pub async fn probe_identity(&self, identity: &Identity) -> Result<HealthState, RelayError> {
        let outcome = match self.creds.get_credential(&identity.name).await {
            Ok(credential) => self.probe_with(identity, &credential).await?,
            Err(RelayError::Authorization { message, .. }) => ProbeOutcome::Unauthorized(message),
            Err(e) => return Err(e),
        };
        self.observe(identity, outcome).await
    }

    /// Feed an authorization failure seen on a live hop into the health
    /// state, without waiting for the next probe cycle.
    pub async fn report_authorization_failure(
        &self,
        identity: &str,
        message: &str,
    ) -> Result<HealthState, RelayError> {
        let identity = self.creds.get(identity).await?;
        self.observe(&identity, ProbeOutcome::Unauthorized(message.to_string()))
            .await
    }

    /// Last state computed for an identity in this process.
    pub async fn current(&self, identity: &str) -> Option<HealthState> {
        self.trackers.lock().await.get(identity).map(ProbeTracker::state)
    }

    /// Probe a pair's owner and destination poster without recording
    /// anything.
    pub async fn check_pair(&self, pair: &ForwardingPair) -> Result<PairCheck, RelayError> {
        let owner = self.creds.get(&pair.identity).await?;
        let identity_outcome = match self.creds.get_credential(&owner.name).await {
            Ok(credential) => self.timed_identity_probe(&owner, &credential).await,
            Err(RelayError::Authorization { message, .. }) => ProbeOutcome::Unauthorized(message),
            Err(e) => return Err(e),
        };

        let poster = self.creds.get(pair.destination_poster()).await?;
        let destination_outcome = match self.creds.get_credential(&poster.name).await {
            Ok(credential) => self.timed_destination_probe(&poster, &credential, pair).await,
            Err(RelayError::Authorization { message, .. }) => ProbeOutcome::Unauthorized(message),
            Err(e) => return Err(e),
        };

        Ok(PairCheck {
            ok: identity_outcome == ProbeOutcome::Ok && destination_outcome == ProbeOutcome::Ok,
            identity: owner.name,
            identity_outcome: describe(&identity_outcome),
            poster: poster.name,
            destination_outcome: describe(&destination_outcome),
        })
    }

    async fn probe_with(
        &self,
        identity: &Identity,
        credential: &CredentialHandle,
    ) -> Result<ProbeOutcome, RelayError> {
        let outcome = self.timed_identity_probe(identity, credential).await;
        if outcome != ProbeOutcome::Ok {
            return Ok(outcome);
        }

        let mut worst = ProbeOutcome::Ok;
        for pair in pairs::list_destination_bound(&self.db, &identity.name).await? {
            match self.timed_destination_probe(identity, credential, &pair).await {
                ProbeOutcome::Ok => {}
                ProbeOutcome::Unauthorized(reason) => {
                    return Ok(ProbeOutcome::Unauthorized(format!(
                        "pair `{}`: {reason}",
                        pair.name
                    )));
                }
                ProbeOutcome::Failed(reason) => {
                    if worst == ProbeOutcome::Ok {
                        worst = ProbeOutcome::Failed(format!("pair `{}`: {reason}", pair.name));
                    }
                }
            }
        }
        Ok(worst)
    }

    async fn timed_identity_probe(
        &self,
        identity: &Identity,
        credential: &CredentialHandle,
    ) -> ProbeOutcome {
        let timeout = self.config.probe_timeout();
        tokio::time::timeout(timeout, self.prober.probe_identity(identity, credential))
            .await
            .unwrap_or_else(|_| ProbeOutcome::Failed(format!("probe timed out after {timeout:?}")))
    }

    async fn timed_destination_probe(
        &self,
        identity: &Identity,
        credential: &CredentialHandle,
        pair: &ForwardingPair,
    ) -> ProbeOutcome {
        let timeout = self.config.probe_timeout();
        tokio::time::timeout(
            timeout,
            self.prober.probe_destination(identity, credential, pair),
        )
        .await
        .unwrap_or_else(|_| ProbeOutcome::Failed(format!("probe timed out after {timeout:?}")))
    }

    /// Apply an outcome, persist it, and publish a transition if the state
    /// changed. The state change is computed and published under the
    /// tracker lock, so transitions for one identity keep their order;
    /// publishing never waits, and persistence happens after the lock is
    /// released.
    async fn observe(
        &self,
        identity: &Identity,
        outcome: ProbeOutcome,
    ) -> Result<HealthState, RelayError> {
        let reason = match &outcome {
            ProbeOutcome::Ok => None,
            ProbeOutcome::Failed(r) | ProbeOutcome::Unauthorized(r) => Some(r.clone()),
        };

        let (from, to) = {
            let mut trackers = self.trackers.lock().await;
            let tracker = trackers.entry(identity.name.clone()).or_insert_with(|| {
                ProbeTracker::new(identity.health, self.config.unreachable_after)
            });
            let from = tracker.state();
            let to = tracker.observe(&outcome);
            if from != to {
                let transition = HealthTransition {
                    identity: identity.name.clone(),
                    from,
                    to,
                    reason: reason.clone(),
                    at: Utc::now(),
                };
                if self.events.send(transition).is_err() {
                    debug!(identity = %identity.name, "no transition subscriber");
                }
            }
            (from, to)
        };

        if from != to {
            metrics::counter!(
                "hoprelay_health_transitions_total",
                "from" => from.to_string(),
                "to" => to.to_string()
            )
            .increment(1);
            if to.is_failed() {
                warn!(identity = %identity.name, %from, %to, reason = reason.as_deref().unwrap_or(""), "identity health changed");
            } else {
                info!(identity = %identity.name, %from, %to, "identity health changed");
            }
        }

        health::record_health(
            &self.db,
            &identity.name,
            to,
            reason.as_deref(),
            self.config.history_samples,
        )
        .await?;
        self.creds
            .update_health(
                &identity.name,
                to,
                reason.as_deref(),
                outcome == ProbeOutcome::Ok,
            )
            .await?;
        Ok(to)
    }
}

fn describe(outcome: &ProbeOutcome) -> String {
    match outcome {
        ProbeOutcome::Ok => "ok".to_string(),
        ProbeOutcome::Failed(reason) => format!("failed: {reason}"),
        ProbeOutcome::Unauthorized(reason) => format!("unauthorized: {reason}"),
    }
}
