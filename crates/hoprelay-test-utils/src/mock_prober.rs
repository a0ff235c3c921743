// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted identity prober.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use hoprelay_core::{
    AdapterType, CredentialHandle, ForwardingPair, HealthStatus, Identity, IdentityProber,
    PluginAdapter, ProbeOutcome, RelayError,
};

#[derive(Default)]
struct ProberState {
    /// Consumed one per probe; the last entry repeats.
    identity_scripts: HashMap<String, VecDeque<ProbeOutcome>>,
    /// Keyed by pair name.
    destinations: HashMap<String, ProbeOutcome>,
    identity_probes: HashMap<String, usize>,
    destination_probes: Vec<(String, String)>,
    delay: Option<Duration>,
}

/// Prober whose answers are set by the test. Unscripted probes succeed.
#[derive(Default)]
pub struct MockProber {
    state: Mutex<ProberState>,
}

impl MockProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer identity probes for `identity` with `outcomes` in order,
    /// repeating the last one.
    pub async fn script_identity(
        &self,
        identity: &str,
        outcomes: impl IntoIterator<Item = ProbeOutcome>,
    ) {
        self.state
            .lock()
            .await
            .identity_scripts
            .insert(identity.to_string(), outcomes.into_iter().collect());
    }

    pub async fn set_destination(&self, pair_name: &str, outcome: ProbeOutcome) {
        self.state
            .lock()
            .await
            .destinations
            .insert(pair_name.to_string(), outcome);
    }

    /// Make every probe take `delay`, for timeout tests.
    pub async fn set_delay(&self, delay: Duration) {
        self.state.lock().await.delay = Some(delay);
    }

    pub async fn identity_probe_count(&self, identity: &str) -> usize {
        self.state
            .lock()
            .await
            .identity_probes
            .get(identity)
            .copied()
            .unwrap_or(0)
    }

    /// `(identity, pair name)` of every destination probe.
    pub async fn destination_probes(&self) -> Vec<(String, String)> {
        self.state.lock().await.destination_probes.clone()
    }

    async fn delay(&self) {
        let delay = self.state.lock().await.delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl PluginAdapter for MockProber {
    fn name(&self) -> &str {
        "mock-prober"
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
impl IdentityProber for MockProber {
    async fn probe_identity(
        &self,
        identity: &Identity,
        _credential: &CredentialHandle,
    ) -> ProbeOutcome {
        self.delay().await;
        let mut state = self.state.lock().await;
        *state
            .identity_probes
            .entry(identity.name.clone())
            .or_default() += 1;
        match state.identity_scripts.get_mut(&identity.name) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or(ProbeOutcome::Ok),
            Some(script) => script.front().cloned().unwrap_or(ProbeOutcome::Ok),
            None => ProbeOutcome::Ok,
        }
    }

    async fn probe_destination(
        &self,
        identity: &Identity,
        _credential: &CredentialHandle,
        pair: &ForwardingPair,
    ) -> ProbeOutcome {
        self.delay().await;
        let mut state = self.state.lock().await;
        state
            .destination_probes
            .push((identity.name.clone(), pair.name.clone()));
        state
            .destinations
            .get(&pair.name)
            .cloned()
            .unwrap_or(ProbeOutcome::Ok)
    }
}
