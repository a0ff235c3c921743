// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted hop client.
//!
//! `MockHop` keeps the messages it "posted", records every call, and can be
//! told to fail, to report messages as gone, or to hold sends until resumed.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};

use hoprelay_core::{
    AdapterType, HealthStatus, Hop, HopAdapter, HopMessageId, HopOutcome, PluginAdapter,
    RelayError,
};

/// One call received by a [`MockHop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HopCall {
    Send {
        content: String,
        reply_to: Option<HopMessageId>,
    },
    Edit {
        id: HopMessageId,
        content: String,
    },
    Delete {
        id: HopMessageId,
    },
}

/// Failure a [`MockHop`] can inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transient,
    NotFound,
    Unauthorized,
}

#[derive(Default)]
struct HopState {
    next_id: u64,
    calls: Vec<HopCall>,
    live: HashMap<HopMessageId, String>,
    send_faults: VecDeque<Fault>,
    sticky: Option<Fault>,
    identity: String,
    shutdowns: usize,
}

pub struct MockHop {
    hop: Hop,
    name: String,
    state: Mutex<HopState>,
    paused: watch::Sender<bool>,
}

impl MockHop {
    pub fn new(hop: Hop) -> Self {
        Self::named(hop, format!("mock-{hop}"))
    }

    pub fn named(hop: Hop, name: impl Into<String>) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            hop,
            name: name.into(),
            state: Mutex::new(HopState::default()),
            paused,
        }
    }

    /// Identity named in injected authorization errors.
    pub async fn set_identity(&self, identity: &str) {
        self.state.lock().await.identity = identity.to_string();
    }

    pub async fn identity(&self) -> String {
        self.state.lock().await.identity.clone()
    }

    /// Fail the next `count` sends with `fault`.
    pub async fn fail_next_sends(&self, count: usize, fault: Fault) {
        let mut state = self.state.lock().await;
        state.send_faults.extend(std::iter::repeat_n(fault, count));
    }

    /// Fail every call with `fault` until [`Self::clear_faults`].
    pub async fn fail_always(&self, fault: Fault) {
        self.state.lock().await.sticky = Some(fault);
    }

    pub async fn clear_faults(&self) {
        let mut state = self.state.lock().await;
        state.send_faults.clear();
        state.sticky = None;
    }

    /// Hold every send after it is recorded until [`Self::resume`].
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Forget a posted message, as if someone deleted it on the platform.
    pub async fn remove_remote(&self, id: &HopMessageId) {
        self.state.lock().await.live.remove(id);
    }

    pub async fn calls(&self) -> Vec<HopCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn send_count(&self) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| matches!(c, HopCall::Send { .. }))
            .count()
    }

    /// Current content of a posted message, if it still exists.
    pub async fn content_of(&self, id: &HopMessageId) -> Option<String> {
        self.state.lock().await.live.get(id).cloned()
    }

    pub async fn live_count(&self) -> usize {
        self.state.lock().await.live.len()
    }

    /// Number of times the client was shut down.
    pub async fn shutdown_count(&self) -> usize {
        self.state.lock().await.shutdowns
    }

    /// Wait until at least `count` calls were recorded.
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.state.lock().await.calls.len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn fault_error(&self, fault: Fault, identity: &str, what: &str) -> RelayError {
        match fault {
            Fault::Transient => RelayError::TransientHop {
                hop: self.hop,
                message: format!("injected failure on {what}"),
            },
            Fault::NotFound => RelayError::NotFound {
                hop: self.hop,
                what: what.to_string(),
            },
            Fault::Unauthorized => RelayError::Authorization {
                identity: identity.to_string(),
                message: format!("injected rejection on {what}"),
            },
        }
    }

    async fn wait_if_paused(&self) {
        let mut rx = self.paused.subscribe();
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

#[async_trait]
impl PluginAdapter for MockHop {
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
        self.state.lock().await.shutdowns += 1;
        Ok(())
    }
}

#[async_trait]
impl HopAdapter for MockHop {
    fn hop(&self) -> Hop {
        self.hop
    }

    async fn send(
        &self,
        content: &str,
        reply_to: Option<&HopMessageId>,
    ) -> Result<HopMessageId, RelayError> {
        self.state.lock().await.calls.push(HopCall::Send {
            content: content.to_string(),
            reply_to: reply_to.cloned(),
        });
        self.wait_if_paused().await;

        let mut state = self.state.lock().await;
        if let Some(fault) = state.sticky.or_else(|| state.send_faults.pop_front()) {
            return Err(self.fault_error(fault, &state.identity, "send"));
        }
        state.next_id += 1;
        let id = HopMessageId(format!("{}-{}", self.hop, state.next_id));
        state.live.insert(id.clone(), content.to_string());
        Ok(id)
    }

    async fn edit(&self, id: &HopMessageId, content: &str) -> Result<HopOutcome, RelayError> {
        let mut state = self.state.lock().await;
        state.calls.push(HopCall::Edit {
            id: id.clone(),
            content: content.to_string(),
        });
        if let Some(fault) = state.sticky {
            return Err(self.fault_error(fault, &state.identity, "edit"));
        }
        match state.live.get_mut(id) {
            Some(existing) => {
                *existing = content.to_string();
                Ok(HopOutcome::Applied)
            }
            None => Ok(HopOutcome::NotFound),
        }
    }

    async fn delete(&self, id: &HopMessageId) -> Result<HopOutcome, RelayError> {
        let mut state = self.state.lock().await;
        state.calls.push(HopCall::Delete { id: id.clone() });
        if let Some(fault) = state.sticky {
            return Err(self.fault_error(fault, &state.identity, "delete"));
        }
        match state.live.remove(id) {
            Some(_) => Ok(HopOutcome::Applied),
            None => Ok(HopOutcome::NotFound),
        }
    }
}
