// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hop adapter traits: the boundary to the relay and destination platforms.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RelayError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{CredentialHandle, ForwardingPair, Hop, HopMessageId, HopOutcome};

/// Client for one outbound hop of one pair.
///
/// Implementations must report a vanished remote message as
/// `Ok(HopOutcome::NotFound)` (or `RelayError::NotFound` from `send`) and never
/// as a transient error, so edits on deleted messages stay non-fatal.
#[async_trait]
pub trait HopAdapter: PluginAdapter {
    /// Which hop this client talks to.
    fn hop(&self) -> Hop;

    /// Post a message, optionally as a reply, and return the hop's id for it.
    async fn send(
        &self,
        content: &str,
        reply_to: Option<&HopMessageId>,
    ) -> Result<HopMessageId, RelayError>;

    /// Replace the content of a previously sent message.
    async fn edit(&self, id: &HopMessageId, content: &str) -> Result<HopOutcome, RelayError>;

    /// Remove a previously sent message.
    async fn delete(&self, id: &HopMessageId) -> Result<HopOutcome, RelayError>;
}

/// The two outbound clients a pipeline drives, plus who they act as.
#[derive(Clone)]
pub struct HopAdapters {
    pub relay: Arc<dyn HopAdapter>,
    pub destination: Arc<dyn HopAdapter>,
    /// Identity acting on the relay hop.
    pub relay_identity: String,
    /// Identity acting on the destination hop.
    pub destination_identity: String,
}

impl HopAdapters {
    /// The client that talks to `hop`. The relay client also stands in for
    /// the source hop, which the pipeline never writes to.
    pub fn client(&self, hop: Hop) -> &Arc<dyn HopAdapter> {
        match hop {
            Hop::Destination => &self.destination,
            Hop::Source | Hop::Relay => &self.relay,
        }
    }

    /// The identity responsible for actions on `hop`.
    pub fn identity_for(&self, hop: Hop) -> &str {
        match hop {
            Hop::Destination => &self.destination_identity,
            Hop::Source | Hop::Relay => &self.relay_identity,
        }
    }
}

impl std::fmt::Debug for HopAdapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HopAdapters")
            .field("relay", &self.relay.name())
            .field("destination", &self.destination.name())
            .field("relay_identity", &self.relay_identity)
            .field("destination_identity", &self.destination_identity)
            .finish()
    }
}

/// Builds hop clients for a pair acting as a given identity.
///
/// Called whenever a pipeline starts or is re-parented to another identity.
#[async_trait]
pub trait HopAdapterFactory: Send + Sync + 'static {
    async fn build(
        &self,
        pair: &ForwardingPair,
        relay_credential: &CredentialHandle,
        destination_credential: &CredentialHandle,
    ) -> Result<HopAdapters, RelayError>;
}
