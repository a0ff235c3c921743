// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity probing used by the health monitor.

use async_trait::async_trait;

use crate::traits::adapter::PluginAdapter;
use crate::types::{CredentialHandle, ForwardingPair, Identity, ProbeOutcome};

/// Cheap connectivity and permission checks against the platforms.
///
/// Probes report outcomes rather than errors: a probe that cannot reach the
/// platform is a `ProbeOutcome::Failed`, not a failure of the monitor.
#[async_trait]
pub trait IdentityProber: PluginAdapter {
    /// Verify that the identity can still authenticate.
    async fn probe_identity(
        &self,
        identity: &Identity,
        credential: &CredentialHandle,
    ) -> ProbeOutcome;

    /// Verify that the identity may post into the pair's destination channel.
    async fn probe_destination(
        &self,
        identity: &Identity,
        credential: &CredentialHandle,
        pair: &ForwardingPair,
    ) -> ProbeOutcome;
}
