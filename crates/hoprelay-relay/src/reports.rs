// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outcomes pipelines report to the orchestrator.

use hoprelay_core::{EventKind, Hop, MappingId, PairId};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RelayReport {
    /// A new message reached the destination hop.
    Delivered {
        pair: PairId,
        mapping: MappingId,
        source_msg_id: String,
    },
    /// A hop call gave up. For new messages the mapping is left `failed`
    /// and resumes if the source delivers the event again.
    Failed {
        pair: PairId,
        source_msg_id: String,
        kind: EventKind,
        hop: Option<Hop>,
        reason: String,
    },
    /// A hop rejected the identity acting on it.
    AuthorizationFailed {
        pair: PairId,
        identity: String,
        hop: Hop,
        message: String,
    },
    /// A mapping transition was refused; the operation was aborted.
    InvariantViolation {
        pair: PairId,
        source_msg_id: String,
        detail: String,
    },
}

impl RelayReport {
    pub fn pair(&self) -> PairId {
        match self {
            Self::Delivered { pair, .. }
            | Self::Failed { pair, .. }
            | Self::AuthorizationFailed { pair, .. }
            | Self::InvariantViolation { pair, .. } => *pair,
        }
    }
}
