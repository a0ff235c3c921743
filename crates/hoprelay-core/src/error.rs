// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the hoprelay workspace.

use std::time::Duration;

use thiserror::Error;

use crate::types::{HealthState, Hop, PairId};

/// The error type shared by every hoprelay crate.
///
/// The hop-facing variants (`TransientHop`, `NotFound`, `Authorization`)
/// are what adapters return; the pipeline decides retry behavior from them.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration errors (invalid TOML, bad values, unknown references).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, migrations).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Credential vault errors (locked vault, bad passphrase, corrupted entry).
    #[error("vault error: {0}")]
    Vault(String),

    /// Network or rate-limit failure on a hop. Retried with backoff.
    #[error("transient failure on {hop} hop: {message}")]
    TransientHop { hop: Hop, message: String },

    /// The remote message or channel no longer exists. Never retried.
    #[error("{what} not found on {hop} hop")]
    NotFound { hop: Hop, what: String },

    /// The identity lacks permission on a hop. Never retried by the pipeline.
    #[error("identity `{identity}` is not authorized: {message}")]
    Authorization { identity: String, message: String },

    /// The scheduler could not place a pair.
    #[error("capacity exhausted for `{identity}`: {message}")]
    CapacityExhausted { identity: String, message: String },

    /// The target identity is in a state that refuses new pairs.
    #[error("identity `{identity}` is {state}")]
    IdentityUnhealthy { identity: String, state: HealthState },

    /// Out-of-order mapping transition or corrupted mapping data.
    #[error("mapping invariant violated: {0}")]
    InvariantViolation(String),

    /// The identity still owns or posts for pairs and cannot be removed.
    #[error("identity `{identity}` is still bound to {pairs} pair(s)")]
    IdentityInUse { identity: String, pairs: u64 },

    /// No forwarding pair with this id.
    #[error("unknown pair {0}")]
    UnknownPair(PairId),

    /// No identity with this name.
    #[error("unknown identity `{0}`")]
    UnknownIdentity(String),

    /// The pair's pipeline has been stopped and accepts no more events.
    #[error("pair {pair_id} is stopped")]
    PairStopped { pair_id: PairId },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Whether the pipeline should retry the operation that produced this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientHop { .. } | Self::Timeout { .. })
    }

    /// Whether the remote side reported the target as gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error means the acting identity lost its permission.
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }
}
