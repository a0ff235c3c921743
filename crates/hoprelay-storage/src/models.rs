// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Insert payloads and aggregate rows that only the storage layer produces.

use hoprelay_core::{IdentityKind, PairStatus};
use serde::Serialize;

/// Registration data for an identity. Health starts as `healthy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentity {
    pub name: String,
    pub kind: IdentityKind,
    pub max_pairs: u32,
    pub priority: i32,
}

/// Data for a new forwarding pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPair {
    pub name: String,
    pub source_channel: String,
    pub relay_channel: String,
    pub destination_channel: String,
    pub identity: String,
    pub destination_identity: Option<String>,
    pub enabled: bool,
}

/// Persisted worker group membership, as reloaded at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredGroup {
    pub id: String,
    pub identity: String,
    pub capacity: u32,
    pub liveness: hoprelay_core::GroupLiveness,
    pub members: Vec<hoprelay_core::PairId>,
}

/// Row counts across the database, for `hoprelay status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SystemStats {
    pub identities_by_health: Vec<(String, u64)>,
    pub pairs_by_status: Vec<(String, u64)>,
    pub disabled_pairs: u64,
    pub groups_by_liveness: Vec<(String, u64)>,
    pub mappings_by_state: Vec<(String, u64)>,
}

impl SystemStats {
    pub fn pair_count(&self, status: PairStatus) -> u64 {
        let key = status.to_string();
        self.pairs_by_status
            .iter()
            .find(|(s, _)| *s == key)
            .map_or(0, |(_, n)| *n)
    }
}
