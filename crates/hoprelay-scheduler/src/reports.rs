// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Results returned by scheduler mutations.

use hoprelay_core::{GroupLiveness, HealthState, PairId, RelayError, WorkerGroup};
use serde::Serialize;

/// A pair that now lives in `group_id` under `identity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub pair: PairId,
    pub identity: String,
    pub group_id: String,
    /// Identity that owned the pair before, if it changed.
    pub previous_identity: Option<String>,
}

impl Assignment {
    /// Whether the pair changed identity, so its pipeline must be rebound.
    pub fn changed_identity(&self) -> bool {
        self.previous_identity
            .as_deref()
            .is_some_and(|prev| prev != self.identity)
    }
}

/// Outcome of `bulk_reassign`. Successes are kept even when later pairs fail.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub assigned: Vec<Assignment>,
    pub rejected: Vec<(PairId, RelayError)>,
}

impl BulkReport {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Outcome of `rebalance` for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RebalanceReport {
    pub identity: String,
    pub liveness: Option<GroupLiveness>,
    /// Pairs moved off a failed identity.
    pub moved: Vec<Assignment>,
    /// Pairs left on a failed identity because nothing had room.
    pub unplaceable: Vec<PairId>,
    /// Previously stranded pairs that are running again.
    pub recovered: Vec<Assignment>,
}

impl RebalanceReport {
    pub fn is_noop(&self) -> bool {
        self.moved.is_empty() && self.unplaceable.is_empty() && self.recovered.is_empty()
    }
}

/// Load of one identity as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityLoad {
    pub name: String,
    pub health: HealthState,
    pub priority: i32,
    pub max_pairs: u32,
    pub assigned: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    pub identities: Vec<IdentityLoad>,
    pub groups: Vec<WorkerGroup>,
    pub stranded: Vec<PairId>,
}
