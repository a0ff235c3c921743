// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory mirror of group membership and the placement rules.
//!
//! Nothing here touches the database; [`crate::WorkerGroupScheduler`]
//! persists a move first and then applies it to this state.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use hoprelay_core::{GroupLiveness, HealthState, Identity, PairId, RelayError, WorkerGroup};
use hoprelay_storage::StoredGroup;
use hoprelay_storage::queries::groups::GroupTarget;

use crate::reports::IdentityLoad;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IdentitySlot {
    pub max_pairs: u32,
    pub priority: i32,
    pub health: HealthState,
}

impl From<&Identity> for IdentitySlot {
    fn from(identity: &Identity) -> Self {
        Self {
            max_pairs: identity.max_pairs,
            priority: identity.priority,
            health: identity.health,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct SchedulerState {
    pub group_capacity: u32,
    pub identities: BTreeMap<String, IdentitySlot>,
    pub groups: BTreeMap<String, WorkerGroup>,
    /// pair -> group id
    pub membership: HashMap<PairId, String>,
    pub stranded: BTreeSet<PairId>,
}

impl SchedulerState {
    pub fn new(group_capacity: u32) -> Self {
        Self {
            group_capacity,
            ..Self::default()
        }
    }

    pub fn restore(&mut self, stored: Vec<StoredGroup>) {
        for group in stored {
            for pair in &group.members {
                self.membership.insert(*pair, group.id.clone());
            }
            self.groups.insert(
                group.id.clone(),
                WorkerGroup {
                    id: group.id,
                    identity: group.identity,
                    capacity: group.capacity,
                    liveness: group.liveness,
                    members: group.members.into_iter().collect(),
                },
            );
        }
    }

    /// Pairs currently held by `identity`'s groups.
    pub fn used(&self, identity: &str) -> u32 {
        self.groups_of(identity)
            .map(|g| g.members.len() as u32)
            .sum()
    }

    pub fn groups_of<'a>(&'a self, identity: &'a str) -> impl Iterator<Item = &'a WorkerGroup> + 'a {
        self.groups.values().filter(move |g| g.identity == identity)
    }

    pub fn members_of(&self, identity: &str) -> Vec<PairId> {
        let mut pairs: Vec<PairId> = self
            .groups_of(identity)
            .flat_map(|g| g.members.iter().copied())
            .collect();
        pairs.sort();
        pairs
    }

    pub fn group_of(&self, pair: PairId) -> Option<&WorkerGroup> {
        self.membership.get(&pair).and_then(|id| self.groups.get(id))
    }

    pub fn identity_of(&self, pair: PairId) -> Option<&str> {
        self.group_of(pair).map(|g| g.identity.as_str())
    }

    fn slot(&self, identity: &str) -> Result<IdentitySlot, RelayError> {
        self.identities
            .get(identity)
            .copied()
            .ok_or_else(|| RelayError::UnknownIdentity(identity.to_string()))
    }

    /// Where `pair` would go if assigned to `identity`.
    ///
    /// Fills the fullest group with room so that groups stay dense, and only
    /// opens a new group once every existing one is full.
    pub fn placement_for(&self, identity: &str) -> Result<GroupTarget, RelayError> {
        let slot = self.slot(identity)?;
        if slot.health.is_failed() {
            return Err(RelayError::IdentityUnhealthy {
                identity: identity.to_string(),
                state: slot.health,
            });
        }

        let used = self.used(identity);
        if used >= slot.max_pairs {
            return Err(RelayError::CapacityExhausted {
                identity: identity.to_string(),
                message: format!("{used} of {} pairs assigned", slot.max_pairs),
            });
        }

        let fullest = self
            .groups_of(identity)
            .filter(|g| g.has_room())
            .max_by(|a, b| {
                a.members
                    .len()
                    .cmp(&b.members.len())
                    .then_with(|| b.id.cmp(&a.id))
            });
        if let Some(group) = fullest {
            return Ok(GroupTarget {
                group_id: group.id.clone(),
                identity: identity.to_string(),
                capacity: group.capacity,
                liveness: group.liveness,
            });
        }

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Ok(GroupTarget {
            group_id: format!("wg-{identity}-{}", &suffix[..8]),
            identity: identity.to_string(),
            capacity: self.group_capacity.min(slot.max_pairs).max(1),
            liveness: GroupLiveness::from(slot.health),
        })
    }

    /// Best healthy identity with spare capacity: highest priority, then
    /// lowest utilization, then name.
    pub fn select_optimal(&self, excluding: Option<&str>) -> Option<String> {
        self.identities
            .iter()
            .filter(|(name, _)| Some(name.as_str()) != excluding)
            .filter(|(_, slot)| slot.health == HealthState::Healthy)
            .map(|(name, slot)| (name, slot, self.used(name)))
            .filter(|(_, slot, used)| *used < slot.max_pairs)
            .min_by(|(an, a, au), (bn, b, bu)| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| compare_utilization(*au, a.max_pairs, *bu, b.max_pairs))
                    .then_with(|| an.cmp(bn))
            })
            .map(|(name, _, _)| name.clone())
    }

    /// Apply a persisted move. Returns the group that emptied and was dropped.
    pub fn apply_move(&mut self, pair: PairId, target: &GroupTarget) -> Option<String> {
        let leaving = self
            .membership
            .get(&pair)
            .is_some_and(|old| *old != target.group_id);
        let dropped = if leaving { self.detach(pair) } else { None };
        let group = self
            .groups
            .entry(target.group_id.clone())
            .or_insert_with(|| WorkerGroup {
                id: target.group_id.clone(),
                identity: target.identity.clone(),
                capacity: target.capacity,
                liveness: target.liveness,
                members: BTreeSet::new(),
            });
        group.members.insert(pair);
        self.membership.insert(pair, target.group_id.clone());
        self.stranded.remove(&pair);
        dropped
    }

    /// Remove a pair from its group, dropping the group if it empties.
    pub fn detach(&mut self, pair: PairId) -> Option<String> {
        let group_id = self.membership.remove(&pair)?;
        let now_empty = match self.groups.get_mut(&group_id) {
            Some(group) => {
                group.members.remove(&pair);
                group.members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.groups.remove(&group_id);
            return Some(group_id);
        }
        None
    }

    pub fn set_liveness(&mut self, identity: &str, liveness: GroupLiveness) {
        for group in self.groups.values_mut().filter(|g| g.identity == identity) {
            group.liveness = liveness;
        }
    }

    pub fn loads(&self) -> Vec<IdentityLoad> {
        self.identities
            .iter()
            .map(|(name, slot)| IdentityLoad {
                name: name.clone(),
                health: slot.health,
                priority: slot.priority,
                max_pairs: slot.max_pairs,
                assigned: self.used(name),
            })
            .collect()
    }
}

/// `a_used / a_max` against `b_used / b_max` without floating point.
fn compare_utilization(a_used: u32, a_max: u32, b_used: u32, b_max: u32) -> Ordering {
    (u64::from(a_used) * u64::from(b_max)).cmp(&(u64::from(b_used) * u64::from(a_max)))
}
