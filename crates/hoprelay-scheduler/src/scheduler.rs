// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker group scheduler.
//!
//! Every mutation takes the state lock for its whole duration, including
//! the database write, so membership changes are applied one at a time and
//! a rebalance finishes before the next one for any identity starts.

use hoprelay_config::model::SchedulerConfig;
use hoprelay_core::{
    GroupLiveness, HealthState, Identity, PairId, PairStatus, RelayError, WorkerGroup,
};
use hoprelay_storage::Database;
use hoprelay_storage::queries::{groups, identities, pairs};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::reports::{Assignment, BulkReport, RebalanceReport, SchedulerSnapshot};
use crate::state::{IdentitySlot, SchedulerState};

pub struct WorkerGroupScheduler {
    db: Database,
    state: Mutex<SchedulerState>,
}

impl std::fmt::Debug for WorkerGroupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerGroupScheduler")
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

impl WorkerGroupScheduler {
    /// Rebuild scheduler state from storage: identities, persisted groups,
    /// and pairs that were stranded when the process last stopped.
    pub async fn load(db: Database, config: &SchedulerConfig) -> Result<Self, RelayError> {
        let mut state = SchedulerState::new(config.group_capacity);
        for identity in identities::list_identities(&db).await? {
            state
                .identities
                .insert(identity.name.clone(), IdentitySlot::from(&identity));
        }
        state.restore(groups::load_groups(&db).await?);
        for pair in pairs::list_pairs(&db).await? {
            if pair.status == PairStatus::Stranded {
                state.stranded.insert(pair.id);
            }
        }
        info!(
            identities = state.identities.len(),
            groups = state.groups.len(),
            stranded = state.stranded.len(),
            "scheduler state loaded"
        );
        Ok(Self {
            db,
            state: Mutex::new(state),
        })
    }

    /// Make an identity available for placement, or refresh its capacity,
    /// priority, and health.
    pub async fn register_identity(&self, identity: &Identity) {
        let mut state = self.state.lock().await;
        state
            .identities
            .insert(identity.name.clone(), IdentitySlot::from(identity));
    }

    /// Record a new health state. Returns the previous one.
    ///
    /// Does not move pairs; call [`Self::rebalance`] afterwards.
    pub async fn update_health(
        &self,
        identity: &str,
        health: HealthState,
    ) -> Result<HealthState, RelayError> {
        let mut state = self.state.lock().await;
        let slot = state
            .identities
            .get_mut(identity)
            .ok_or_else(|| RelayError::UnknownIdentity(identity.to_string()))?;
        let previous = slot.health;
        slot.health = health;
        Ok(previous)
    }

    /// Forget an identity. Rejected while any of its groups hold pairs.
    pub async fn remove_identity(&self, identity: &str) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        let used = state.used(identity);
        if used > 0 {
            return Err(RelayError::IdentityInUse {
                identity: identity.to_string(),
                pairs: u64::from(used),
            });
        }
        state.groups.retain(|_, g| g.identity != identity);
        state.identities.remove(identity);
        Ok(())
    }

    /// Move `pair` into a group of `identity`.
    ///
    /// The move is one storage transaction: the pair leaves its old group
    /// (dropping it if empty) and joins the new one atomically. Assigning a
    /// pair to the identity it already has only reactivates it.
    pub async fn assign(&self, pair: PairId, identity: &str) -> Result<Assignment, RelayError> {
        let mut state = self.state.lock().await;
        self.assign_locked(&mut state, pair, identity).await
    }

    /// Assign to `preferred`, falling back to the best other identity when it
    /// is full or unhealthy.
    pub async fn place(&self, pair: PairId, preferred: &str) -> Result<Assignment, RelayError> {
        let mut state = self.state.lock().await;
        match self.assign_locked(&mut state, pair, preferred).await {
            Ok(assignment) => Ok(assignment),
            Err(
                err @ (RelayError::CapacityExhausted { .. } | RelayError::IdentityUnhealthy { .. }),
            ) => {
                let Some(fallback) = state.select_optimal(Some(preferred)) else {
                    return Err(RelayError::CapacityExhausted {
                        identity: preferred.to_string(),
                        message: format!("{err}; no other identity has room"),
                    });
                };
                debug!(pair_id = %pair, preferred, fallback = %fallback, "placing on fallback identity");
                self.assign_locked(&mut state, pair, &fallback).await
            }
            Err(err) => Err(err),
        }
    }

    /// Assign each pair in order. Pairs that fit stay assigned even when
    /// later ones are rejected.
    pub async fn bulk_reassign(&self, pair_ids: &[PairId], identity: &str) -> BulkReport {
        let mut state = self.state.lock().await;
        let mut report = BulkReport::default();
        for &pair in pair_ids {
            match self.assign_locked(&mut state, pair, identity).await {
                Ok(assignment) => report.assigned.push(assignment),
                Err(err) => {
                    debug!(pair_id = %pair, identity, error = %err, "bulk reassignment rejected pair");
                    report.rejected.push((pair, err));
                }
            }
        }
        info!(
            identity,
            assigned = report.assigned.len(),
            rejected = report.rejected.len(),
            "bulk reassignment finished"
        );
        report
    }

    pub async fn select_optimal(&self, excluding: Option<&str>) -> Option<String> {
        self.state.lock().await.select_optimal(excluding)
    }

    /// Reconcile an identity's groups with its current health.
    ///
    /// A failed identity has its pairs moved elsewhere; pairs nothing can
    /// take stay in its groups marked `stranded` and are reported. A healthy
    /// identity triggers another placement attempt for every stranded pair.
    pub async fn rebalance(&self, identity: &str) -> Result<RebalanceReport, RelayError> {
        let mut state = self.state.lock().await;
        let slot = state
            .identities
            .get(identity)
            .copied()
            .ok_or_else(|| RelayError::UnknownIdentity(identity.to_string()))?;

        let liveness = GroupLiveness::from(slot.health);
        groups::set_identity_liveness(&self.db, identity, liveness).await?;
        state.set_liveness(identity, liveness);

        let mut report = RebalanceReport {
            identity: identity.to_string(),
            liveness: Some(liveness),
            ..RebalanceReport::default()
        };

        if slot.health.is_failed() {
            for pair in state.members_of(identity) {
                let Some(target) = state.select_optimal(Some(identity)) else {
                    report.unplaceable.push(pair);
                    continue;
                };
                match self.assign_locked(&mut state, pair, &target).await {
                    Ok(assignment) => report.moved.push(assignment),
                    Err(err) => {
                        warn!(pair_id = %pair, target = %target, error = %err, "rebalance move failed");
                        report.unplaceable.push(pair);
                    }
                }
            }
            if !report.unplaceable.is_empty() {
                groups::set_pairs_status(&self.db, &report.unplaceable, PairStatus::Stranded)
                    .await?;
                state.stranded.extend(report.unplaceable.iter().copied());
            }
        } else if slot.health == HealthState::Healthy {
            let stranded: Vec<PairId> = state.stranded.iter().copied().collect();
            for pair in stranded {
                let owner = state.identity_of(pair).map(str::to_string);
                let target = if owner.as_deref() == Some(identity) {
                    Some(identity.to_string())
                } else {
                    state.select_optimal(None)
                };
                let Some(target) = target else { break };
                match self.assign_locked(&mut state, pair, &target).await {
                    Ok(assignment) => report.recovered.push(assignment),
                    Err(err) => {
                        debug!(pair_id = %pair, error = %err, "stranded pair still unplaceable")
                    }
                }
            }
        }

        metrics::gauge!("hoprelay_pairs_stranded").set(state.stranded.len() as f64);
        if !report.is_noop() {
            info!(
                identity,
                liveness = %liveness,
                moved = report.moved.len(),
                unplaceable = report.unplaceable.len(),
                recovered = report.recovered.len(),
                "rebalance complete"
            );
        }
        Ok(report)
    }

    /// Take a pair out of its group, dropping the group if it empties.
    pub async fn release(&self, pair: PairId) -> Result<Option<String>, RelayError> {
        let mut state = self.state.lock().await;
        let dropped = groups::remove_membership(&self.db, pair).await?;
        state.detach(pair);
        state.stranded.remove(&pair);
        if let Some(group) = &dropped {
            debug!(pair_id = %pair, group_id = %group, "released pair emptied its group");
        }
        Ok(dropped)
    }

    pub async fn group_of(&self, pair: PairId) -> Option<WorkerGroup> {
        self.state.lock().await.group_of(pair).cloned()
    }

    pub async fn identity_of(&self, pair: PairId) -> Option<String> {
        self.state.lock().await.identity_of(pair).map(str::to_string)
    }

    pub async fn is_stranded(&self, pair: PairId) -> bool {
        self.state.lock().await.stranded.contains(&pair)
    }

    pub async fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.state.lock().await;
        SchedulerSnapshot {
            identities: state.loads(),
            groups: state.groups.values().cloned().collect(),
            stranded: state.stranded.iter().copied().collect(),
        }
    }

    async fn assign_locked(
        &self,
        state: &mut SchedulerState,
        pair: PairId,
        identity: &str,
    ) -> Result<Assignment, RelayError> {
        let previous = state.identity_of(pair).map(str::to_string);

        if previous.as_deref() == Some(identity) {
            let slot = state
                .identities
                .get(identity)
                .copied()
                .ok_or_else(|| RelayError::UnknownIdentity(identity.to_string()))?;
            if slot.health.is_failed() {
                return Err(RelayError::IdentityUnhealthy {
                    identity: identity.to_string(),
                    state: slot.health,
                });
            }
            if state.stranded.contains(&pair) {
                pairs::set_status(&self.db, pair, PairStatus::Active).await?;
                state.stranded.remove(&pair);
            }
            let group_id = state.membership.get(&pair).cloned().unwrap_or_default();
            return Ok(Assignment {
                pair,
                identity: identity.to_string(),
                group_id,
                previous_identity: previous,
            });
        }

        let target = state.placement_for(identity)?;
        let dropped = groups::move_pair(&self.db, pair, &target, PairStatus::Active).await?;
        state.apply_move(pair, &target);
        debug!(
            pair_id = %pair,
            identity,
            group_id = %target.group_id,
            from = previous.as_deref().unwrap_or("-"),
            dropped_group = dropped.as_deref().unwrap_or("-"),
            "pair assigned"
        );
        Ok(Assignment {
            pair,
            identity: identity.to_string(),
            group_id: target.group_id,
            previous_identity: previous,
        })
    }
}

#[cfg(test)]
mod tests {
    use hoprelay_core::IdentityKind;
    use hoprelay_storage::{NewIdentity, NewPair};
    use tempfile::tempdir;

    use super::*;

    struct Fixture {
        db: Database,
        _dir: tempfile::TempDir,
        next_pair: usize,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = tempdir().unwrap();
            let db = Database::open(dir.path().join("sched.db").to_str().unwrap())
                .await
                .unwrap();
            Self {
                db,
                _dir: dir,
                next_pair: 0,
            }
        }

        async fn identity(&self, name: &str, max_pairs: u32, priority: i32) {
            identities::upsert_identity(
                &self.db,
                &NewIdentity {
                    name: name.to_string(),
                    kind: IdentityKind::Session,
                    max_pairs,
                    priority,
                },
            )
            .await
            .unwrap();
        }

        async fn pairs(&mut self, identity: &str, count: usize) -> Vec<PairId> {
            let mut ids = Vec::with_capacity(count);
            for _ in 0..count {
                self.next_pair += 1;
                let pair = pairs::insert_pair(
                    &self.db,
                    &NewPair {
                        name: format!("pair-{}", self.next_pair),
                        source_channel: "src".into(),
                        relay_channel: "rly".into(),
                        destination_channel: "dst".into(),
                        identity: identity.to_string(),
                        destination_identity: None,
                        enabled: true,
                    },
                )
                .await
                .unwrap();
                ids.push(pair.id);
            }
            ids
        }

        async fn scheduler(&self, group_capacity: u32) -> WorkerGroupScheduler {
            let config = SchedulerConfig {
                group_capacity,
                ..SchedulerConfig::default()
            };
            WorkerGroupScheduler::load(self.db.clone(), &config)
                .await
                .unwrap()
        }
    }

    async fn set_health(scheduler: &WorkerGroupScheduler, identity: &str, health: HealthState) {
        scheduler.update_health(identity, health).await.unwrap();
    }

    #[tokio::test]
    async fn bulk_reassign_applies_what_fits() {
        let mut fx = Fixture::new().await;
        fx.identity("a", 25, 1).await;
        fx.identity("b", 10, 1).await;
        let on_a = fx.pairs("a", 25).await;
        let on_b = fx.pairs("b", 8).await;
        let scheduler = fx.scheduler(25).await;

        for pair in &on_a {
            scheduler.assign(*pair, "a").await.unwrap();
        }
        for pair in &on_b {
            scheduler.assign(*pair, "b").await.unwrap();
        }

        let report = scheduler.bulk_reassign(&on_a[..5], "b").await;
        assert_eq!(report.assigned.len(), 2);
        assert_eq!(report.rejected.len(), 3);
        assert!(!report.is_complete());
        assert!(report
            .rejected
            .iter()
            .all(|(_, e)| matches!(e, RelayError::CapacityExhausted { .. })));
        assert!(report.assigned.iter().all(Assignment::changed_identity));

        let snapshot = scheduler.snapshot().await;
        let load = |name: &str| {
            snapshot
                .identities
                .iter()
                .find(|l| l.name == name)
                .unwrap()
                .assigned
        };
        assert_eq!(load("a"), 23);
        assert_eq!(load("b"), 10);
        for group in &snapshot.groups {
            assert!(group.members.len() as u32 <= group.capacity);
        }

        let moved = pairs::get_pair(&fx.db, on_a[0]).await.unwrap().unwrap();
        assert_eq!(moved.identity, "b");
        let kept = pairs::get_pair(&fx.db, on_a[2]).await.unwrap().unwrap();
        assert_eq!(kept.identity, "a");
    }

    #[tokio::test]
    async fn failed_identity_is_drained_and_leftovers_stranded() {
        let mut fx = Fixture::new().await;
        fx.identity("a", 5, 1).await;
        fx.identity("b", 3, 1).await;
        let on_a = fx.pairs("a", 4).await;
        let scheduler = fx.scheduler(25).await;
        for pair in &on_a {
            scheduler.assign(*pair, "a").await.unwrap();
        }

        set_health(&scheduler, "a", HealthState::Unreachable).await;
        let report = scheduler.rebalance("a").await.unwrap();
        assert_eq!(report.liveness, Some(GroupLiveness::Stopped));
        assert_eq!(report.moved.len(), 3);
        assert_eq!(report.unplaceable, vec![on_a[3]]);
        assert!(report.moved.iter().all(|m| m.identity == "b"));

        // every pair is still tracked somewhere
        for pair in &on_a {
            assert!(scheduler.group_of(*pair).await.is_some());
        }
        assert!(scheduler.is_stranded(on_a[3]).await);
        let stranded = pairs::get_pair(&fx.db, on_a[3]).await.unwrap().unwrap();
        assert_eq!(stranded.status, PairStatus::Stranded);
        assert_eq!(stranded.identity, "a");

        set_health(&scheduler, "a", HealthState::Healthy).await;
        let report = scheduler.rebalance("a").await.unwrap();
        assert_eq!(report.liveness, Some(GroupLiveness::Running));
        assert_eq!(report.recovered.len(), 1);
        assert_eq!(report.recovered[0].identity, "a");
        assert!(scheduler.snapshot().await.stranded.is_empty());
        let recovered = pairs::get_pair(&fx.db, on_a[3]).await.unwrap().unwrap();
        assert_eq!(recovered.status, PairStatus::Active);
    }

    #[tokio::test]
    async fn stranded_pair_moves_when_another_identity_recovers() {
        let mut fx = Fixture::new().await;
        fx.identity("a", 2, 1).await;
        fx.identity("b", 2, 1).await;
        let on_a = fx.pairs("a", 1).await;
        let scheduler = fx.scheduler(25).await;
        scheduler.assign(on_a[0], "a").await.unwrap();

        set_health(&scheduler, "b", HealthState::Unauthorized).await;
        scheduler.rebalance("b").await.unwrap();
        set_health(&scheduler, "a", HealthState::Unauthorized).await;
        let report = scheduler.rebalance("a").await.unwrap();
        assert_eq!(report.unplaceable, on_a);

        set_health(&scheduler, "b", HealthState::Healthy).await;
        let report = scheduler.rebalance("b").await.unwrap();
        assert_eq!(report.recovered.len(), 1);
        assert_eq!(report.recovered[0].identity, "b");
        assert_eq!(scheduler.identity_of(on_a[0]).await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn degraded_identity_keeps_its_pairs() {
        let mut fx = Fixture::new().await;
        fx.identity("a", 5, 1).await;
        fx.identity("b", 5, 1).await;
        let on_a = fx.pairs("a", 2).await;
        let scheduler = fx.scheduler(25).await;
        for pair in &on_a {
            scheduler.assign(*pair, "a").await.unwrap();
        }
        set_health(&scheduler, "a", HealthState::Degraded).await;
        let report = scheduler.rebalance("a").await.unwrap();
        assert!(report.is_noop());
        assert_eq!(report.liveness, Some(GroupLiveness::Degraded));
        let group = scheduler.group_of(on_a[0]).await.unwrap();
        assert_eq!(group.liveness, GroupLiveness::Degraded);
        assert_eq!(group.identity, "a");
    }

    #[tokio::test]
    async fn assignment_checks_health_and_is_idempotent() {
        let mut fx = Fixture::new().await;
        fx.identity("a", 5, 1).await;
        fx.identity("revoked", 5, 1).await;
        let on_a = fx.pairs("a", 1).await;
        let scheduler = fx.scheduler(25).await;

        let first = scheduler.assign(on_a[0], "a").await.unwrap();
        assert_eq!(first.previous_identity, None);
        let again = scheduler.assign(on_a[0], "a").await.unwrap();
        assert_eq!(again.group_id, first.group_id);
        assert!(!again.changed_identity());
        assert_eq!(scheduler.snapshot().await.groups.len(), 1);

        set_health(&scheduler, "revoked", HealthState::Unauthorized).await;
        let err = scheduler.assign(on_a[0], "revoked").await.unwrap_err();
        assert!(matches!(err, RelayError::IdentityUnhealthy { .. }));
        assert!(matches!(
            scheduler.assign(on_a[0], "ghost").await,
            Err(RelayError::UnknownIdentity(_))
        ));
        assert!(matches!(
            scheduler.assign(PairId(999), "a").await,
            Err(RelayError::UnknownPair(_))
        ));
    }

    #[tokio::test]
    async fn place_falls_back_to_best_identity() {
        let mut fx = Fixture::new().await;
        fx.identity("small", 1, 9).await;
        fx.identity("other", 5, 1).await;
        let ids = fx.pairs("small", 2).await;
        let scheduler = fx.scheduler(25).await;

        assert_eq!(scheduler.place(ids[0], "small").await.unwrap().identity, "small");
        assert_eq!(scheduler.place(ids[1], "small").await.unwrap().identity, "other");
    }

    #[tokio::test]
    async fn state_survives_reload_and_release_drops_groups() {
        let mut fx = Fixture::new().await;
        fx.identity("a", 10, 1).await;
        let ids = fx.pairs("a", 3).await;
        let scheduler = fx.scheduler(2).await;
        for pair in &ids {
            scheduler.assign(*pair, "a").await.unwrap();
        }
        let before = scheduler.snapshot().await;
        assert_eq!(before.groups.len(), 2);

        let reloaded = fx.scheduler(2).await;
        assert_eq!(reloaded.snapshot().await, before);

        let lone = reloaded.group_of(ids[2]).await.unwrap();
        let dropped = reloaded.release(ids[2]).await.unwrap();
        assert_eq!(dropped, Some(lone.id));
        assert!(reloaded.group_of(ids[2]).await.is_none());
        assert_eq!(groups::load_groups(&fx.db).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn identity_removal_requires_empty_groups() {
        let mut fx = Fixture::new().await;
        fx.identity("a", 10, 1).await;
        let ids = fx.pairs("a", 1).await;
        let scheduler = fx.scheduler(25).await;
        scheduler.assign(ids[0], "a").await.unwrap();

        assert!(matches!(
            scheduler.remove_identity("a").await,
            Err(RelayError::IdentityInUse { pairs: 1, .. })
        ));
        scheduler.release(ids[0]).await.unwrap();
        scheduler.remove_identity("a").await.unwrap();
        assert_eq!(scheduler.select_optimal(None).await, None);
    }

    mod capacity {
        use proptest::prelude::*;
        use std::collections::HashSet;

        use super::*;

        #[derive(Debug, Clone)]
        enum Op {
            Assign { pair: usize, identity: usize },
            Release { pair: usize },
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                4 => (0..10usize, 0..3usize).prop_map(|(pair, identity)| Op::Assign { pair, identity }),
                1 => (0..10usize).prop_map(|pair| Op::Release { pair }),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(24))]

            #[test]
            fn groups_never_exceed_capacity(
                group_capacity in 1u32..5,
                caps in proptest::collection::vec(1u32..8, 3),
                ops in proptest::collection::vec(op(), 1..40),
            ) {
                let rt = tokio::runtime::Runtime::new().unwrap();
                rt.block_on(async {
                    let mut fx = Fixture::new().await;
                    let names = ["i0", "i1", "i2"];
                    for (name, cap) in names.iter().zip(&caps) {
                        fx.identity(name, *cap, 1).await;
                    }
                    let ids = fx.pairs("i0", 10).await;
                    let scheduler = fx.scheduler(group_capacity).await;

                    for op in ops {
                        match op {
                            Op::Assign { pair, identity } => {
                                let _ = scheduler.assign(ids[pair], names[identity]).await;
                            }
                            Op::Release { pair } => {
                                scheduler.release(ids[pair]).await.unwrap();
                            }
                        }

                        let snapshot = scheduler.snapshot().await;
                        let mut seen = HashSet::new();
                        for group in &snapshot.groups {
                            prop_assert!(!group.members.is_empty());
                            prop_assert!(group.members.len() as u32 <= group.capacity);
                            for member in &group.members {
                                prop_assert!(seen.insert(*member), "pair {} in two groups", member);
                            }
                        }
                        for load in &snapshot.identities {
                            prop_assert!(load.assigned <= load.max_pairs);
                        }
                    }
                    Ok(())
                })?;
            }
        }
    }
}
