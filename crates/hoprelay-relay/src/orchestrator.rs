// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-level composition of pipelines, scheduler, and health monitor.
//!
//! The orchestrator owns one [`PipelineHandle`] per running pair and keeps
//! that set in step with the scheduler: a pair that moves to another
//! identity has its pipeline rebound, a pair left stranded or disabled has
//! it stopped. Health transitions and pipeline reports are consumed by two
//! background loops, each handling its messages one at a time, so a
//! rebalance always finishes before the next one starts.

use std::sync::Arc;

use dashmap::DashMap;
use hoprelay_config::HoprelayConfig;
use hoprelay_core::{
    ForwardingPair, HealthState, HealthStatus, HopAdapterFactory, HopAdapters, IdentityProber,
    MappingStore, PairId, PairStatus, PluginAdapter, RelayError, SourceEvent,
};
use hoprelay_health::{HealthMonitor, HealthTransition, PairCheck};
use hoprelay_scheduler::{
    Assignment, BulkReport, RebalanceReport, SchedulerSnapshot, WorkerGroupScheduler,
};
use hoprelay_storage::queries::{pairs, stats};
use hoprelay_storage::{Database, NewIdentity, NewPair, SqliteMappingStore, SystemStats};
use hoprelay_vault::CredentialVault;
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pipeline::{PipelineConfig, PipelineHandle, PipelineStatus, RelayPipeline};
use crate::recording;
use crate::reports::RelayReport;

/// Everything `hoprelay status` shows.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub system: SystemStats,
    pub scheduler: SchedulerSnapshot,
    pub pipelines: Vec<PipelineStatus>,
}

impl OrchestratorStats {
    pub fn active_pipelines(&self) -> usize {
        self.pipelines.iter().filter(|p| !p.stopped).count()
    }
}

pub struct Orchestrator {
    config: HoprelayConfig,
    db: Database,
    creds: Arc<CredentialVault>,
    scheduler: Arc<WorkerGroupScheduler>,
    monitor: Arc<HealthMonitor>,
    store: Arc<dyn MappingStore>,
    factory: Arc<dyn HopAdapterFactory>,
    pipelines: DashMap<PairId, Arc<PipelineHandle>>,
    reports_tx: mpsc::UnboundedSender<RelayReport>,
    reports_rx: Mutex<Option<mpsc::UnboundedReceiver<RelayReport>>>,
    transitions_rx: Mutex<Option<mpsc::UnboundedReceiver<HealthTransition>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub async fn new(
        config: HoprelayConfig,
        db: Database,
        creds: Arc<CredentialVault>,
        prober: Arc<dyn IdentityProber>,
        factory: Arc<dyn HopAdapterFactory>,
    ) -> Result<Arc<Self>, RelayError> {
        let scheduler = Arc::new(WorkerGroupScheduler::load(db.clone(), &config.scheduler).await?);
        let (monitor, transitions_rx) =
            HealthMonitor::new(db.clone(), creds.clone(), prober, config.health.clone());
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let store: Arc<dyn MappingStore> = Arc::new(SqliteMappingStore::new(db.clone()));

        Ok(Arc::new(Self {
            config,
            db,
            creds,
            scheduler,
            monitor: Arc::new(monitor),
            store,
            factory,
            pipelines: DashMap::new(),
            reports_tx,
            reports_rx: Mutex::new(Some(reports_rx)),
            transitions_rx: Mutex::new(Some(transitions_rx)),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn scheduler(&self) -> &Arc<WorkerGroupScheduler> {
        &self.scheduler
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn store(&self) -> &Arc<dyn MappingStore> {
        &self.store
    }

    /// Recover placements, start a pipeline for every runnable pair, and
    /// spawn the health, report, and sweep loops. Cancelling `cancel` has
    /// the same effect as [`Orchestrator::shutdown`] on the loops.
    pub async fn start(self: &Arc<Self>, cancel: &CancellationToken) -> Result<(), RelayError> {
        recording::register_metrics();
        self.check_store().await?;
        self.recover().await?;

        for pair in pairs::list_pairs(&self.db).await? {
            if let Err(e) = self.sync_pipeline(pair.id).await {
                warn!(pair_id = %pair.id, pair = %pair.name, error = %e, "pipeline not started");
            }
        }

        let mut tasks = self.tasks.lock().await;
        if let Some(rx) = self.transitions_rx.lock().await.take() {
            tasks.push(tokio::spawn(self.clone().transition_loop(rx)));
        }
        if let Some(rx) = self.reports_rx.lock().await.take() {
            tasks.push(tokio::spawn(self.clone().report_loop(rx)));
        }
        tasks.push(tokio::spawn(self.monitor.clone().run(self.cancel.child_token())));
        tasks.push(tokio::spawn(self.clone().sweep_loop()));

        let outer = cancel.clone();
        let own = self.cancel.clone();
        tasks.push(tokio::spawn(async move {
            tokio::select! {
                _ = outer.cancelled() => own.cancel(),
                _ = own.cancelled() => {}
            }
        }));

        info!(
            pipelines = self.pipelines.len(),
            "orchestrator started"
        );
        Ok(())
    }

    /// Place enabled pairs that have no group, and retry stranded pairs on
    /// every healthy identity.
    async fn recover(&self) -> Result<(), RelayError> {
        for pair in pairs::list_pairs(&self.db).await? {
            if !pair.enabled || self.scheduler.group_of(pair.id).await.is_some() {
                continue;
            }
            match self.scheduler.place(pair.id, &pair.identity).await {
                Ok(assignment) => debug!(
                    pair_id = %pair.id,
                    identity = %assignment.identity,
                    "pair placed at startup"
                ),
                Err(e) => {
                    warn!(pair_id = %pair.id, pair = %pair.name, error = %e, "pair could not be placed, disabling");
                    pairs::set_status(&self.db, pair.id, PairStatus::Disabled).await?;
                }
            }
        }

        let snapshot = self.scheduler.snapshot().await;
        if !snapshot.stranded.is_empty() {
            for identity in snapshot.identities {
                if identity.health == HealthState::Healthy {
                    self.scheduler.rebalance(&identity.name).await?;
                }
            }
        }
        Ok(())
    }

    /// Route a source event to its pair's pipeline.
    pub async fn dispatch(&self, event: SourceEvent) -> Result<(), RelayError> {
        let pair_id = event.pair_id;
        let handle = self.pipelines.get(&pair_id).map(|h| h.value().clone());
        match handle {
            Some(handle) => handle.submit(event).await,
            None => match pairs::get_pair(&self.db, pair_id).await? {
                Some(_) => Err(RelayError::PairStopped { pair_id }),
                None => Err(RelayError::UnknownPair(pair_id)),
            },
        }
    }

    /// Register an identity with its secret and make it schedulable.
    pub async fn add_identity(
        &self,
        identity: NewIdentity,
        secret: &SecretString,
    ) -> Result<(), RelayError> {
        let identity = self.creds.register(identity, secret).await?;
        self.scheduler.register_identity(&identity).await;
        Ok(())
    }

    /// Remove an identity that no longer owns or posts for any pair.
    pub async fn remove_identity(&self, name: &str) -> Result<bool, RelayError> {
        self.scheduler.remove_identity(name).await?;
        match self.creds.remove(name).await {
            Ok(removed) => Ok(removed),
            Err(e) => {
                // still posting for some pair; keep it schedulable
                if let Ok(identity) = self.creds.get(name).await {
                    self.scheduler.register_identity(&identity).await;
                }
                Err(e)
            }
        }
    }

    /// Create a pair and, if enabled, assign it to its identity. A pair the
    /// identity cannot take is kept but disabled, and the error returned.
    pub async fn add_pair(&self, new: NewPair) -> Result<ForwardingPair, RelayError> {
        self.creds.get(&new.identity).await?;
        if let Some(poster) = &new.destination_identity {
            self.creds.get(poster).await?;
        }
        let pair = pairs::insert_pair(&self.db, &new).await?;
        info!(pair_id = %pair.id, pair = %pair.name, identity = %pair.identity, "pair added");
        if !pair.enabled {
            pairs::set_status(&self.db, pair.id, PairStatus::Disabled).await?;
            return self.pair(pair.id).await;
        }
        self.activate(&pair).await?;
        self.pair(pair.id).await
    }

    /// Stop the pair's pipeline, free its group slot, and delete it along
    /// with its mappings.
    pub async fn remove_pair(&self, pair: PairId) -> Result<bool, RelayError> {
        self.stop_pipeline(pair).await;
        self.scheduler.release(pair).await?;
        let removed = pairs::delete_pair(&self.db, pair).await?;
        if removed {
            info!(pair_id = %pair, "pair removed");
        }
        Ok(removed)
    }

    pub async fn enable_pair(&self, pair: PairId) -> Result<ForwardingPair, RelayError> {
        let current = self.pair(pair).await?;
        pairs::set_enabled(&self.db, pair, true).await?;
        self.activate(&current).await?;
        info!(pair_id = %pair, "pair enabled");
        self.pair(pair).await
    }

    /// Stop the pair and give its group slot back. Mappings are kept.
    pub async fn disable_pair(&self, pair: PairId) -> Result<ForwardingPair, RelayError> {
        self.pair(pair).await?;
        self.stop_pipeline(pair).await;
        self.scheduler.release(pair).await?;
        pairs::set_enabled(&self.db, pair, false).await?;
        pairs::set_status(&self.db, pair, PairStatus::Disabled).await?;
        info!(pair_id = %pair, "pair disabled");
        self.pair(pair).await
    }

    /// Move pairs to `identity`. Pairs that fit are moved even if others
    /// are rejected.
    pub async fn reassign(&self, pair_ids: &[PairId], identity: &str) -> BulkReport {
        let report = self.scheduler.bulk_reassign(pair_ids, identity).await;
        for assignment in &report.assigned {
            self.follow_assignment(assignment).await;
        }
        for (pair, err) in &report.rejected {
            warn!(pair_id = %pair, identity, error = %err, "reassignment rejected");
        }
        info!(
            identity,
            assigned = report.assigned.len(),
            rejected = report.rejected.len(),
            "bulk reassignment applied"
        );
        report
    }

    /// Probe a pair's identity and destination permission without changing
    /// any state.
    pub async fn test_pair(&self, pair: PairId) -> Result<PairCheck, RelayError> {
        let pair = self.pair(pair).await?;
        self.monitor.check_pair(&pair).await
    }

    pub async fn stats(&self) -> Result<OrchestratorStats, RelayError> {
        let mut pipelines: Vec<PipelineStatus> =
            self.pipelines.iter().map(|h| h.value().status()).collect();
        pipelines.sort_by_key(|p| p.pair);
        Ok(OrchestratorStats {
            system: stats::system_stats(&self.db).await?,
            scheduler: self.scheduler.snapshot().await,
            pipelines,
        })
    }

    /// Remove terminal mappings older than the retention horizon.
    pub async fn sweep_now(&self) -> Result<u64, RelayError> {
        let removed = self
            .store
            .sweep_retention(self.config.retention.horizon())
            .await?;
        recording::record_swept(removed);
        if removed > 0 {
            info!(removed, "retention sweep removed mappings");
        } else {
            debug!("retention sweep found nothing to remove");
        }
        Ok(removed)
    }

    /// Stop every pipeline and background loop, giving in-flight sends up to
    /// `shutdown_timeout_secs` to finish.
    pub async fn shutdown(&self) {
        info!("orchestrator shutting down");
        self.cancel.cancel();
        let timeout = self.config.relay.shutdown_timeout();

        let handles: Vec<Arc<PipelineHandle>> =
            self.pipelines.iter().map(|h| h.value().clone()).collect();
        self.pipelines.clear();
        for handle in &handles {
            handle.stop();
        }
        let clean = futures::future::join_all(handles.iter().map(|h| h.join(timeout)))
            .await
            .into_iter()
            .all(|exited| exited);
        recording::set_active_pipelines(0);
        for handle in &handles {
            release_adapters(handle.status().pair, &handle.adapters(), None).await;
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!("background task did not stop in time");
            }
        }
        if let Err(e) = self.store.shutdown().await {
            warn!(error = %e, "mapping store shutdown failed");
        }
        info!(
            pipelines = handles.len(),
            stopped_cleanly = clean,
            "orchestrator stopped"
        );
    }

    async fn pair(&self, pair: PairId) -> Result<ForwardingPair, RelayError> {
        pairs::get_pair(&self.db, pair)
            .await?
            .ok_or(RelayError::UnknownPair(pair))
    }

    /// Assign an enabled pair to its identity and start its pipeline. On
    /// failure the pair is marked disabled.
    async fn activate(&self, pair: &ForwardingPair) -> Result<(), RelayError> {
        match self.scheduler.assign(pair.id, &pair.identity).await {
            Ok(assignment) => {
                debug!(pair_id = %pair.id, group_id = %assignment.group_id, "pair assigned");
                pairs::set_status(&self.db, pair.id, PairStatus::Active).await?;
                self.sync_pipeline(pair.id).await
            }
            Err(e) => {
                warn!(pair_id = %pair.id, identity = %pair.identity, error = %e, "pair could not be assigned");
                pairs::set_status(&self.db, pair.id, PairStatus::Disabled).await?;
                Err(e)
            }
        }
    }

    /// Bring the pair's pipeline in line with its stored state: running and
    /// bound to the current identity when active, absent otherwise.
    async fn sync_pipeline(&self, pair_id: PairId) -> Result<(), RelayError> {
        let Some(pair) = pairs::get_pair(&self.db, pair_id).await? else {
            self.stop_pipeline(pair_id).await;
            return Ok(());
        };
        let runnable = pair.enabled
            && pair.status == PairStatus::Active
            && self.scheduler.group_of(pair_id).await.is_some();
        if !runnable {
            self.stop_pipeline(pair_id).await;
            return Ok(());
        }

        let existing = self.pipelines.get(&pair_id).map(|h| h.value().clone());
        if let Some(handle) = &existing {
            let status = handle.status();
            if !status.stopped
                && status.relay_identity == pair.identity
                && status.destination_identity == pair.destination_poster()
            {
                return Ok(());
            }
        }

        let adapters = match self.build_adapters(&pair).await {
            Ok(adapters) => adapters,
            Err(e) => {
                if let RelayError::Authorization { identity, message } = &e {
                    self.flag_authorization(identity, message).await;
                }
                return Err(e);
            }
        };

        match existing {
            Some(handle) if !handle.is_stopped() => {
                let previous = handle.rebind(adapters);
                release_adapters(pair_id, &previous, Some(&handle.adapters())).await;
            }
            _ => {
                let handle = RelayPipeline::spawn(
                    &pair,
                    adapters,
                    self.store.clone(),
                    PipelineConfig::from_config(&self.config),
                    self.reports_tx.clone(),
                    self.cancel.child_token(),
                );
                self.pipelines.insert(pair_id, Arc::new(handle));
                recording::set_active_pipelines(self.pipelines.len());
            }
        }
        Ok(())
    }

    async fn build_adapters(&self, pair: &ForwardingPair) -> Result<HopAdapters, RelayError> {
        let relay = self.creds.get_credential(&pair.identity).await?;
        let destination = self.creds.get_credential(pair.destination_poster()).await?;
        self.factory.build(pair, &relay, &destination).await
    }

    async fn stop_pipeline(&self, pair: PairId) {
        let Some((_, handle)) = self.pipelines.remove(&pair) else {
            return;
        };
        recording::set_active_pipelines(self.pipelines.len());
        handle.stop();
        handle.join(self.config.relay.shutdown_timeout()).await;
        release_adapters(pair, &handle.adapters(), None).await;
    }

    async fn check_store(&self) -> Result<(), RelayError> {
        let store = &self.store;
        match store.health_check().await? {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => {
                warn!(store = store.name(), %reason, "mapping store degraded");
            }
            HealthStatus::Unhealthy(reason) => {
                return Err(RelayError::Internal(format!(
                    "mapping store `{}` is unhealthy: {reason}",
                    store.name()
                )));
            }
        }
        info!(
            store = store.name(),
            kind = %store.adapter_type(),
            version = %store.version(),
            "mapping store ready"
        );
        Ok(())
    }

    async fn follow_assignment(&self, assignment: &Assignment) {
        if let Err(e) = self.sync_pipeline(assignment.pair).await {
            warn!(
                pair_id = %assignment.pair,
                identity = %assignment.identity,
                error = %e,
                "pipeline not rebound after assignment"
            );
        }
    }

    async fn apply_rebalance(&self, report: &RebalanceReport) {
        for assignment in report.moved.iter().chain(&report.recovered) {
            self.follow_assignment(assignment).await;
        }
        for &pair in &report.unplaceable {
            self.stop_pipeline(pair).await;
        }
        if !report.unplaceable.is_empty() {
            recording::record_unplaceable(report.unplaceable.len());
            warn!(
                identity = %report.identity,
                pairs = ?report.unplaceable,
                "no identity has room, pairs stranded"
            );
        }
    }

    async fn flag_authorization(&self, identity: &str, message: &str) {
        if let Err(e) = self
            .monitor
            .report_authorization_failure(identity, message)
            .await
        {
            warn!(identity, error = %e, "could not record authorization failure");
        }
    }

    async fn handle_transition(&self, transition: HealthTransition) -> Result<(), RelayError> {
        match self
            .scheduler
            .update_health(&transition.identity, transition.to)
            .await
        {
            Ok(_) => {}
            Err(RelayError::UnknownIdentity(_)) => {
                let identity = self.creds.get(&transition.identity).await?;
                self.scheduler.register_identity(&identity).await;
            }
            Err(e) => return Err(e),
        }
        let report = self.scheduler.rebalance(&transition.identity).await?;
        self.apply_rebalance(&report).await;
        Ok(())
    }

    async fn transition_loop(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<HealthTransition>,
    ) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                transition = rx.recv() => {
                    let Some(transition) = transition else { break };
                    let identity = transition.identity.clone();
                    if let Err(e) = self.handle_transition(transition).await {
                        error!(identity = %identity, error = %e, "rebalance after health change failed");
                    }
                }
            }
        }
        debug!("transition loop stopped");
    }

    async fn handle_report(&self, report: RelayReport) {
        match report {
            RelayReport::Delivered { .. } => recording::record_delivered(),
            RelayReport::Failed {
                pair,
                source_msg_id,
                kind,
                reason,
                ..
            } => {
                recording::record_failed(kind);
                warn!(pair_id = %pair, %source_msg_id, %kind, %reason, "relay operation failed");
            }
            RelayReport::AuthorizationFailed {
                pair,
                identity,
                hop,
                message,
            } => {
                recording::record_failed("authorization");
                warn!(pair_id = %pair, %identity, %hop, %message, "identity rejected by hop");
                self.flag_authorization(&identity, &message).await;
            }
            RelayReport::InvariantViolation {
                pair,
                source_msg_id,
                detail,
            } => {
                recording::record_invariant_violation();
                error!(pair_id = %pair, %source_msg_id, %detail, "relay aborted on invariant violation");
            }
        }
    }

    async fn report_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<RelayReport>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                report = rx.recv() => {
                    let Some(report) = report else { break };
                    self.handle_report(report).await;
                }
            }
        }
        debug!("report loop stopped");
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.retention.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_now().await {
                        warn!(error = %e, "retention sweep failed");
                    }
                }
            }
        }
        debug!("sweep loop stopped");
    }
}

/// Shut down the hop clients in `adapters`, skipping any that `keep` still
/// uses.
async fn release_adapters(pair: PairId, adapters: &HopAdapters, keep: Option<&HopAdapters>) {
    for client in [&adapters.relay, &adapters.destination] {
        let in_use = keep.is_some_and(|k| {
            Arc::ptr_eq(client, &k.relay) || Arc::ptr_eq(client, &k.destination)
        });
        if in_use {
            continue;
        }
        if let Err(e) = client.shutdown().await {
            warn!(
                pair_id = %pair,
                client = client.name(),
                error = %e,
                "hop client shutdown failed"
            );
        }
    }
}
