// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-pair relay pipeline.
//!
//! Each pair gets one task that handles its source events strictly in
//! arrival order. A new message is relayed, then delivered, with each hop
//! call retried on transient failures. Edits and deletes are applied to
//! both hops using the ids stored in the mapping row.
//!
//! An edit or delete for a message whose initial relay has not settled is
//! held back and replayed once the relay succeeds or gives up. If it gave
//! up, the held event is dropped with a warning.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hoprelay_config::HoprelayConfig;
use hoprelay_core::{
    EventKind, ForwardingPair, Hop, HopAdapters, HopMessageId, HopOutcome, MappingState,
    MappingStore, MessageMapping, PairId, RelayError, SourceEvent,
};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::reports::RelayReport;
use crate::retry::{RetryPolicy, run_with_retry};

/// Pipeline tuning taken from `[relay]` and `[retry]`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub retry: RetryPolicy,
    pub hop_timeout: Duration,
    pub max_deferred: usize,
    pub deferred_ttl: Duration,
    pub event_buffer: usize,
}

impl PipelineConfig {
    pub fn from_config(config: &HoprelayConfig) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config.retry),
            hop_timeout: config.relay.hop_timeout(),
            max_deferred: config.relay.max_deferred_events,
            deferred_ttl: config.relay.deferred_ttl(),
            event_buffer: config.relay.event_buffer.max(1),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    deferred: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    pub pair: PairId,
    pub relay_identity: String,
    pub destination_identity: String,
    /// Events fully handled, including dropped ones.
    pub processed: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
    /// Edits and deletes waiting for their message to settle.
    pub deferred: u64,
    pub stopped: bool,
}

/// Handle to a running pipeline. Dropping it does not stop the task; call
/// [`PipelineHandle::stop`].
pub struct PipelineHandle {
    pair: PairId,
    events: mpsc::Sender<SourceEvent>,
    adapters: watch::Sender<HopAdapters>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineHandle {
    pub fn pair(&self) -> PairId {
        self.pair
    }

    /// Queue a source event. Waits while the pair's queue is full.
    pub async fn submit(&self, event: SourceEvent) -> Result<(), RelayError> {
        if self.cancel.is_cancelled() {
            return Err(RelayError::PairStopped { pair_id: self.pair });
        }
        self.events
            .send(event)
            .await
            .map_err(|_| RelayError::PairStopped { pair_id: self.pair })
    }

    /// Switch the hop clients, typically after the pair moved to another
    /// identity. Takes effect from the next event; mapping state is kept.
    pub fn rebind(&self, adapters: HopAdapters) -> HopAdapters {
        info!(
            pair_id = %self.pair,
            relay_identity = %adapters.relay_identity,
            destination_identity = %adapters.destination_identity,
            "pipeline rebound"
        );
        self.adapters.send_replace(adapters)
    }

    /// The hop clients the pipeline is currently using.
    pub fn adapters(&self) -> HopAdapters {
        self.adapters.borrow().clone()
    }

    /// Identity currently acting on the relay hop.
    pub fn identity(&self) -> String {
        self.adapters.borrow().relay_identity.clone()
    }

    /// Stop accepting events. An event being handled runs to completion,
    /// but backoff sleeps end early.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the task to exit, aborting it after `timeout`. Returns
    /// whether it exited on its own.
    pub async fn join(&self, timeout: Duration) -> bool {
        let Some(mut task) = self.task.lock().await.take() else {
            return true;
        };
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(pair_id = %self.pair, error = %e, "pipeline task panicked");
                true
            }
            Err(_) => {
                warn!(pair_id = %self.pair, ?timeout, "pipeline did not stop in time, aborting");
                task.abort();
                false
            }
        }
    }

    pub fn status(&self) -> PipelineStatus {
        let adapters = self.adapters.borrow();
        PipelineStatus {
            pair: self.pair,
            relay_identity: adapters.relay_identity.clone(),
            destination_identity: adapters.destination_identity.clone(),
            processed: self.counters.processed.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            deferred: self.counters.deferred.load(Ordering::Relaxed),
            stopped: self.cancel.is_cancelled(),
        }
    }
}

/// The event loop of one pair.
pub struct RelayPipeline {
    pair: PairId,
    name: String,
    adapters: watch::Receiver<HopAdapters>,
    store: Arc<dyn MappingStore>,
    config: PipelineConfig,
    reports: mpsc::UnboundedSender<RelayReport>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    /// Follow-ups waiting for their message, oldest first.
    deferred: VecDeque<Deferred>,
}

struct Deferred {
    event: SourceEvent,
    since: Instant,
}

impl RelayPipeline {
    /// Start the pipeline task for `pair`. It stops when `cancel` fires or
    /// [`PipelineHandle::stop`] is called.
    pub fn spawn(
        pair: &ForwardingPair,
        adapters: HopAdapters,
        store: Arc<dyn MappingStore>,
        config: PipelineConfig,
        reports: mpsc::UnboundedSender<RelayReport>,
        cancel: CancellationToken,
    ) -> PipelineHandle {
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
        let (adapters_tx, adapters_rx) = watch::channel(adapters);
        let counters = Arc::new(Counters::default());

        let pipeline = Self {
            pair: pair.id,
            name: pair.name.clone(),
            adapters: adapters_rx,
            store,
            config,
            reports,
            cancel: cancel.clone(),
            counters: counters.clone(),
            deferred: VecDeque::new(),
        };
        let task = tokio::spawn(pipeline.run(events_rx));

        PipelineHandle {
            pair: pair.id,
            events: events_tx,
            adapters: adapters_tx,
            cancel,
            counters,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run(mut self, mut events: mpsc::Receiver<SourceEvent>) {
        info!(pair_id = %self.pair, pair = %self.name, "pipeline started");
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.process(event).await,
                    None => break,
                },
            }
        }

        events.close();
        let mut unprocessed = 0usize;
        while events.try_recv().is_ok() {
            unprocessed += 1;
        }
        if unprocessed > 0 || !self.deferred.is_empty() {
            warn!(
                pair_id = %self.pair,
                unprocessed,
                deferred = self.deferred.len(),
                "pipeline stopped with events left"
            );
        }
        info!(pair_id = %self.pair, "pipeline stopped");
    }

    async fn process(&mut self, event: SourceEvent) {
        self.expire_deferred();
        let source_msg_id = event.source_msg_id.clone();
        let kind = event.kind;
        if event.pair_id != self.pair {
            error!(
                pair_id = %self.pair,
                event_pair = %event.pair_id,
                %source_msg_id,
                "event routed to the wrong pipeline"
            );
            Counters::bump(&self.counters.dropped);
        } else {
            let result = match kind {
                EventKind::New => self.relay_new(&event).await,
                EventKind::Edit | EventKind::Delete => self.follow_up(event, false).await,
            };
            if let Err(err) = result {
                self.operation_failed(&source_msg_id, kind, err);
            }
            if kind == EventKind::New {
                self.replay_deferred(&source_msg_id).await;
            }
        }
        Counters::bump(&self.counters.processed);
    }

    async fn relay_new(&self, event: &SourceEvent) -> Result<(), RelayError> {
        let reply = match event.reply_to_source_msg_id.as_deref() {
            Some(parent) => {
                let target = self.store.resolve_reply_target(self.pair, parent).await?;
                if target.is_none() {
                    debug!(
                        pair_id = %self.pair,
                        source_msg_id = %event.source_msg_id,
                        parent,
                        "reply parent was never delivered, sending without a reply link"
                    );
                }
                target
            }
            None => None,
        };

        let upsert = self
            .store
            .upsert_on_new(
                self.pair,
                &event.source_msg_id,
                reply.as_ref().map(|t| t.parent),
            )
            .await?;
        let mapping = upsert.mapping;
        if !upsert.inserted {
            if mapping.state.is_delivered() || mapping.state == MappingState::Deleted {
                debug!(
                    pair_id = %self.pair,
                    mapping_id = %mapping.id,
                    state = %mapping.state,
                    "duplicate new message dropped"
                );
                return Ok(());
            }
            debug!(
                pair_id = %self.pair,
                mapping_id = %mapping.id,
                state = %mapping.state,
                "resuming unfinished mapping"
            );
        }

        let adapters = self.adapters.borrow().clone();
        let content = event.rendered_content.as_str();

        let relay_id = match mapping.relay_msg_id.clone() {
            Some(id) => id,
            None => {
                let reply_to = reply.as_ref().map(|t| &t.relay_msg_id);
                match self.send(&adapters, Hop::Relay, content, reply_to).await {
                    Ok(id) => {
                        self.store.record_relay_sent(mapping.id, &id).await?;
                        id
                    }
                    Err(err) => {
                        return self
                            .initial_relay_failed(&adapters, &mapping, Hop::Relay, err)
                            .await;
                    }
                }
            }
        };

        let reply_to = reply.as_ref().and_then(|t| t.destination_msg_id.as_ref());
        let destination_id = match self
            .send(&adapters, Hop::Destination, content, reply_to)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                return self
                    .initial_relay_failed(&adapters, &mapping, Hop::Destination, err)
                    .await;
            }
        };
        self.store
            .record_destination_sent(mapping.id, &destination_id)
            .await?;

        Counters::bump(&self.counters.delivered);
        debug!(
            pair_id = %self.pair,
            mapping_id = %mapping.id,
            relay_msg_id = %relay_id,
            destination_msg_id = %destination_id,
            "message delivered"
        );
        self.report(RelayReport::Delivered {
            pair: self.pair,
            mapping: mapping.id,
            source_msg_id: mapping.source_msg_id,
        });
        Ok(())
    }

    async fn initial_relay_failed(
        &self,
        adapters: &HopAdapters,
        mapping: &MessageMapping,
        hop: Hop,
        err: RelayError,
    ) -> Result<(), RelayError> {
        let reason = err.to_string();
        self.store.mark_failed(mapping.id, &reason).await?;
        Counters::bump(&self.counters.failed);
        warn!(
            pair_id = %self.pair,
            mapping_id = %mapping.id,
            %hop,
            error = %reason,
            "initial relay failed"
        );
        let report = if err.is_authorization() {
            RelayReport::AuthorizationFailed {
                pair: self.pair,
                identity: adapters.identity_for(hop).to_string(),
                hop,
                message: reason,
            }
        } else {
            RelayReport::Failed {
                pair: self.pair,
                source_msg_id: mapping.source_msg_id.clone(),
                kind: EventKind::New,
                hop: Some(hop),
                reason,
            }
        };
        self.report(report);
        Ok(())
    }

    /// Handle an edit or delete. `replaying` is set when the event was
    /// deferred and its message has since settled.
    async fn follow_up(&mut self, event: SourceEvent, replaying: bool) -> Result<(), RelayError> {
        let Some(mapping) = self
            .store
            .find_by_source(self.pair, &event.source_msg_id)
            .await?
        else {
            self.defer_or_drop(event, replaying);
            return Ok(());
        };

        match mapping.state {
            MappingState::Pending | MappingState::Relayed => {
                self.defer_or_drop(event, replaying);
                Ok(())
            }
            MappingState::Failed => {
                warn!(
                    pair_id = %self.pair,
                    mapping_id = %mapping.id,
                    kind = %event.kind,
                    "message was never delivered, dropping follow-up"
                );
                Counters::bump(&self.counters.dropped);
                Ok(())
            }
            MappingState::Deleted => {
                if event.kind == EventKind::Delete {
                    self.store.mark_deleted(mapping.id).await?;
                }
                debug!(
                    pair_id = %self.pair,
                    mapping_id = %mapping.id,
                    kind = %event.kind,
                    "message already deleted"
                );
                Ok(())
            }
            MappingState::Delivered | MappingState::Edited => match event.kind {
                EventKind::Edit => self.edit(&mapping, &event.rendered_content).await,
                EventKind::Delete => self.delete(&mapping).await,
                EventKind::New => Ok(()),
            },
        }
    }

    fn defer_or_drop(&mut self, event: SourceEvent, replaying: bool) {
        if replaying {
            warn!(
                pair_id = %self.pair,
                source_msg_id = %event.source_msg_id,
                kind = %event.kind,
                "initial relay did not deliver, dropping deferred event"
            );
            Counters::bump(&self.counters.dropped);
            return;
        }
        if self.config.max_deferred == 0 {
            warn!(
                pair_id = %self.pair,
                source_msg_id = %event.source_msg_id,
                kind = %event.kind,
                "deferral disabled, dropping event"
            );
            Counters::bump(&self.counters.dropped);
            return;
        }
        if self.deferred.len() >= self.config.max_deferred
            && let Some(oldest) = self.deferred.pop_front()
        {
            warn!(
                pair_id = %self.pair,
                source_msg_id = %oldest.event.source_msg_id,
                kind = %oldest.event.kind,
                limit = self.config.max_deferred,
                "deferred queue full, evicting oldest event"
            );
            Counters::bump(&self.counters.dropped);
        }
        debug!(
            pair_id = %self.pair,
            source_msg_id = %event.source_msg_id,
            kind = %event.kind,
            "message not delivered yet, deferring"
        );
        self.deferred.push_back(Deferred {
            event,
            since: Instant::now(),
        });
        self.sync_deferred_count();
    }

    /// Drop deferred follow-ups whose message has not shown up within
    /// `deferred_ttl`.
    fn expire_deferred(&mut self) {
        let ttl = self.config.deferred_ttl;
        let mut expired = 0usize;
        while let Some(front) = self.deferred.front()
            && front.since.elapsed() >= ttl
        {
            if let Some(stale) = self.deferred.pop_front() {
                debug!(
                    pair_id = %self.pair,
                    source_msg_id = %stale.event.source_msg_id,
                    kind = %stale.event.kind,
                    "deferred event expired"
                );
                expired += 1;
            }
        }
        if expired > 0 {
            warn!(pair_id = %self.pair, expired, "dropping expired deferred events");
            self.counters
                .dropped
                .fetch_add(expired as u64, Ordering::Relaxed);
            self.sync_deferred_count();
        }
    }

    fn sync_deferred_count(&self) {
        self.counters
            .deferred
            .store(self.deferred.len() as u64, Ordering::Relaxed);
    }

    async fn replay_deferred(&mut self, source_msg_id: &str) {
        let (ready, waiting): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|d| d.event.source_msg_id == source_msg_id);
        self.deferred = waiting;
        if ready.is_empty() {
            return;
        }
        self.sync_deferred_count();
        debug!(
            pair_id = %self.pair,
            source_msg_id,
            count = ready.len(),
            "replaying deferred events"
        );
        for Deferred { event, .. } in ready {
            let kind = event.kind;
            if let Err(err) = self.follow_up(event, true).await {
                self.operation_failed(source_msg_id, kind, err);
            }
        }
    }

    async fn edit(&self, mapping: &MessageMapping, content: &str) -> Result<(), RelayError> {
        let adapters = self.adapters.borrow().clone();
        let mut gone = Vec::new();

        for hop in [Hop::Relay, Hop::Destination] {
            let id = hop_id(mapping, hop)?;
            let client = adapters.client(hop);
            let result = run_with_retry(
                &self.config.retry,
                self.config.hop_timeout,
                &self.cancel,
                hop,
                move || client.edit(id, content),
            )
            .await;
            match result {
                Ok(HopOutcome::Applied) => {}
                Ok(HopOutcome::NotFound) => gone.push(hop),
                Err(err) if err.is_not_found() => gone.push(hop),
                Err(err) => {
                    self.follow_up_failed(&adapters, mapping, hop, EventKind::Edit, err);
                    return Ok(());
                }
            }
        }

        if !gone.is_empty() {
            warn!(
                pair_id = %self.pair,
                mapping_id = %mapping.id,
                hops = ?gone,
                "edited message no longer exists on hop, mapping left unchanged"
            );
            return Ok(());
        }
        self.store.mark_edited(mapping.id).await?;
        debug!(pair_id = %self.pair, mapping_id = %mapping.id, "edit synchronized");
        Ok(())
    }

    /// Delete from the destination first, then the relay. The mapping is
    /// marked deleted whatever the hops answered.
    async fn delete(&self, mapping: &MessageMapping) -> Result<(), RelayError> {
        let adapters = self.adapters.borrow().clone();

        for hop in [Hop::Destination, Hop::Relay] {
            let id = hop_id(mapping, hop)?;
            let client = adapters.client(hop);
            let result = run_with_retry(
                &self.config.retry,
                self.config.hop_timeout,
                &self.cancel,
                hop,
                move || client.delete(id),
            )
            .await;
            match result {
                Ok(HopOutcome::Applied) => {}
                Ok(HopOutcome::NotFound) => {
                    debug!(pair_id = %self.pair, mapping_id = %mapping.id, %hop, "already gone");
                }
                Err(err) if err.is_not_found() => {
                    debug!(pair_id = %self.pair, mapping_id = %mapping.id, %hop, "already gone");
                }
                Err(err) => {
                    self.follow_up_failed(&adapters, mapping, hop, EventKind::Delete, err);
                }
            }
        }

        self.store.mark_deleted(mapping.id).await?;
        debug!(pair_id = %self.pair, mapping_id = %mapping.id, "delete synchronized");
        Ok(())
    }

    fn follow_up_failed(
        &self,
        adapters: &HopAdapters,
        mapping: &MessageMapping,
        hop: Hop,
        kind: EventKind,
        err: RelayError,
    ) {
        Counters::bump(&self.counters.failed);
        warn!(
            pair_id = %self.pair,
            mapping_id = %mapping.id,
            %hop,
            %kind,
            error = %err,
            "hop call failed"
        );
        let report = if err.is_authorization() {
            RelayReport::AuthorizationFailed {
                pair: self.pair,
                identity: adapters.identity_for(hop).to_string(),
                hop,
                message: err.to_string(),
            }
        } else {
            RelayReport::Failed {
                pair: self.pair,
                source_msg_id: mapping.source_msg_id.clone(),
                kind,
                hop: Some(hop),
                reason: err.to_string(),
            }
        };
        self.report(report);
    }

    fn operation_failed(&self, source_msg_id: &str, kind: EventKind, err: RelayError) {
        Counters::bump(&self.counters.failed);
        if let RelayError::InvariantViolation(detail) = err {
            error!(
                pair_id = %self.pair,
                source_msg_id,
                %kind,
                %detail,
                "mapping invariant violated, operation aborted"
            );
            self.report(RelayReport::InvariantViolation {
                pair: self.pair,
                source_msg_id: source_msg_id.to_string(),
                detail,
            });
            return;
        }
        error!(
            pair_id = %self.pair,
            source_msg_id,
            %kind,
            error = %err,
            "event processing failed"
        );
        self.report(RelayReport::Failed {
            pair: self.pair,
            source_msg_id: source_msg_id.to_string(),
            kind,
            hop: None,
            reason: err.to_string(),
        });
    }

    async fn send(
        &self,
        adapters: &HopAdapters,
        hop: Hop,
        content: &str,
        reply_to: Option<&HopMessageId>,
    ) -> Result<HopMessageId, RelayError> {
        let client = adapters.client(hop);
        run_with_retry(
            &self.config.retry,
            self.config.hop_timeout,
            &self.cancel,
            hop,
            move || client.send(content, reply_to),
        )
        .await
    }

    fn report(&self, report: RelayReport) {
        if self.reports.send(report).is_err() {
            debug!(pair_id = %self.pair, "no report subscriber");
        }
    }
}

/// Id of a delivered mapping's message on `hop`.
fn hop_id(mapping: &MessageMapping, hop: Hop) -> Result<&HopMessageId, RelayError> {
    let id = match hop {
        Hop::Destination => mapping.destination_msg_id.as_ref(),
        Hop::Source | Hop::Relay => mapping.relay_msg_id.as_ref(),
    };
    id.ok_or_else(|| {
        RelayError::InvariantViolation(format!(
            "mapping {} is {} without a {hop} message id",
            mapping.id, mapping.state
        ))
    })
}

#[cfg(test)]
mod tests {
    use hoprelay_core::HopAdapterFactory;
    use hoprelay_storage::queries::pairs;
    use hoprelay_test_utils::{Fault, HopCall, MockHop, TestHarness};

    use super::*;

    struct Running {
        handle: PipelineHandle,
        reports: mpsc::UnboundedReceiver<RelayReport>,
        relay: Arc<MockHop>,
        destination: Arc<MockHop>,
        store: Arc<dyn MappingStore>,
        pair: PairId,
    }

    impl Running {
        async fn start(harness: &TestHarness, name: &str) -> Self {
            Self::start_with(harness, name, PipelineConfig::from_config(&harness.config)).await
        }

        async fn start_with(harness: &TestHarness, name: &str, config: PipelineConfig) -> Self {
            let pair_id = harness.pair_id(name).unwrap();
            let pair = pairs::get_pair(&harness.db, pair_id).await.unwrap().unwrap();
            let relay_cred = harness.creds.get_credential(&pair.identity).await.unwrap();
            let dest_cred = harness
                .creds
                .get_credential(pair.destination_poster())
                .await
                .unwrap();
            let adapters = harness
                .factory
                .build(&pair, &relay_cred, &dest_cred)
                .await
                .unwrap();
            let (relay, destination) = harness.factory.hops(pair_id).await;
            let store: Arc<dyn MappingStore> = harness.mapping_store();
            let (tx, reports) = mpsc::unbounded_channel();
            let handle = RelayPipeline::spawn(
                &pair,
                adapters,
                store.clone(),
                config,
                tx,
                CancellationToken::new(),
            );
            Self {
                handle,
                reports,
                relay,
                destination,
                store,
                pair: pair_id,
            }
        }

        async fn submit(&self, event: SourceEvent) {
            self.handle.submit(event).await.unwrap();
        }

        /// Wait until `count` events have been handled.
        async fn settle(&self, count: u64) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.handle.status().processed < count {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            })
            .await
            .unwrap();
        }

        async fn mapping(&self, source_msg_id: &str) -> MessageMapping {
            self.store
                .find_by_source(self.pair, source_msg_id)
                .await
                .unwrap()
                .unwrap()
        }
    }

    async fn harness() -> TestHarness {
        TestHarness::builder()
            .identity("alpha", 10, 1)
            .pair("news", "alpha")
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn new_edit_delete_lifecycle() {
        let harness = harness().await;
        let mut p = Running::start(&harness, "news").await;
        let pair = p.pair;

        p.submit(SourceEvent::new_message(pair, "m1", "hello")).await;
        p.settle(1).await;
        let mapping = p.mapping("m1").await;
        assert_eq!(mapping.state, MappingState::Delivered);
        let relay_id = mapping.relay_msg_id.clone().unwrap();
        let dest_id = mapping.destination_msg_id.clone().unwrap();
        assert!(matches!(
            p.reports.try_recv().unwrap(),
            RelayReport::Delivered { .. }
        ));

        p.submit(SourceEvent::edit(pair, "m1", "hello, world")).await;
        p.settle(2).await;
        assert_eq!(p.mapping("m1").await.state, MappingState::Edited);
        assert_eq!(p.relay.content_of(&relay_id).await.unwrap(), "hello, world");
        assert_eq!(
            p.destination.content_of(&dest_id).await.unwrap(),
            "hello, world"
        );

        p.submit(SourceEvent::delete(pair, "m1")).await;
        p.settle(3).await;
        assert_eq!(p.mapping("m1").await.state, MappingState::Deleted);
        assert_eq!(p.relay.live_count().await, 0);
        assert_eq!(p.destination.live_count().await, 0);

        let calls_before = p.relay.calls().await.len() + p.destination.calls().await.len();
        p.submit(SourceEvent::delete(pair, "m1")).await;
        p.settle(4).await;
        let calls_after = p.relay.calls().await.len() + p.destination.calls().await.len();
        assert_eq!(calls_before, calls_after);
        assert_eq!(p.mapping("m1").await.state, MappingState::Deleted);
    }

    #[tokio::test]
    async fn duplicate_new_is_relayed_once() {
        let harness = harness().await;
        let p = Running::start(&harness, "news").await;

        p.submit(SourceEvent::new_message(p.pair, "m1", "hi")).await;
        p.submit(SourceEvent::new_message(p.pair, "m1", "hi")).await;
        p.settle(2).await;

        assert_eq!(p.relay.send_count().await, 1);
        assert_eq!(p.destination.send_count().await, 1);
        assert_eq!(p.handle.status().delivered, 1);
    }

    #[tokio::test]
    async fn replies_link_only_to_delivered_parents() {
        let harness = harness().await;
        let p = Running::start(&harness, "news").await;

        p.submit(SourceEvent::new_message(p.pair, "m1", "parent"))
            .await;
        p.submit(SourceEvent::new_message(p.pair, "m2", "child").replying_to("m1"))
            .await;
        p.submit(SourceEvent::new_message(p.pair, "m3", "orphan").replying_to("never-seen"))
            .await;
        p.settle(3).await;

        let parent = p.mapping("m1").await;
        let child = p.mapping("m2").await;
        assert_eq!(child.reply_parent, Some(parent.id));

        let relay_calls = p.relay.calls().await;
        assert_eq!(
            relay_calls[1],
            HopCall::Send {
                content: "child".into(),
                reply_to: parent.relay_msg_id.clone(),
            }
        );
        assert_eq!(
            relay_calls[2],
            HopCall::Send {
                content: "orphan".into(),
                reply_to: None,
            }
        );
        let dest_calls = p.destination.calls().await;
        assert_eq!(
            dest_calls[1],
            HopCall::Send {
                content: "child".into(),
                reply_to: parent.destination_msg_id.clone(),
            }
        );
        assert_eq!(p.mapping("m3").await.state, MappingState::Delivered);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let harness = harness().await;
        let p = Running::start(&harness, "news").await;
        p.relay.fail_next_sends(2, Fault::Transient).await;

        p.submit(SourceEvent::new_message(p.pair, "m1", "hi")).await;
        p.settle(1).await;

        assert_eq!(p.relay.send_count().await, 3);
        assert_eq!(p.mapping("m1").await.state, MappingState::Delivered);
    }

    #[tokio::test]
    async fn exhausted_relay_fails_and_resumes_on_redelivery() {
        let harness = harness().await;
        let mut p = Running::start(&harness, "news").await;
        p.destination.fail_next_sends(3, Fault::Transient).await;

        p.submit(SourceEvent::new_message(p.pair, "m1", "hi")).await;
        p.settle(1).await;

        let mapping = p.mapping("m1").await;
        assert_eq!(mapping.state, MappingState::Failed);
        assert!(mapping.relay_msg_id.is_some());
        assert!(mapping.destination_msg_id.is_none());
        match p.reports.try_recv().unwrap() {
            RelayReport::Failed { hop, kind, .. } => {
                assert_eq!(hop, Some(Hop::Destination));
                assert_eq!(kind, EventKind::New);
            }
            other => panic!("unexpected report {other:?}"),
        }

        // the source delivers again; only the destination hop is retried
        p.submit(SourceEvent::new_message(p.pair, "m1", "hi")).await;
        p.settle(2).await;
        assert_eq!(p.mapping("m1").await.state, MappingState::Delivered);
        assert_eq!(p.relay.send_count().await, 1);
        assert_eq!(p.destination.send_count().await, 4);
    }

    #[tokio::test]
    async fn authorization_failure_is_reported_without_retry() {
        let harness = harness().await;
        let mut p = Running::start(&harness, "news").await;
        p.relay.fail_next_sends(1, Fault::Unauthorized).await;

        p.submit(SourceEvent::new_message(p.pair, "m1", "hi")).await;
        p.settle(1).await;

        assert_eq!(p.relay.send_count().await, 1);
        assert_eq!(p.destination.send_count().await, 0);
        assert_eq!(p.mapping("m1").await.state, MappingState::Failed);
        match p.reports.try_recv().unwrap() {
            RelayReport::AuthorizationFailed { identity, hop, .. } => {
                assert_eq!(identity, "alpha");
                assert_eq!(hop, Hop::Relay);
            }
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[tokio::test]
    async fn edit_of_vanished_message_is_not_fatal() {
        let harness = harness().await;
        let p = Running::start(&harness, "news").await;

        p.submit(SourceEvent::new_message(p.pair, "m1", "hi")).await;
        p.settle(1).await;
        let mapping = p.mapping("m1").await;
        p.destination
            .remove_remote(mapping.destination_msg_id.as_ref().unwrap())
            .await;

        p.submit(SourceEvent::edit(p.pair, "m1", "edited")).await;
        p.submit(SourceEvent::new_message(p.pair, "m2", "next")).await;
        p.settle(3).await;

        assert_eq!(p.mapping("m1").await.state, MappingState::Delivered);
        assert_eq!(
            p.relay
                .content_of(mapping.relay_msg_id.as_ref().unwrap())
                .await
                .unwrap(),
            "edited"
        );
        assert_eq!(p.mapping("m2").await.state, MappingState::Delivered);
    }

    #[tokio::test]
    async fn edit_arriving_first_is_applied_after_delivery() {
        let harness = harness().await;
        let p = Running::start(&harness, "news").await;

        p.submit(SourceEvent::edit(p.pair, "m1", "v2")).await;
        p.settle(1).await;
        assert_eq!(p.handle.status().deferred, 1);

        p.submit(SourceEvent::new_message(p.pair, "m1", "v1")).await;
        p.settle(2).await;

        let mapping = p.mapping("m1").await;
        assert_eq!(mapping.state, MappingState::Edited);
        assert_eq!(
            p.destination
                .content_of(mapping.destination_msg_id.as_ref().unwrap())
                .await
                .unwrap(),
            "v2"
        );
        assert_eq!(p.handle.status().deferred, 0);
    }

    #[tokio::test]
    async fn deferred_events_are_dropped_when_relay_gives_up() {
        let harness = harness().await;
        let p = Running::start(&harness, "news").await;
        p.relay.fail_always(Fault::Transient).await;

        p.submit(SourceEvent::delete(p.pair, "m1")).await;
        p.submit(SourceEvent::new_message(p.pair, "m1", "v1")).await;
        p.settle(2).await;

        let status = p.handle.status();
        assert_eq!(status.deferred, 0);
        assert_eq!(status.dropped, 1);
        assert_eq!(p.mapping("m1").await.state, MappingState::Failed);
        assert!(
            !p.destination
                .calls()
                .await
                .iter()
                .any(|c| matches!(c, HopCall::Delete { .. }))
        );
    }

    #[tokio::test]
    async fn deferred_queue_is_bounded() {
        let harness = TestHarness::builder()
            .identity("alpha", 10, 1)
            .pair("news", "alpha")
            .configure(|c| c.relay.max_deferred_events = 2)
            .build()
            .await
            .unwrap();
        let p = Running::start(&harness, "news").await;

        for i in 0..4 {
            p.submit(SourceEvent::edit(p.pair, format!("m{i}"), "x")).await;
        }
        p.settle(4).await;

        let status = p.handle.status();
        assert_eq!(status.deferred, 2);
        assert_eq!(status.dropped, 2);
    }

    #[tokio::test]
    async fn stale_follow_ups_do_not_block_an_early_edit() {
        let harness = TestHarness::builder()
            .identity("alpha", 10, 1)
            .pair("news", "alpha")
            .configure(|c| c.relay.max_deferred_events = 2)
            .build()
            .await
            .unwrap();
        let p = Running::start(&harness, "news").await;

        // edits for messages that predate the pair never get a "new"
        p.submit(SourceEvent::edit(p.pair, "old-1", "x")).await;
        p.submit(SourceEvent::edit(p.pair, "old-2", "x")).await;
        p.submit(SourceEvent::edit(p.pair, "m1", "v2")).await;
        p.submit(SourceEvent::new_message(p.pair, "m1", "v1")).await;
        p.settle(4).await;

        let mapping = p.mapping("m1").await;
        assert_eq!(mapping.state, MappingState::Edited);
        assert_eq!(
            p.destination
                .content_of(mapping.destination_msg_id.as_ref().unwrap())
                .await
                .unwrap(),
            "v2"
        );
        let status = p.handle.status();
        assert_eq!(status.dropped, 1);
        assert_eq!(status.deferred, 1);
    }

    #[tokio::test]
    async fn deferred_events_expire() {
        let harness = harness().await;
        let mut config = PipelineConfig::from_config(&harness.config);
        config.deferred_ttl = Duration::from_millis(50);
        let p = Running::start_with(&harness, "news", config).await;

        p.submit(SourceEvent::edit(p.pair, "old-1", "x")).await;
        p.settle(1).await;
        assert_eq!(p.handle.status().deferred, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        p.submit(SourceEvent::new_message(p.pair, "m2", "hi")).await;
        p.settle(2).await;

        let status = p.handle.status();
        assert_eq!(status.deferred, 0);
        assert_eq!(status.dropped, 1);
        assert_eq!(p.mapping("m2").await.state, MappingState::Delivered);
    }

    #[tokio::test]
    async fn stop_lets_in_flight_send_finish() {
        let harness = harness().await;
        let p = Running::start(&harness, "news").await;
        p.relay.pause();

        p.submit(SourceEvent::new_message(p.pair, "m1", "hi")).await;
        assert!(p.relay.wait_for_calls(1, Duration::from_secs(2)).await);
        p.handle.stop();
        assert!(matches!(
            p.handle
                .submit(SourceEvent::new_message(p.pair, "m2", "late"))
                .await,
            Err(RelayError::PairStopped { .. })
        ));

        p.relay.resume();
        assert!(p.handle.join(Duration::from_secs(2)).await);
        assert_eq!(p.mapping("m1").await.state, MappingState::Delivered);
        assert!(
            p.store
                .find_by_source(p.pair, "m2")
                .await
                .unwrap()
                .is_none()
        );
        assert!(p.handle.status().stopped);
    }

    #[tokio::test]
    async fn rebind_moves_sends_to_new_clients() {
        let harness = harness().await;
        let p = Running::start(&harness, "news").await;

        p.submit(SourceEvent::new_message(p.pair, "m1", "before")).await;
        p.settle(1).await;

        let relay = Arc::new(MockHop::new(Hop::Relay));
        let destination = Arc::new(MockHop::new(Hop::Destination));
        let previous = p.handle.rebind(HopAdapters {
            relay: relay.clone(),
            destination: destination.clone(),
            relay_identity: "beta".into(),
            destination_identity: "beta".into(),
        });
        assert_eq!(previous.relay_identity, "alpha");
        assert_eq!(p.handle.identity(), "beta");
        assert_eq!(p.handle.adapters().destination_identity, "beta");

        p.submit(SourceEvent::new_message(p.pair, "m2", "after")).await;
        p.settle(2).await;

        assert_eq!(p.relay.send_count().await, 1);
        assert_eq!(relay.send_count().await, 1);
        assert_eq!(destination.send_count().await, 1);
        // earlier mappings survive the rebind
        assert_eq!(p.mapping("m1").await.state, MappingState::Delivered);
    }
}
