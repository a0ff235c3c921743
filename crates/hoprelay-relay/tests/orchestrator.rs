// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Orchestrator tests against a real database, vault, and scheduler with
//! mock hops and a scripted prober.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hoprelay_core::{
    HealthState, MappingState, PairId, PairStatus, ProbeOutcome, RelayError, SourceEvent,
};
use hoprelay_relay::Orchestrator;
use hoprelay_storage::NewPair;
use hoprelay_storage::queries::pairs;
use hoprelay_test_utils::{TestHarness, TestHarnessBuilder};
use tokio_util::sync::CancellationToken;

async fn start(harness: &TestHarness) -> Arc<Orchestrator> {
    let orch = Orchestrator::new(
        harness.config.clone(),
        harness.db.clone(),
        harness.creds.clone(),
        harness.prober.clone(),
        harness.factory.clone(),
    )
    .await
    .unwrap();
    orch.start(&CancellationToken::new()).await.unwrap();
    orch
}

/// Poll `check` until it holds, failing the test after five seconds.
async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn delivered(orch: &Orchestrator, pair: PairId, source_msg_id: &str) -> bool {
    orch.store()
        .find_by_source(pair, source_msg_id)
        .await
        .unwrap()
        .is_some_and(|m| m.state == MappingState::Delivered)
}

fn slow_probes(harness: TestHarnessBuilder) -> TestHarnessBuilder {
    // only the immediate first cycle runs during a test
    harness.configure(|c| c.health.probe_interval_secs = 3600)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatched_message_is_relayed_and_delivered() {
    let harness = slow_probes(TestHarness::builder())
        .identity("alpha", 10, 1)
        .pair("news", "alpha")
        .build()
        .await
        .unwrap();
    let news = harness.pair_id("news").unwrap();
    let orch = start(&harness).await;

    orch.dispatch(SourceEvent::new_message(news, "1", "hello"))
        .await
        .unwrap();
    let o = &orch;
    eventually("delivery", move || async move { delivered(o, news, "1").await }).await;

    let (relay, destination) = harness.factory.hops(news).await;
    assert_eq!(relay.send_count().await, 1);
    assert_eq!(destination.send_count().await, 1);
    assert_eq!(orch.scheduler().identity_of(news).await.as_deref(), Some("alpha"));

    let stats = orch.stats().await.unwrap();
    assert_eq!(stats.active_pipelines(), 1);
    assert_eq!(stats.system.pair_count(PairStatus::Active), 1);

    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_stalled_pair_does_not_hold_up_another() {
    let harness = slow_probes(TestHarness::builder())
        .identity("alpha", 10, 1)
        .pair("slow", "alpha")
        .pair("fast", "alpha")
        .build()
        .await
        .unwrap();
    let slow = harness.pair_id("slow").unwrap();
    let fast = harness.pair_id("fast").unwrap();
    let orch = start(&harness).await;
    let stalled = harness.factory.relay(slow).await;
    stalled.pause();

    orch.dispatch(SourceEvent::new_message(slow, "1", "held"))
        .await
        .unwrap();
    assert!(stalled.wait_for_calls(1, Duration::from_secs(2)).await);
    orch.dispatch(SourceEvent::new_message(fast, "1", "through"))
        .await
        .unwrap();

    let o = &orch;
    eventually("delivery on the other pair", move || async move {
        delivered(o, fast, "1").await
    })
    .await;
    assert!(!delivered(&orch, slow, "1").await);
    assert_eq!(harness.factory.destination(slow).await.send_count().await, 0);

    stalled.resume();
    eventually("delivery once resumed", move || async move {
        delivered(o, slow, "1").await
    })
    .await;

    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unauthorized_identity_hands_its_pairs_over() {
    let harness = slow_probes(TestHarness::builder())
        .identity("alpha", 10, 2)
        .identity("beta", 10, 1)
        .pair("news", "alpha")
        .build()
        .await
        .unwrap();
    let news = harness.pair_id("news").unwrap();
    harness
        .prober
        .script_identity("alpha", [ProbeOutcome::Unauthorized("session revoked".into())])
        .await;
    let orch = start(&harness).await;

    let o = &orch;
    eventually("pair to move to beta", move || async move {
        o.scheduler().identity_of(news).await.as_deref() == Some("beta")
    })
    .await;
    eventually("pipeline rebind", move || async move {
        o.stats()
            .await
            .unwrap()
            .pipelines
            .iter()
            .any(|p| p.pair == news && p.relay_identity == "beta" && !p.stopped)
    })
    .await;

    let alpha = harness.creds.get("alpha").await.unwrap();
    assert_eq!(alpha.health, HealthState::Unauthorized);
    let builds = harness.factory.builds().await;
    assert_eq!(builds.first().unwrap().relay_identity, "alpha");
    assert_eq!(builds.last().unwrap().relay_identity, "beta");

    orch.dispatch(SourceEvent::new_message(news, "7", "after the move"))
        .await
        .unwrap();
    eventually("delivery", move || async move { delivered(o, news, "7").await }).await;
    let relay = harness.factory.relay(news).await;
    assert_eq!(relay.identity().await, "beta");
    // the factory handed back the same client, so the rebind keeps it open
    assert_eq!(relay.shutdown_count().await, 0);

    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_session_at_build_time_moves_the_pair() {
    let harness = slow_probes(TestHarness::builder())
        .identity("alpha", 10, 2)
        .identity("beta", 10, 1)
        .pair("news", "alpha")
        .build()
        .await
        .unwrap();
    let news = harness.pair_id("news").unwrap();
    harness.factory.refuse_identity("alpha").await;
    let orch = start(&harness).await;
    let o = &orch;

    eventually("pipeline on beta", move || async move {
        o.stats()
            .await
            .unwrap()
            .pipelines
            .iter()
            .any(|p| p.pair == news && p.relay_identity == "beta" && !p.stopped)
    })
    .await;
    assert!(
        harness
            .factory
            .builds()
            .await
            .iter()
            .all(|b| b.relay_identity == "beta")
    );

    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pairs_without_a_home_are_stranded_until_recovery() {
    let harness = slow_probes(TestHarness::builder())
        .identity("alpha", 10, 1)
        .pair("news", "alpha")
        .build()
        .await
        .unwrap();
    let news = harness.pair_id("news").unwrap();
    harness
        .prober
        .script_identity("alpha", [ProbeOutcome::Failed("unreachable".into())])
        .await;
    let orch = start(&harness).await;
    let o = &orch;

    // degraded after the first failure; keep probing until unreachable
    eventually("alpha to become unreachable", move || async move {
        if o.monitor().current("alpha").await != Some(HealthState::Unreachable) {
            o.monitor().probe_cycle().await.unwrap();
        }
        o.scheduler().is_stranded(news).await
    })
    .await;
    eventually("pipeline stop", move || async move {
        o.stats().await.unwrap().pipelines.is_empty()
    })
    .await;

    let err = orch
        .dispatch(SourceEvent::new_message(news, "1", "lost?"))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::PairStopped { pair_id } if pair_id == news));
    let pair = pairs::get_pair(&harness.db, news).await.unwrap().unwrap();
    assert_eq!(pair.status, PairStatus::Stranded);
    // stranded pairs keep their group
    assert_eq!(orch.scheduler().identity_of(news).await.as_deref(), Some("alpha"));

    harness.prober.script_identity("alpha", [ProbeOutcome::Ok]).await;
    orch.monitor().probe_cycle().await.unwrap();
    eventually("pipeline restart", move || async move {
        o.stats().await.unwrap().active_pipelines() == 1
    })
    .await;
    assert!(!orch.scheduler().is_stranded(news).await);

    orch.dispatch(SourceEvent::new_message(news, "2", "back"))
        .await
        .unwrap();
    eventually("delivery", move || async move { delivered(o, news, "2").await }).await;

    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bulk_reassignment_is_partial() {
    let harness = slow_probes(TestHarness::builder())
        .identity("alpha", 10, 2)
        .identity("beta", 1, 1)
        .pair("a", "alpha")
        .pair("b", "alpha")
        .build()
        .await
        .unwrap();
    let a = harness.pair_id("a").unwrap();
    let b = harness.pair_id("b").unwrap();
    let orch = start(&harness).await;

    let report = orch.reassign(&[a, b], "beta").await;
    assert!(!report.is_complete());
    assert_eq!(report.assigned.len(), 1);
    assert_eq!(report.assigned[0].pair, a);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].0, b);
    assert!(matches!(
        report.rejected[0].1,
        RelayError::CapacityExhausted { .. }
    ));

    let stats = orch.stats().await.unwrap();
    let by_pair = |id: PairId| stats.pipelines.iter().find(|p| p.pair == id).unwrap();
    assert_eq!(by_pair(a).relay_identity, "beta");
    assert_eq!(by_pair(b).relay_identity, "alpha");

    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disable_and_enable_a_pair() {
    let harness = slow_probes(TestHarness::builder())
        .identity("alpha", 10, 1)
        .pair("news", "alpha")
        .build()
        .await
        .unwrap();
    let news = harness.pair_id("news").unwrap();
    let orch = start(&harness).await;

    let pair = orch.disable_pair(news).await.unwrap();
    assert!(!pair.enabled);
    assert_eq!(pair.status, PairStatus::Disabled);
    assert!(orch.scheduler().group_of(news).await.is_none());
    assert!(matches!(
        orch.dispatch(SourceEvent::new_message(news, "1", "x")).await,
        Err(RelayError::PairStopped { .. })
    ));
    let (relay, destination) = harness.factory.hops(news).await;
    assert_eq!(relay.shutdown_count().await, 1);
    assert_eq!(destination.shutdown_count().await, 1);

    let pair = orch.enable_pair(news).await.unwrap();
    assert!(pair.enabled);
    assert_eq!(pair.status, PairStatus::Active);
    orch.dispatch(SourceEvent::new_message(news, "2", "y"))
        .await
        .unwrap();
    let o = &orch;
    eventually("delivery", move || async move { delivered(o, news, "2").await }).await;

    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disabled_pairs_do_not_start() {
    let harness = slow_probes(TestHarness::builder())
        .identity("alpha", 10, 1)
        .pair("news", "alpha")
        .disabled_pair("old", "alpha")
        .build()
        .await
        .unwrap();
    let old = harness.pair_id("old").unwrap();
    let orch = start(&harness).await;

    let stats = orch.stats().await.unwrap();
    assert_eq!(stats.pipelines.len(), 1);
    assert!(orch.scheduler().group_of(old).await.is_none());
    assert!(matches!(
        orch.dispatch(SourceEvent::new_message(old, "1", "x")).await,
        Err(RelayError::PairStopped { .. })
    ));

    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn adding_a_pair_beyond_capacity_keeps_it_disabled() {
    let harness = slow_probes(TestHarness::builder())
        .identity("alpha", 1, 1)
        .pair("a", "alpha")
        .build()
        .await
        .unwrap();
    let orch = start(&harness).await;

    let new_pair = |name: &str, identity: &str| NewPair {
        name: name.to_string(),
        source_channel: format!("source/{name}"),
        relay_channel: format!("relay/{name}"),
        destination_channel: format!("destination/{name}"),
        identity: identity.to_string(),
        destination_identity: None,
        enabled: true,
    };

    let err = orch.add_pair(new_pair("b", "alpha")).await.unwrap_err();
    assert!(matches!(err, RelayError::CapacityExhausted { .. }));
    let b = pairs::get_pair_by_name(&harness.db, "b")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(b.status, PairStatus::Disabled);
    assert!(orch.scheduler().group_of(b.id).await.is_none());

    let err = orch.add_pair(new_pair("c", "nobody")).await.unwrap_err();
    assert!(matches!(err, RelayError::UnknownIdentity(_)));
    assert!(pairs::get_pair_by_name(&harness.db, "c").await.unwrap().is_none());

    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn identities_in_use_cannot_be_removed() {
    let harness = slow_probes(TestHarness::builder())
        .identity("alpha", 10, 1)
        .pair("news", "alpha")
        .build()
        .await
        .unwrap();
    let news = harness.pair_id("news").unwrap();
    let orch = start(&harness).await;

    let err = orch.remove_identity("alpha").await.unwrap_err();
    assert!(matches!(err, RelayError::IdentityInUse { .. }));
    let snapshot = orch.scheduler().snapshot().await;
    assert!(snapshot.identities.iter().any(|i| i.name == "alpha"));

    assert!(orch.remove_pair(news).await.unwrap());
    assert!(matches!(
        orch.dispatch(SourceEvent::new_message(news, "1", "x")).await,
        Err(RelayError::UnknownPair(_))
    ));
    assert!(orch.remove_identity("alpha").await.unwrap());
    assert!(harness.creds.get("alpha").await.is_err());

    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pair_check_reports_destination_permission() {
    let harness = slow_probes(TestHarness::builder())
        .identity("alpha", 10, 1)
        .pair("news", "alpha")
        .build()
        .await
        .unwrap();
    let news = harness.pair_id("news").unwrap();
    let orch = start(&harness).await;
    harness
        .prober
        .set_destination("news", ProbeOutcome::Unauthorized("cannot post".into()))
        .await;

    let check = orch.test_pair(news).await.unwrap();
    assert!(!check.ok);
    assert_eq!(check.identity_outcome, "ok");
    assert!(check.destination_outcome.starts_with("unauthorized"));
    // a check is read-only
    let alpha = harness.creds.get("alpha").await.unwrap();
    assert_eq!(alpha.health, HealthState::Healthy);

    assert!(matches!(
        orch.test_pair(PairId(999)).await,
        Err(RelayError::UnknownPair(_))
    ));

    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sweep_keeps_recent_mappings() {
    let harness = slow_probes(TestHarness::builder())
        .identity("alpha", 10, 1)
        .pair("news", "alpha")
        .build()
        .await
        .unwrap();
    let news = harness.pair_id("news").unwrap();
    let orch = start(&harness).await;

    orch.dispatch(SourceEvent::new_message(news, "1", "hello"))
        .await
        .unwrap();
    let o = &orch;
    eventually("delivery", move || async move { delivered(o, news, "1").await }).await;

    assert_eq!(orch.sweep_now().await.unwrap(), 0);
    assert!(delivered(&orch, news, "1").await);

    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stops_every_pipeline() {
    let harness = slow_probes(TestHarness::builder())
        .identity("alpha", 10, 1)
        .pair("a", "alpha")
        .pair("b", "alpha")
        .build()
        .await
        .unwrap();
    let a = harness.pair_id("a").unwrap();
    let b = harness.pair_id("b").unwrap();
    let orch = start(&harness).await;
    assert_eq!(orch.stats().await.unwrap().active_pipelines(), 2);

    orch.shutdown().await;

    assert!(orch.stats().await.unwrap().pipelines.is_empty());
    for pair in [a, b] {
        let (relay, destination) = harness.factory.hops(pair).await;
        assert_eq!(relay.shutdown_count().await, 1);
        assert_eq!(destination.shutdown_count().await, 1);
    }
    assert!(matches!(
        orch.dispatch(SourceEvent::new_message(a, "1", "late")).await,
        Err(RelayError::PairStopped { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn outer_cancellation_stops_background_loops() {
    let harness = slow_probes(TestHarness::builder())
        .identity("alpha", 10, 1)
        .pair("news", "alpha")
        .build()
        .await
        .unwrap();
    let orch = Orchestrator::new(
        harness.config.clone(),
        harness.db.clone(),
        harness.creds.clone(),
        harness.prober.clone(),
        harness.factory.clone(),
    )
    .await
    .unwrap();
    let cancel = CancellationToken::new();
    orch.start(&cancel).await.unwrap();

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), orch.shutdown())
        .await
        .unwrap();
}
