// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so whichever recorder the binary installs
//! collects these.

use metrics::{describe_counter, describe_gauge};

/// Register descriptions for every hoprelay metric.
pub fn register_metrics() {
    describe_counter!(
        "hoprelay_relay_delivered_total",
        "New messages delivered to the destination hop"
    );
    describe_counter!(
        "hoprelay_relay_failed_total",
        "Relay operations that gave up after retries or were rejected"
    );
    describe_counter!(
        "hoprelay_relay_invariant_violations_total",
        "Mapping transitions refused as out of order"
    );
    describe_counter!(
        "hoprelay_health_transitions_total",
        "Identity health state changes"
    );
    describe_counter!(
        "hoprelay_mappings_swept_total",
        "Mapping rows removed by the retention sweep"
    );
    describe_counter!(
        "hoprelay_pairs_unplaceable_total",
        "Pairs a rebalance could not move to another identity"
    );
    describe_gauge!("hoprelay_pipelines_active", "Running pair pipelines");
    describe_gauge!(
        "hoprelay_pairs_stranded",
        "Pairs left on a failed identity"
    );
}

pub fn record_delivered() {
    metrics::counter!("hoprelay_relay_delivered_total").increment(1);
}

/// Record a failed operation. `kind` is the event kind, or `authorization`
/// for rejections.
pub fn record_failed(kind: impl std::fmt::Display) {
    metrics::counter!("hoprelay_relay_failed_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_invariant_violation() {
    metrics::counter!("hoprelay_relay_invariant_violations_total").increment(1);
}

pub fn record_swept(removed: u64) {
    metrics::counter!("hoprelay_mappings_swept_total").increment(removed);
}

pub fn record_unplaceable(count: usize) {
    metrics::counter!("hoprelay_pairs_unplaceable_total").increment(count as u64);
}

pub fn set_active_pipelines(count: usize) {
    metrics::gauge!("hoprelay_pipelines_active").set(count as f64);
}

#[cfg(test)]
mod tests {
    use hoprelay_core::EventKind;
    use metrics_exporter_prometheus::PrometheusBuilder;

    use super::*;

    #[test]
    fn relay_counters_are_labelled_by_kind_only() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            for _ in 0..3 {
                record_delivered();
            }
            record_failed(EventKind::Edit);
            record_failed("authorization");
        });

        let rendered = handle.render();
        assert!(rendered.contains("hoprelay_relay_delivered_total 3"));
        assert!(rendered.contains(r#"hoprelay_relay_failed_total{kind="edit"} 1"#));
        assert!(rendered.contains(r#"hoprelay_relay_failed_total{kind="authorization"} 1"#));
        assert!(!rendered.contains("pair="));
    }
}
