// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `hoprelay serve` command implementation.
//!
//! Starts the orchestrator and feeds it source events read from stdin, one
//! JSON object per line:
//!
//! ```text
//! {"pair_id":1,"source_msg_id":"42","kind":"new","rendered_content":"hi"}
//! {"pair_id":1,"source_msg_id":"43","kind":"new","rendered_content":"re","reply_to_source_msg_id":"42"}
//! {"pair_id":1,"source_msg_id":"42","kind":"delete"}
//! ```
//!
//! Hop calls are journaled to stdout; logs go to stderr. On end of input the
//! queued events are given time to finish before shutting down. SIGINT and
//! SIGTERM shut down right away, letting in-flight sends complete.

use std::time::Duration;

use hoprelay_config::HoprelayConfig;
use hoprelay_core::{RelayError, SourceEvent};
use hoprelay_relay::{Orchestrator, install_signal_handler};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app;

/// What happened to the lines read from the event source.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedSummary {
    pub accepted: u64,
    pub rejected: u64,
    pub malformed: u64,
    /// Input ended, as opposed to a shutdown signal.
    pub exhausted: bool,
}

/// Runs the `hoprelay serve` command.
pub async fn run_serve(config: HoprelayConfig) -> Result<(), RelayError> {
    init_tracing(&config.relay.log_level);

    let app = app::open(config, true).await?;
    let declared = app::apply_declared_pairs(&app).await?;
    let cancel = install_signal_handler();
    app.orchestrator.start(&cancel).await?;
    info!(declared, "hoprelay serving, reading source events from stdin");

    let stdin = BufReader::new(tokio::io::stdin());
    let summary = feed_events(&app.orchestrator, stdin, &cancel).await?;
    info!(
        accepted = summary.accepted,
        rejected = summary.rejected,
        malformed = summary.malformed,
        "event source closed"
    );
    if summary.exhausted {
        wait_for_drain(
            &app.orchestrator,
            summary.accepted,
            app.config.relay.shutdown_timeout(),
            &cancel,
        )
        .await?;
    }

    app.orchestrator.shutdown().await;
    info!(hop_calls = app.journal.call_count().await, "hoprelay stopped");
    Ok(())
}

/// Read JSON-lines source events and dispatch them until the input ends or
/// `cancel` fires. Bad lines and rejected events are logged and skipped.
pub async fn feed_events<R>(
    orchestrator: &Orchestrator,
    reader: R,
    cancel: &CancellationToken,
) -> Result<FeedSummary, RelayError>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = FeedSummary::default();
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.map_err(|e| RelayError::Internal(format!("reading events: {e}")))?,
        };
        let Some(line) = line else {
            summary.exhausted = true;
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: SourceEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "malformed source event skipped");
                summary.malformed += 1;
                continue;
            }
        };
        let pair_id = event.pair_id;
        match orchestrator.dispatch(event).await {
            Ok(()) => summary.accepted += 1,
            Err(e) => {
                warn!(pair_id = %pair_id, error = %e, "source event rejected");
                summary.rejected += 1;
            }
        }
    }
    Ok(summary)
}

/// Wait until the pipelines have handled `accepted` events. Gives up when
/// nothing moved for `idle_limit`, or on cancellation.
pub async fn wait_for_drain(
    orchestrator: &Orchestrator,
    accepted: u64,
    idle_limit: Duration,
    cancel: &CancellationToken,
) -> Result<bool, RelayError> {
    let mut last = 0;
    let mut last_progress = tokio::time::Instant::now();
    loop {
        let processed: u64 = orchestrator
            .stats()
            .await?
            .pipelines
            .iter()
            .map(|p| p.processed)
            .sum();
        if processed >= accepted {
            debug!(processed, "all queued events handled");
            return Ok(true);
        }
        if processed != last {
            last = processed;
            last_progress = tokio::time::Instant::now();
        } else if last_progress.elapsed() >= idle_limit {
            warn!(processed, accepted, "pipelines stopped making progress, shutting down");
            return Ok(false);
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(false),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
    }
}

/// Initializes the tracing subscriber on stderr. `RUST_LOG` overrides the
/// configured level.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hoprelay={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
