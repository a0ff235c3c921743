// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relay pipelines and the orchestrator that runs them.
//!
//! Each enabled forwarding pair gets a [`RelayPipeline`]: a single task that
//! takes source events in arrival order and carries them through the relay
//! and destination hops, recording progress in the mapping store. The
//! [`Orchestrator`] starts and stops pipelines as the scheduler moves pairs
//! between identities and as the health monitor reports transitions.

pub mod orchestrator;
pub mod pipeline;
pub mod recording;
pub mod reports;
pub mod retry;
pub mod shutdown;

pub use orchestrator::{Orchestrator, OrchestratorStats};
pub use pipeline::{PipelineConfig, PipelineHandle, PipelineStatus, RelayPipeline};
pub use reports::RelayReport;
pub use retry::{RetryPolicy, run_with_retry};
pub use shutdown::install_signal_handler;
