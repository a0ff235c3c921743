// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity health monitoring for hoprelay.
//!
//! [`HealthMonitor`] probes every registered identity on an interval,
//! folds the outcomes through a [`ProbeTracker`] per identity, persists the
//! result, and publishes [`HealthTransition`]s on a channel.

pub mod monitor;
pub mod tracker;

pub use monitor::{HealthMonitor, HealthTransition, PairCheck};
pub use tracker::ProbeTracker;
