// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Partitioning of forwarding pairs into capacity-bounded worker groups.
//!
//! Each group belongs to one identity. Admin reassignment and
//! health-triggered rebalancing both go through
//! [`WorkerGroupScheduler::assign`], so there is a single path that mutates
//! membership.

pub mod reports;
pub mod scheduler;
mod state;

pub use reports::{Assignment, BulkReport, IdentityLoad, RebalanceReport, SchedulerSnapshot};
pub use scheduler::WorkerGroupScheduler;
