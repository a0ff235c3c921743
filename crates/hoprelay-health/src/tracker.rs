// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-identity health state machine.
//!
//! One failed probe degrades an identity; `unreachable_after` consecutive
//! failures make it unreachable; a single successful probe restores it.
//! A rejected credential is unauthorized immediately.

use hoprelay_core::{HealthState, ProbeOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTracker {
    state: HealthState,
    consecutive_failures: u32,
    unreachable_after: u32,
}

impl ProbeTracker {
    pub fn new(initial: HealthState, unreachable_after: u32) -> Self {
        let consecutive_failures = match initial {
            HealthState::Unreachable => unreachable_after,
            HealthState::Degraded => 1,
            HealthState::Healthy | HealthState::Unauthorized => 0,
        };
        Self {
            state: initial,
            consecutive_failures,
            unreachable_after: unreachable_after.max(1),
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Fold one probe outcome in and return the resulting state.
    pub fn observe(&mut self, outcome: &ProbeOutcome) -> HealthState {
        self.state = match outcome {
            ProbeOutcome::Ok => {
                self.consecutive_failures = 0;
                HealthState::Healthy
            }
            ProbeOutcome::Unauthorized(_) => HealthState::Unauthorized,
            // A connectivity failure says nothing new about a rejected credential.
            ProbeOutcome::Failed(_) if self.state == HealthState::Unauthorized => {
                HealthState::Unauthorized
            }
            ProbeOutcome::Failed(_) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= self.unreachable_after {
                    HealthState::Unreachable
                } else {
                    HealthState::Degraded
                }
            }
        };
        self.state
    }
}
