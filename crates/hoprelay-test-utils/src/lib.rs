// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for hoprelay integration tests.
//!
//! - [`MockHop`]: scripted hop client with call capture and fault injection
//! - [`MockProber`]: scripted identity prober
//! - [`MockFactory`]: hands out one `MockHop` pair per forwarding pair
//! - [`TestHarness`]: temp database, unlocked vault, identities, and pairs

pub mod harness;
pub mod mock_factory;
pub mod mock_hop;
pub mod mock_prober;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_factory::{Build, MockFactory};
pub use mock_hop::{Fault, HopCall, MockHop};
pub use mock_prober::MockProber;
