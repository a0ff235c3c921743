// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions.
//!
//! Every adapter extends the [`PluginAdapter`] base trait and uses
//! `#[async_trait]` so it can be held as a trait object.

pub mod adapter;
pub mod hop;
pub mod mapping;
pub mod prober;

pub use adapter::PluginAdapter;
pub use hop::{HopAdapter, HopAdapterFactory, HopAdapters};
pub use mapping::MappingStore;
pub use prober::IdentityProber;
