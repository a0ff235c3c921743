// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the hoprelay message relay.
//!
//! This crate provides the error taxonomy, the domain types shared by every
//! component, and the adapter traits behind which the platform clients,
//! probers, and persistence backend plug in.

pub mod error;
pub mod traits;
pub mod types;

pub use error::RelayError;
pub use types::{
    AdapterType, CredentialHandle, EventKind, ForwardingPair, GroupLiveness, HealthRecord,
    HealthState, HealthStatus, Hop, HopMessageId, HopOutcome, Identity, IdentityKind,
    MappingId, MappingState, MessageMapping, PairId, PairStatus, ProbeOutcome, ReplyTarget,
    SourceEvent, UpsertOutcome, WorkerGroup,
};

pub use traits::{
    HopAdapter, HopAdapterFactory, HopAdapters, IdentityProber, MappingStore, PluginAdapter,
};
