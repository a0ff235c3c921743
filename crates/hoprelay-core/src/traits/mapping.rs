// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable cross-hop message correlation.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RelayError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    HopMessageId, MappingId, MappingState, MessageMapping, PairId, ReplyTarget, UpsertOutcome,
};

/// Correlation table between the source, relay, and destination ids of each
/// message of each pair.
///
/// Forward transitions are strict: recording a destination id before the relay
/// id, or recording either on a delivered or deleted row, fails with
/// [`RelayError::InvariantViolation`] and leaves the row untouched.
#[async_trait]
pub trait MappingStore: PluginAdapter {
    /// Create a pending row for `(pair, source_msg_id)`, or return the live one.
    ///
    /// Atomic with respect to concurrent callers: at most one non-deleted row
    /// per key ever exists.
    async fn upsert_on_new(
        &self,
        pair: PairId,
        source_msg_id: &str,
        reply_parent: Option<MappingId>,
    ) -> Result<UpsertOutcome, RelayError>;

    /// `pending` (or `failed` without a relay id) -> `relayed`.
    async fn record_relay_sent(
        &self,
        id: MappingId,
        relay_msg_id: &HopMessageId,
    ) -> Result<(), RelayError>;

    /// `relayed` (or `failed` with a relay id) -> `delivered`.
    async fn record_destination_sent(
        &self,
        id: MappingId,
        destination_msg_id: &HopMessageId,
    ) -> Result<(), RelayError>;

    /// Mark as edited. No-op on deleted rows; returns whether the row changed.
    async fn mark_edited(&self, id: MappingId) -> Result<bool, RelayError>;

    /// Mark as deleted. Idempotent; returns whether the row changed.
    async fn mark_deleted(&self, id: MappingId) -> Result<bool, RelayError>;

    /// Record that the initial relay exhausted its retries.
    async fn mark_failed(&self, id: MappingId, reason: &str) -> Result<(), RelayError>;

    async fn get(&self, id: MappingId) -> Result<Option<MessageMapping>, RelayError>;

    /// The most recent row for a source message, deleted or not.
    async fn find_by_source(
        &self,
        pair: PairId,
        source_msg_id: &str,
    ) -> Result<Option<MessageMapping>, RelayError>;

    /// Translate a source reply link into relay/destination ids.
    ///
    /// Returns `None` when the parent never reached the destination.
    async fn resolve_reply_target(
        &self,
        pair: PairId,
        source_reply_to: &str,
    ) -> Result<Option<ReplyTarget>, RelayError>;

    /// Purge delivered, edited, and deleted rows untouched for `horizon`.
    async fn sweep_retention(&self, horizon: Duration) -> Result<u64, RelayError>;

    /// Row counts per state, for status reporting.
    async fn count_by_state(&self) -> Result<Vec<(MappingState, u64)>, RelayError>;
}
