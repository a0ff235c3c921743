// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the [`MappingStore`] trait.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use hoprelay_core::{
    AdapterType, HealthStatus, HopMessageId, MappingId, MappingState, MappingStore,
    MessageMapping, PairId, PluginAdapter, RelayError, ReplyTarget, UpsertOutcome,
};

use crate::database::{Database, map_tr_err};
use crate::queries::mappings;

/// Mapping store backed by the shared [`Database`].
#[derive(Debug, Clone)]
pub struct SqliteMappingStore {
    db: Database,
}

impl SqliteMappingStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl PluginAdapter for SqliteMappingStore {
    fn name(&self) -> &str {
        "sqlite-mappings"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, RelayError> {
        self.db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), RelayError> {
        self.db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("mapping store: WAL checkpoint complete");
        Ok(())
    }
}

#[async_trait]
impl MappingStore for SqliteMappingStore {
    async fn upsert_on_new(
        &self,
        pair: PairId,
        source_msg_id: &str,
        reply_parent: Option<MappingId>,
    ) -> Result<UpsertOutcome, RelayError> {
        mappings::upsert_on_new(&self.db, pair, source_msg_id, reply_parent).await
    }

    async fn record_relay_sent(
        &self,
        id: MappingId,
        relay_msg_id: &HopMessageId,
    ) -> Result<(), RelayError> {
        mappings::record_relay_sent(&self.db, id, relay_msg_id).await
    }

    async fn record_destination_sent(
        &self,
        id: MappingId,
        destination_msg_id: &HopMessageId,
    ) -> Result<(), RelayError> {
        mappings::record_destination_sent(&self.db, id, destination_msg_id).await
    }

    async fn mark_edited(&self, id: MappingId) -> Result<bool, RelayError> {
        mappings::mark_edited(&self.db, id).await
    }

    async fn mark_deleted(&self, id: MappingId) -> Result<bool, RelayError> {
        mappings::mark_deleted(&self.db, id).await
    }

    async fn mark_failed(&self, id: MappingId, reason: &str) -> Result<(), RelayError> {
        mappings::mark_failed(&self.db, id, reason).await
    }

    async fn get(&self, id: MappingId) -> Result<Option<MessageMapping>, RelayError> {
        mappings::get_mapping(&self.db, id).await
    }

    async fn find_by_source(
        &self,
        pair: PairId,
        source_msg_id: &str,
    ) -> Result<Option<MessageMapping>, RelayError> {
        mappings::find_by_source(&self.db, pair, source_msg_id).await
    }

    async fn resolve_reply_target(
        &self,
        pair: PairId,
        source_reply_to: &str,
    ) -> Result<Option<ReplyTarget>, RelayError> {
        mappings::resolve_reply_target(&self.db, pair, source_reply_to).await
    }

    async fn sweep_retention(&self, horizon: Duration) -> Result<u64, RelayError> {
        let removed = mappings::sweep_retention(&self.db, horizon).await?;
        debug!(removed, horizon_secs = horizon.as_secs(), "retention sweep");
        Ok(removed)
    }

    async fn count_by_state(&self) -> Result<Vec<(MappingState, u64)>, RelayError> {
        mappings::count_by_state(&self.db).await
    }
}
