// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! Every write goes through the single background thread owned by the
//! `tokio_rusqlite::Connection`. Clones of [`Database`] share that thread,
//! which is what serializes mapping upserts and group moves.

use std::path::Path;

use hoprelay_config::model::StorageConfig;
use hoprelay_core::RelayError;
use tracing::{debug, info};

use crate::migrations;

/// Handle to the hoprelay SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
    path: String,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

impl Database {
    /// Open (creating if needed) the database at `path` in WAL mode and run
    /// pending migrations.
    pub async fn open(path: &str) -> Result<Self, RelayError> {
        Self::open_with(path, true).await
    }

    /// Open the database described by the `[storage]` config section.
    pub async fn open_with_config(config: &StorageConfig) -> Result<Self, RelayError> {
        Self::open_with(&config.database_path, config.wal_mode).await
    }

    async fn open_with(path: &str, wal_mode: bool) -> Result<Self, RelayError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| RelayError::Storage {
                source: Box::new(e),
            })?;
        }

        // Journal mode and migrations run once on a plain connection before
        // the async handle is created.
        let schema_path = path.to_string();
        tokio::task::spawn_blocking(move || prepare_schema(&schema_path, wal_mode))
            .await
            .map_err(|e| RelayError::Internal(format!("schema setup task failed: {e}")))??;

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| RelayError::Storage {
                source: Box::new(e),
            })?;
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch(
                "PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA synchronous = NORMAL;",
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        info!(path, wal_mode, "database opened");
        Ok(Self {
            conn,
            path: path.to_string(),
        })
    }

    /// The shared async connection. Query modules call through this.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Checkpoint the WAL and close the background connection.
    ///
    /// Other clones of this handle fail with a storage error afterwards.
    pub async fn close(self) -> Result<(), RelayError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        self.conn.close().await.map_err(|e| RelayError::Storage {
            source: Box::new(e),
        })?;
        debug!(path = %self.path, "database closed");
        Ok(())
    }
}

fn prepare_schema(path: &str, wal_mode: bool) -> Result<(), RelayError> {
    let mut conn = rusqlite::Connection::open(path).map_err(|e| RelayError::Storage {
        source: Box::new(e),
    })?;
    let journal = if wal_mode { "WAL" } else { "DELETE" };
    conn.pragma_update(None, "journal_mode", journal)
        .map_err(|e| RelayError::Storage {
            source: Box::new(e),
        })?;
    migrations::run_migrations(&mut conn)
}

/// Map a `tokio_rusqlite` call error into [`RelayError::Storage`].
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> RelayError {
    RelayError::Storage {
        source: Box::new(e),
    }
}
