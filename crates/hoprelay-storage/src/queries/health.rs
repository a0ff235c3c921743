// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rolling health samples per identity.

use hoprelay_core::{HealthRecord, HealthState, RelayError};
use rusqlite::params;

use crate::database::{Database, map_tr_err};
use crate::queries::parse_column;

/// Append a sample and prune the identity's history to the newest `keep`.
pub async fn record_health(
    db: &Database,
    identity: &str,
    state: HealthState,
    reason: Option<&str>,
    keep: usize,
) -> Result<(), RelayError> {
    let identity = identity.to_string();
    let reason = reason.map(str::to_string);
    let keep = keep.max(1) as i64;
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO health_records (identity_name, state, reason) VALUES (?1, ?2, ?3)",
                params![identity, state.to_string(), reason],
            )?;
            tx.execute(
                "DELETE FROM health_records
                 WHERE identity_name = ?1
                   AND id NOT IN (SELECT id FROM health_records WHERE identity_name = ?1
                                  ORDER BY id DESC LIMIT ?2)",
                params![identity, keep],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Newest samples first.
pub async fn recent_health(
    db: &Database,
    identity: &str,
    limit: usize,
) -> Result<Vec<HealthRecord>, RelayError> {
    let identity = identity.to_string();
    let limit = limit as i64;
    db.connection()
        .call(move |conn| -> Result<Vec<HealthRecord>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT identity_name, state, reason, checked_at FROM health_records
                 WHERE identity_name = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![identity, limit], |row| {
                Ok(HealthRecord {
                    identity: row.get(0)?,
                    state: parse_column(row, 1)?,
                    reason: row.get(2)?,
                    checked_at: row.get(3)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
