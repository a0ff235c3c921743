// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Forwarding pair rows.

use hoprelay_core::{ForwardingPair, PairId, PairStatus, RelayError};
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, map_tr_err};
use crate::models::NewPair;
use crate::queries::parse_column;

const PAIR_COLUMNS: &str = "id, name, source_channel, relay_channel, destination_channel,
     identity_name, destination_identity, enabled, status, created_at";

fn pair_from_row(row: &Row<'_>) -> rusqlite::Result<ForwardingPair> {
    Ok(ForwardingPair {
        id: PairId(row.get(0)?),
        name: row.get(1)?,
        source_channel: row.get(2)?,
        relay_channel: row.get(3)?,
        destination_channel: row.get(4)?,
        identity: row.get(5)?,
        destination_identity: row.get(6)?,
        enabled: row.get(7)?,
        status: parse_column(row, 8)?,
        created_at: row.get(9)?,
    })
}

/// Insert a pair and return it with its assigned id.
///
/// The pair is stored `disabled` until the scheduler places it in a group.
pub async fn insert_pair(db: &Database, pair: &NewPair) -> Result<ForwardingPair, RelayError> {
    let pair = pair.clone();
    db.connection()
        .call(move |conn| -> Result<ForwardingPair, rusqlite::Error> {
            conn.execute(
                "INSERT INTO forwarding_pairs
                    (name, source_channel, relay_channel, destination_channel,
                     identity_name, destination_identity, enabled, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'disabled')",
                params![
                    pair.name,
                    pair.source_channel,
                    pair.relay_channel,
                    pair.destination_channel,
                    pair.identity,
                    pair.destination_identity,
                    pair.enabled
                ],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {PAIR_COLUMNS} FROM forwarding_pairs WHERE id = ?1"),
                params![id],
                pair_from_row,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_pair(db: &Database, id: PairId) -> Result<Option<ForwardingPair>, RelayError> {
    db.connection()
        .call(move |conn| -> Result<Option<ForwardingPair>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT {PAIR_COLUMNS} FROM forwarding_pairs WHERE id = ?1"),
                params![id.0],
                pair_from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_pair_by_name(
    db: &Database,
    name: &str,
) -> Result<Option<ForwardingPair>, RelayError> {
    let name = name.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<ForwardingPair>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT {PAIR_COLUMNS} FROM forwarding_pairs WHERE name = ?1"),
                params![name],
                pair_from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_pairs(db: &Database) -> Result<Vec<ForwardingPair>, RelayError> {
    db.connection()
        .call(|conn| -> Result<Vec<ForwardingPair>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PAIR_COLUMNS} FROM forwarding_pairs ORDER BY id ASC"
            ))?;
            let rows = stmt.query_map([], pair_from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Enabled pairs for which `identity` posts on the destination hop, either
/// as owner without a separate poster or as the declared poster.
pub async fn list_destination_bound(
    db: &Database,
    identity: &str,
) -> Result<Vec<ForwardingPair>, RelayError> {
    let identity = identity.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<ForwardingPair>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PAIR_COLUMNS} FROM forwarding_pairs
                 WHERE enabled = 1
                   AND (destination_identity = ?1
                        OR (destination_identity IS NULL AND identity_name = ?1))
                 ORDER BY id ASC"
            ))?;
            let rows = stmt.query_map(params![identity], pair_from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set_enabled(db: &Database, id: PairId, enabled: bool) -> Result<(), RelayError> {
    let changed = db
        .connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "UPDATE forwarding_pairs SET enabled = ?2,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id.0, enabled],
            )
        })
        .await
        .map_err(map_tr_err)?;
    if changed == 0 {
        return Err(RelayError::UnknownPair(id));
    }
    Ok(())
}

pub async fn set_status(db: &Database, id: PairId, status: PairStatus) -> Result<(), RelayError> {
    let changed = db
        .connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "UPDATE forwarding_pairs SET status = ?2,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id.0, status.to_string()],
            )
        })
        .await
        .map_err(map_tr_err)?;
    if changed == 0 {
        return Err(RelayError::UnknownPair(id));
    }
    Ok(())
}

/// Delete a pair. Its membership and mappings cascade. Returns whether a
/// row was removed.
pub async fn delete_pair(db: &Database, id: PairId) -> Result<bool, RelayError> {
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let removed = conn.execute("DELETE FROM forwarding_pairs WHERE id = ?1", params![id.0])?;
            Ok(removed > 0)
        })
        .await
        .map_err(map_tr_err)
}
