// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity rows: registration, lookup, health updates, removal.

use hoprelay_core::{HealthState, Identity, RelayError};
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, map_tr_err};
use crate::models::NewIdentity;
use crate::queries::parse_column;

const IDENTITY_COLUMNS: &str = "name, kind, max_pairs, priority, health_state, health_reason,
     last_verified, created_at";

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        name: row.get(0)?,
        kind: parse_column(row, 1)?,
        max_pairs: row.get(2)?,
        priority: row.get(3)?,
        health: parse_column(row, 4)?,
        health_reason: row.get(5)?,
        last_verified: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Insert an identity, or update kind, capacity, and priority of an
/// existing one. Health is left untouched on update.
pub async fn upsert_identity(db: &Database, identity: &NewIdentity) -> Result<Identity, RelayError> {
    let identity = identity.clone();
    db.connection()
        .call(move |conn| -> Result<Identity, rusqlite::Error> {
            conn.execute(
                "INSERT INTO identities (name, kind, max_pairs, priority)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                    kind = excluded.kind,
                    max_pairs = excluded.max_pairs,
                    priority = excluded.priority,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![
                    identity.name,
                    identity.kind.to_string(),
                    identity.max_pairs,
                    identity.priority
                ],
            )?;
            conn.query_row(
                &format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE name = ?1"),
                params![identity.name],
                identity_from_row,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_identity(db: &Database, name: &str) -> Result<Option<Identity>, RelayError> {
    let name = name.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<Identity>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE name = ?1"),
                params![name],
                identity_from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// All identities, highest priority first.
pub async fn list_identities(db: &Database) -> Result<Vec<Identity>, RelayError> {
    db.connection()
        .call(|conn| -> Result<Vec<Identity>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {IDENTITY_COLUMNS} FROM identities ORDER BY priority DESC, name ASC"
            ))?;
            let rows = stmt.query_map([], identity_from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Record a new health state. `verified` also stamps `last_verified`.
pub async fn update_identity_health(
    db: &Database,
    name: &str,
    state: HealthState,
    reason: Option<&str>,
    verified: bool,
) -> Result<(), RelayError> {
    let owned = name.to_string();
    let reason = reason.map(str::to_string);
    let changed = db
        .connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "UPDATE identities SET health_state = ?2, health_reason = ?3,
                    last_verified = CASE WHEN ?4 THEN strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                                         ELSE last_verified END,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE name = ?1",
                params![owned, state.to_string(), reason, verified],
            )
        })
        .await
        .map_err(map_tr_err)?;
    if changed == 0 {
        return Err(RelayError::UnknownIdentity(name.to_string()));
    }
    Ok(())
}

/// Remove an identity together with its (necessarily empty) groups and its
/// health history.
///
/// Fails with [`RelayError::IdentityInUse`] while any pair references it.
/// Returns whether a row was removed.
pub async fn delete_identity(db: &Database, name: &str) -> Result<bool, RelayError> {
    let owned = name.to_string();
    let outcome = db
        .connection()
        .call(move |conn| -> Result<Result<bool, u64>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let bound: i64 = tx.query_row(
                "SELECT COUNT(*) FROM forwarding_pairs
                 WHERE identity_name = ?1 OR destination_identity = ?1",
                params![owned],
                |row| row.get(0),
            )?;
            if bound > 0 {
                return Ok(Err(bound as u64));
            }
            tx.execute(
                "DELETE FROM worker_groups WHERE identity_name = ?1",
                params![owned],
            )?;
            let removed = tx.execute("DELETE FROM identities WHERE name = ?1", params![owned])?;
            tx.commit()?;
            Ok(Ok(removed > 0))
        })
        .await
        .map_err(map_tr_err)?;

    outcome.map_err(|pairs| RelayError::IdentityInUse {
        identity: name.to_string(),
        pairs,
    })
}
