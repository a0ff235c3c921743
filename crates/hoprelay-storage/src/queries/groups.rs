// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Worker group and membership persistence.
//!
//! Membership is keyed by pair id, so moving a pair is a single row replace
//! inside one transaction: there is no committed state in which the pair
//! belongs to zero or two groups.

use std::collections::BTreeMap;

use hoprelay_core::{GroupLiveness, PairId, PairStatus, RelayError};
use rusqlite::{OptionalExtension, Transaction, params};

use crate::database::{Database, map_tr_err};
use crate::models::StoredGroup;
use crate::queries::parse_column;

/// Destination of a pair move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTarget {
    pub group_id: String,
    pub identity: String,
    pub capacity: u32,
    pub liveness: GroupLiveness,
}

/// Every group with its members, ordered by group id.
pub async fn load_groups(db: &Database) -> Result<Vec<StoredGroup>, RelayError> {
    db.connection()
        .call(|conn| -> Result<Vec<StoredGroup>, rusqlite::Error> {
            let mut groups: BTreeMap<String, StoredGroup> = BTreeMap::new();
            let mut stmt = conn.prepare(
                "SELECT id, identity_name, capacity, liveness FROM worker_groups ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(StoredGroup {
                    id: row.get(0)?,
                    identity: row.get(1)?,
                    capacity: row.get(2)?,
                    liveness: parse_column(row, 3)?,
                    members: Vec::new(),
                })
            })?;
            for group in rows {
                let group = group?;
                groups.insert(group.id.clone(), group);
            }

            let mut stmt =
                conn.prepare("SELECT group_id, pair_id FROM group_members ORDER BY pair_id")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, PairId(row.get(1)?)))
            })?;
            for member in rows {
                let (group_id, pair_id) = member?;
                if let Some(group) = groups.get_mut(&group_id) {
                    group.members.push(pair_id);
                }
            }
            Ok(groups.into_values().collect())
        })
        .await
        .map_err(map_tr_err)
}

/// Move `pair` into `target` (creating the group if needed), rebind the pair
/// to the target identity, and set its status.
///
/// Returns the id of the previous group if the move left it empty and it was
/// deleted.
pub async fn move_pair(
    db: &Database,
    pair: PairId,
    target: &GroupTarget,
    status: PairStatus,
) -> Result<Option<String>, RelayError> {
    let target = target.clone();
    let outcome = db
        .connection()
        .call(move |conn| -> Result<Option<Option<String>>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM forwarding_pairs WHERE id = ?1",
                    params![pair.0],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }

            let previous: Option<String> = tx
                .query_row(
                    "SELECT group_id FROM group_members WHERE pair_id = ?1",
                    params![pair.0],
                    |row| row.get(0),
                )
                .optional()?;

            tx.execute(
                "INSERT OR IGNORE INTO worker_groups (id, identity_name, capacity, liveness)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    target.group_id,
                    target.identity,
                    target.capacity,
                    target.liveness.to_string()
                ],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO group_members (pair_id, group_id) VALUES (?1, ?2)",
                params![pair.0, target.group_id],
            )?;
            tx.execute(
                "UPDATE forwarding_pairs SET identity_name = ?2, status = ?3,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![pair.0, target.identity, status.to_string()],
            )?;

            let removed = match previous {
                Some(old) if old != target.group_id => drop_if_empty(&tx, &old)?,
                _ => None,
            };
            tx.commit()?;
            Ok(Some(removed))
        })
        .await
        .map_err(map_tr_err)?;

    outcome.ok_or(RelayError::UnknownPair(pair))
}

/// Drop a pair's membership. Returns the group id if that group became
/// empty and was deleted.
pub async fn remove_membership(db: &Database, pair: PairId) -> Result<Option<String>, RelayError> {
    db.connection()
        .call(move |conn| -> Result<Option<String>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let previous: Option<String> = tx
                .query_row(
                    "SELECT group_id FROM group_members WHERE pair_id = ?1",
                    params![pair.0],
                    |row| row.get(0),
                )
                .optional()?;
            tx.execute(
                "DELETE FROM group_members WHERE pair_id = ?1",
                params![pair.0],
            )?;
            let removed = match previous {
                Some(old) => drop_if_empty(&tx, &old)?,
                None => None,
            };
            tx.commit()?;
            Ok(removed)
        })
        .await
        .map_err(map_tr_err)
}

fn drop_if_empty(tx: &Transaction<'_>, group_id: &str) -> rusqlite::Result<Option<String>> {
    let remaining: i64 = tx.query_row(
        "SELECT COUNT(*) FROM group_members WHERE group_id = ?1",
        params![group_id],
        |row| row.get(0),
    )?;
    if remaining > 0 {
        return Ok(None);
    }
    tx.execute("DELETE FROM worker_groups WHERE id = ?1", params![group_id])?;
    Ok(Some(group_id.to_string()))
}

/// Set liveness on every group of an identity.
pub async fn set_identity_liveness(
    db: &Database,
    identity: &str,
    liveness: GroupLiveness,
) -> Result<(), RelayError> {
    let identity = identity.to_string();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "UPDATE worker_groups SET liveness = ?2 WHERE identity_name = ?1",
                params![identity, liveness.to_string()],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Set the same status on several pairs in one transaction.
pub async fn set_pairs_status(
    db: &Database,
    pairs: &[PairId],
    status: PairStatus,
) -> Result<(), RelayError> {
    let ids: Vec<i64> = pairs.iter().map(|p| p.0).collect();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "UPDATE forwarding_pairs SET status = ?2,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?1",
                )?;
                for id in &ids {
                    stmt.execute(params![id, status.to_string()])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
