// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message mapping rows and their state transitions.
//!
//! Every transition reads the current row and checks it inside the same
//! connection call, so a rejected transition leaves the row untouched.
//! Rejections surface as [`RelayError::InvariantViolation`].

use std::time::Duration;

use hoprelay_core::{
    HopMessageId, MappingId, MappingState, MessageMapping, PairId, RelayError, ReplyTarget,
    UpsertOutcome,
};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use crate::database::{Database, map_tr_err};
use crate::queries::parse_column;

const MAPPING_COLUMNS: &str = "id, pair_id, source_msg_id, relay_msg_id, destination_msg_id,
     reply_parent_id, state, failure_reason, created_at, updated_at";

fn mapping_from_row(row: &Row<'_>) -> rusqlite::Result<MessageMapping> {
    Ok(MessageMapping {
        id: MappingId(row.get(0)?),
        pair_id: PairId(row.get(1)?),
        source_msg_id: row.get(2)?,
        relay_msg_id: row.get::<_, Option<String>>(3)?.map(HopMessageId),
        destination_msg_id: row.get::<_, Option<String>>(4)?.map(HopMessageId),
        reply_parent: row.get::<_, Option<i64>>(5)?.map(MappingId),
        state: parse_column(row, 6)?,
        failure_reason: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn select_by_id(conn: &Connection, id: MappingId) -> rusqlite::Result<Option<MessageMapping>> {
    conn.query_row(
        &format!("SELECT {MAPPING_COLUMNS} FROM message_mappings WHERE id = ?1"),
        params![id.0],
        mapping_from_row,
    )
    .optional()
}

fn select_latest(
    conn: &Connection,
    pair: PairId,
    source_msg_id: &str,
) -> rusqlite::Result<Option<MessageMapping>> {
    conn.query_row(
        &format!(
            "SELECT {MAPPING_COLUMNS} FROM message_mappings
             WHERE pair_id = ?1 AND source_msg_id = ?2
             ORDER BY id DESC LIMIT 1"
        ),
        params![pair.0, source_msg_id],
        mapping_from_row,
    )
    .optional()
}

fn missing(id: MappingId) -> String {
    format!("mapping {id} does not exist")
}

/// Outcome of a checked transition: the inner `Err` is a rejected
/// transition, the outer one a database failure.
type Checked<T> = Result<Result<T, String>, rusqlite::Error>;

async fn checked<T, F>(db: &Database, f: F) -> Result<T, RelayError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Checked<T> + Send + 'static,
{
    db.connection()
        .call(f)
        .await
        .map_err(map_tr_err)?
        .map_err(RelayError::InvariantViolation)
}

/// Return the most recent row for `(pair, source_msg_id)`, or insert a
/// pending one.
///
/// The read and the insert share one immediate transaction, and the partial
/// unique index rejects a second live row even from another connection.
pub async fn upsert_on_new(
    db: &Database,
    pair: PairId,
    source_msg_id: &str,
    reply_parent: Option<MappingId>,
) -> Result<UpsertOutcome, RelayError> {
    let source_msg_id = source_msg_id.to_string();
    db.connection()
        .call(move |conn| -> Result<UpsertOutcome, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if let Some(mapping) = select_latest(&tx, pair, &source_msg_id)? {
                tx.commit()?;
                return Ok(UpsertOutcome {
                    mapping,
                    inserted: false,
                });
            }
            tx.execute(
                "INSERT INTO message_mappings (pair_id, source_msg_id, reply_parent_id)
                 VALUES (?1, ?2, ?3)",
                params![pair.0, source_msg_id, reply_parent.map(|p| p.0)],
            )?;
            let id = MappingId(tx.last_insert_rowid());
            let mapping = select_by_id(&tx, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(UpsertOutcome {
                mapping,
                inserted: true,
            })
        })
        .await
        .map_err(map_tr_err)
}

/// `pending`, or `failed` before the relay hop succeeded, to `relayed`.
pub async fn record_relay_sent(
    db: &Database,
    id: MappingId,
    relay_msg_id: &HopMessageId,
) -> Result<(), RelayError> {
    let relay_msg_id = relay_msg_id.0.clone();
    checked(db, move |conn| -> Checked<()> {
        let Some(current) = select_by_id(conn, id)? else {
            return Ok(Err(missing(id)));
        };
        let allowed = match current.state {
            MappingState::Pending => true,
            MappingState::Failed => current.relay_msg_id.is_none(),
            _ => false,
        };
        if !allowed {
            return Ok(Err(format!(
                "cannot record relay message `{relay_msg_id}` on mapping {id} in state {}",
                current.state
            )));
        }
        conn.execute(
            "UPDATE message_mappings SET relay_msg_id = ?2, state = 'relayed',
                failure_reason = NULL,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id = ?1",
            params![id.0, relay_msg_id],
        )?;
        Ok(Ok(()))
    })
    .await
}

/// `relayed`, or `failed` after the relay hop succeeded, to `delivered`.
pub async fn record_destination_sent(
    db: &Database,
    id: MappingId,
    destination_msg_id: &HopMessageId,
) -> Result<(), RelayError> {
    let destination_msg_id = destination_msg_id.0.clone();
    checked(db, move |conn| -> Checked<()> {
        let Some(current) = select_by_id(conn, id)? else {
            return Ok(Err(missing(id)));
        };
        if current.relay_msg_id.is_none() {
            return Ok(Err(format!(
                "destination message `{destination_msg_id}` recorded before relay on mapping {id}"
            )));
        }
        if !matches!(current.state, MappingState::Relayed | MappingState::Failed) {
            return Ok(Err(format!(
                "cannot record destination message `{destination_msg_id}` on mapping {id} in state {}",
                current.state
            )));
        }
        conn.execute(
            "UPDATE message_mappings SET destination_msg_id = ?2, state = 'delivered',
                failure_reason = NULL,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id = ?1",
            params![id.0, destination_msg_id],
        )?;
        Ok(Ok(()))
    })
    .await
}

/// Record a source edit. Delivered rows become `edited`; rows still in
/// flight keep their state and only get `edited_at`. Deleted rows are left
/// alone and `false` is returned.
pub async fn mark_edited(db: &Database, id: MappingId) -> Result<bool, RelayError> {
    checked(db, move |conn| -> Checked<bool> {
        let Some(current) = select_by_id(conn, id)? else {
            return Ok(Err(missing(id)));
        };
        if current.state == MappingState::Deleted {
            return Ok(Ok(false));
        }
        conn.execute(
            "UPDATE message_mappings SET
                state = CASE WHEN state IN ('delivered', 'edited') THEN 'edited' ELSE state END,
                edited_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id = ?1",
            params![id.0],
        )?;
        Ok(Ok(true))
    })
    .await
}

/// Mark deleted from any state. Returns `false` if it already was.
pub async fn mark_deleted(db: &Database, id: MappingId) -> Result<bool, RelayError> {
    checked(db, move |conn| -> Checked<bool> {
        let changed = conn.execute(
            "UPDATE message_mappings SET state = 'deleted',
                deleted_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id = ?1 AND state != 'deleted'",
            params![id.0],
        )?;
        if changed > 0 {
            return Ok(Ok(true));
        }
        match select_by_id(conn, id)? {
            Some(_) => Ok(Ok(false)),
            None => Ok(Err(missing(id))),
        }
    })
    .await
}

/// Record that the initial relay gave up. Only valid before delivery.
pub async fn mark_failed(db: &Database, id: MappingId, reason: &str) -> Result<(), RelayError> {
    let reason = reason.to_string();
    checked(db, move |conn| -> Checked<()> {
        let Some(current) = select_by_id(conn, id)? else {
            return Ok(Err(missing(id)));
        };
        if !matches!(
            current.state,
            MappingState::Pending | MappingState::Relayed | MappingState::Failed
        ) {
            return Ok(Err(format!(
                "cannot mark mapping {id} failed in state {}",
                current.state
            )));
        }
        conn.execute(
            "UPDATE message_mappings SET state = 'failed', failure_reason = ?2,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id = ?1",
            params![id.0, reason],
        )?;
        Ok(Ok(()))
    })
    .await
}

pub async fn get_mapping(db: &Database, id: MappingId) -> Result<Option<MessageMapping>, RelayError> {
    db.connection()
        .call(move |conn| select_by_id(conn, id))
        .await
        .map_err(map_tr_err)
}

pub async fn find_by_source(
    db: &Database,
    pair: PairId,
    source_msg_id: &str,
) -> Result<Option<MessageMapping>, RelayError> {
    let source_msg_id = source_msg_id.to_string();
    db.connection()
        .call(move |conn| select_latest(conn, pair, &source_msg_id))
        .await
        .map_err(map_tr_err)
}

/// Relay and destination ids of a delivered parent message.
pub async fn resolve_reply_target(
    db: &Database,
    pair: PairId,
    source_reply_to: &str,
) -> Result<Option<ReplyTarget>, RelayError> {
    let source_reply_to = source_reply_to.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<ReplyTarget>, rusqlite::Error> {
            conn.query_row(
                "SELECT id, relay_msg_id, destination_msg_id FROM message_mappings
                 WHERE pair_id = ?1 AND source_msg_id = ?2
                   AND state IN ('delivered', 'edited')
                   AND relay_msg_id IS NOT NULL
                 ORDER BY id DESC LIMIT 1",
                params![pair.0, source_reply_to],
                |row| {
                    Ok(ReplyTarget {
                        parent: MappingId(row.get(0)?),
                        relay_msg_id: HopMessageId(row.get(1)?),
                        destination_msg_id: row.get::<_, Option<String>>(2)?.map(HopMessageId),
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Delete delivered, edited, and deleted rows not updated within `horizon`.
pub async fn sweep_retention(db: &Database, horizon: Duration) -> Result<u64, RelayError> {
    let modifier = format!("-{} seconds", horizon.as_secs());
    db.connection()
        .call(move |conn| -> Result<u64, rusqlite::Error> {
            let removed = conn.execute(
                "DELETE FROM message_mappings
                 WHERE state IN ('delivered', 'edited', 'deleted')
                   AND updated_at < strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ?1)",
                params![modifier],
            )?;
            Ok(removed as u64)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn count_by_state(db: &Database) -> Result<Vec<(MappingState, u64)>, RelayError> {
    db.connection()
        .call(|conn| -> Result<Vec<(MappingState, u64)>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT state, COUNT(*) FROM message_mappings GROUP BY state ORDER BY state",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((parse_column(row, 0)?, row.get::<_, i64>(1)? as u64))
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
