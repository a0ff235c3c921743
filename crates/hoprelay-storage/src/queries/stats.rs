// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Aggregate counts for status reporting.

use hoprelay_core::RelayError;
use rusqlite::Connection;

use crate::database::{Database, map_tr_err};
use crate::models::SystemStats;

fn grouped(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<(String, u64)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
    })?;
    rows.collect()
}

pub async fn system_stats(db: &Database) -> Result<SystemStats, RelayError> {
    db.connection()
        .call(|conn| -> Result<SystemStats, rusqlite::Error> {
            let disabled: i64 = conn.query_row(
                "SELECT COUNT(*) FROM forwarding_pairs WHERE enabled = 0",
                [],
                |row| row.get(0),
            )?;
            Ok(SystemStats {
                identities_by_health: grouped(
                    conn,
                    "SELECT health_state, COUNT(*) FROM identities GROUP BY health_state ORDER BY 1",
                )?,
                pairs_by_status: grouped(
                    conn,
                    "SELECT status, COUNT(*) FROM forwarding_pairs GROUP BY status ORDER BY 1",
                )?,
                disabled_pairs: disabled as u64,
                groups_by_liveness: grouped(
                    conn,
                    "SELECT liveness, COUNT(*) FROM worker_groups GROUP BY liveness ORDER BY 1",
                )?,
                mappings_by_state: grouped(
                    conn,
                    "SELECT state, COUNT(*) FROM message_mappings GROUP BY state ORDER BY 1",
                )?,
            })
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoprelay_core::PairStatus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn empty_database_has_no_counts() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        let stats = system_stats(&db).await.unwrap();
        assert_eq!(stats, SystemStats::default());
        assert_eq!(stats.pair_count(PairStatus::Active), 0);
    }
}
