// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Last-run bookkeeping for maintenance jobs, so cadences survive restarts.

use rusqlite::params;

use kiln_core::Result;

use crate::database::Database;

/// When the named job last completed, if ever.
pub async fn last_run(db: &Database, job: &str) -> Result<Option<String>> {
    let job = job.to_string();
    db.connection()
        .call(move |conn| {
            match conn.query_row(
                "SELECT last_run_at FROM maintenance_runs WHERE job = ?1",
                params![job],
                |row| row.get(0),
            ) {
                Ok(at) => Ok(Some(at)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Record a completed run of the named job.
pub async fn stamp_run(db: &Database, job: &str, at: &str) -> Result<()> {
    let job = job.to_string();
    let at = at.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO maintenance_runs (job, last_run_at) VALUES (?1, ?2)
                 ON CONFLICT(job) DO UPDATE SET last_run_at = excluded.last_run_at",
                params![job, at],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap(), true).await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn stamp_and_read_back() {
        let (db, _dir) = setup_db().await;

        assert!(last_run(&db, "daily_reset").await.unwrap().is_none());

        stamp_run(&db, "daily_reset", "2026-08-23T00:00:01.000Z")
            .await
            .unwrap();
        assert_eq!(
            last_run(&db, "daily_reset").await.unwrap().as_deref(),
            Some("2026-08-23T00:00:01.000Z")
        );

        stamp_run(&db, "daily_reset", "2026-08-24T00:00:01.000Z")
            .await
            .unwrap();
        assert_eq!(
            last_run(&db, "daily_reset").await.unwrap().as_deref(),
            Some("2026-08-24T00:00:01.000Z")
        );

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn jobs_are_tracked_independently() {
        let (db, _dir) = setup_db().await;

        stamp_run(&db, "health_sweep", "2026-08-23T01:00:00.000Z")
            .await
            .unwrap();
        assert!(last_run(&db, "tier_sweep").await.unwrap().is_none());

        db.close().await.unwrap();
    }
}
