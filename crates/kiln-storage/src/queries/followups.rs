// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crash-safe follow-up work queue.
//!
//! Rotation emits follow-up items that downstream notifiers consume with
//! `dequeue` / `complete` / `fail`. Items survive process crashes: a
//! consumer that dies mid-item leaves it `processing` with an expired lock,
//! and [`requeue_stale`] puts it back at startup.

use rusqlite::params;

use kiln_core::Result;

use crate::database::Database;
use crate::models::{followup_from_row, FollowupItem, FollowupStatus};

const FOLLOWUP_COLUMNS: &str =
    "id, status, priority, payload, attempts, max_attempts, locked_until, created_at, updated_at";

/// Enqueue a follow-up item. Lower `priority` values are served first.
/// Returns the auto-generated item id.
pub async fn enqueue(
    db: &Database,
    priority: i64,
    payload: &str,
    max_attempts: i64,
) -> Result<i64> {
    let payload = payload.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO followups (priority, payload, max_attempts) VALUES (?1, ?2, ?3)",
                params![priority, payload, max_attempts],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Dequeue the next pending item, best priority first, oldest within a
/// priority.
///
/// Atomically marks the item `processing` with a lock that expires after
/// `lock_seconds`. Returns `None` when nothing is pending.
pub async fn dequeue(db: &Database, lock_seconds: i64) -> Result<Option<FollowupItem>> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            let result = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {FOLLOWUP_COLUMNS} FROM followups
                     WHERE status = 'pending'
                     ORDER BY priority ASC, id ASC
                     LIMIT 1"
                ))?;
                stmt.query_row([], followup_from_row)
            };

            match result {
                Ok(item) => {
                    tx.execute(
                        "UPDATE followups SET status = 'processing',
                         locked_until = strftime('%Y-%m-%dT%H:%M:%fZ', 'now',
                                                 '+' || ?1 || ' seconds'),
                         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                         WHERE id = ?2",
                        params![lock_seconds, item.id],
                    )?;
                    tx.commit()?;

                    Ok(Some(FollowupItem {
                        status: FollowupStatus::Processing,
                        ..item
                    }))
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    tx.commit()?;
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Acknowledge successful processing of a follow-up item.
pub async fn complete(db: &Database, id: i64) -> Result<()> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE followups SET status = 'completed',
                 locked_until = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Mark a follow-up item as failed.
///
/// Increments attempts. At `max_attempts` the item lands in the terminal
/// `failed` status; otherwise it goes back to `pending` for retry with the
/// lock cleared.
pub async fn fail(db: &Database, id: i64) -> Result<()> {
    db.connection()
        .call(move |conn| {
            let (attempts, max_attempts): (i64, i64) = conn.query_row(
                "SELECT attempts, max_attempts FROM followups WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let new_attempts = attempts + 1;
            let status = if new_attempts >= max_attempts {
                "failed"
            } else {
                "pending"
            };
            conn.execute(
                "UPDATE followups SET status = ?1, attempts = ?2,
                 locked_until = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?3",
                params![status, new_attempts, id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Put items stuck in `processing` past their lock back to `pending`.
/// Run at startup so a crashed consumer's items are retried. Returns the
/// number of items requeued.
pub async fn requeue_stale(db: &Database) -> Result<u64> {
    db.connection()
        .call(|conn| {
            let changed = conn.execute(
                "UPDATE followups SET status = 'pending',
                 locked_until = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE status = 'processing'
                   AND locked_until IS NOT NULL
                   AND locked_until <= strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                [],
            )?;
            Ok(changed as u64)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Delete terminal items older than the cutoff. Pending and processing
/// items are never pruned regardless of age.
pub async fn prune(db: &Database, older_than: &str) -> Result<u64> {
    let older_than = older_than.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "DELETE FROM followups
                 WHERE status IN ('completed', 'failed') AND updated_at < ?1",
                params![older_than],
            )?;
            Ok(changed as u64)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Count items in one status.
pub async fn count(db: &Database, status: FollowupStatus) -> Result<i64> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM followups WHERE status = ?1",
                params![status.to_string()],
                |row| row.get(0),
            )
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
    async fn best_priority_dequeues_first() {
        let (db, _dir) = setup_db().await;

        let routine = enqueue(&db, 100, r#"{"k":"routine"}"#, 5).await.unwrap();
        let urgent = enqueue(&db, 10, r#"{"k":"urgent"}"#, 5).await.unwrap();
        assert!(routine < urgent, "insertion order sanity");

        let first = dequeue(&db, 300).await.unwrap().unwrap();
        assert_eq!(first.id, urgent);
        assert_eq!(first.status, FollowupStatus::Processing);
        assert_eq!(first.payload, r#"{"k":"urgent"}"#);

        let second = dequeue(&db, 300).await.unwrap().unwrap();
        assert_eq!(second.id, routine);

        assert!(dequeue(&db, 300).await.unwrap().is_none());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn complete_marks_completed() {
        let (db, _dir) = setup_db().await;

        let id = enqueue(&db, 100, "payload", 5).await.unwrap();
        let _item = dequeue(&db, 300).await.unwrap().unwrap();

        complete(&db, id).await.unwrap();

        let status: String = db
            .connection()
            .call(move |conn| -> rusqlite::Result<String> {
                conn.query_row(
                    "SELECT status FROM followups WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        assert_eq!(status, "completed");
        assert_eq!(count(&db, FollowupStatus::Completed).await.unwrap(), 1);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn fail_retries_until_max_attempts() {
        let (db, _dir) = setup_db().await;

        let id = enqueue(&db, 100, "payload", 2).await.unwrap();
        let _item = dequeue(&db, 300).await.unwrap().unwrap();

        // First fail: attempts = 1, back to pending.
        fail(&db, id).await.unwrap();
        let retry = dequeue(&db, 300).await.unwrap().unwrap();
        assert_eq!(retry.id, id);
        assert_eq!(retry.attempts, 1);

        // Second fail hits max_attempts = 2: terminal.
        fail(&db, id).await.unwrap();
        assert!(dequeue(&db, 300).await.unwrap().is_none());
        assert_eq!(count(&db, FollowupStatus::Failed).await.unwrap(), 1);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn stale_processing_items_are_requeued() {
        let (db, _dir) = setup_db().await;

        let id = enqueue(&db, 100, "payload", 5).await.unwrap();
        // Zero-second lock expires immediately.
        let _item = dequeue(&db, 0).await.unwrap().unwrap();
        assert!(dequeue(&db, 0).await.unwrap().is_none(), "item is locked away");

        assert_eq!(requeue_stale(&db).await.unwrap(), 1);
        assert_eq!(requeue_stale(&db).await.unwrap(), 0, "already back to pending");

        let again = dequeue(&db, 300).await.unwrap().unwrap();
        assert_eq!(again.id, id);
        assert_eq!(requeue_stale(&db).await.unwrap(), 0, "fresh lock is not stale");

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn prune_removes_only_old_terminal_items() {
        let (db, _dir) = setup_db().await;

        let done = enqueue(&db, 100, "done", 5).await.unwrap();
        let dead = enqueue(&db, 100, "dead", 1).await.unwrap();
        enqueue(&db, 100, "waiting", 5).await.unwrap();

        let _ = dequeue(&db, 300).await.unwrap().unwrap();
        complete(&db, done).await.unwrap();
        let _ = dequeue(&db, 300).await.unwrap().unwrap();
        fail(&db, dead).await.unwrap();

        // Cutoff far in the future: every terminal item qualifies.
        let removed = prune(&db, "9999-12-31T00:00:00.000Z").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(count(&db, FollowupStatus::Pending).await.unwrap(), 1);

        // A cutoff in the past removes nothing.
        assert_eq!(prune(&db, "2000-01-01T00:00:00.000Z").await.unwrap(), 0);

        db.close().await.unwrap();
    }
}
