//! Snapshot repository
//!
//! All snapshot / space-state / change-row SQL lives here. The two
//! multi-row writes (capture completion, change completion) are single
//! transactions so a failed task never leaves partial rows behind.

use super::types::{ChangeInsert, SnapshotRow, SpaceStateRow};
use crate::detector::SpaceObservation;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

const SNAPSHOT_COLUMNS: &str = r#"
    id, task_id, ip, channel, image_path, detected_image_path,
    change_count, change_status, change_error, detected_at, created_at
"#;

/// Snapshot repository for database operations
#[derive(Clone)]
pub struct SnapshotRepository {
    pool: MySqlPool,
}

impl SnapshotRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Persist a completed capture.
    ///
    /// One transaction: replace any prior snapshot for the task (rerun),
    /// insert the snapshot and its space states, and flip the task
    /// `playing -> screenshot_taken`. If the task is no longer `playing`
    /// the whole write rolls back with `Conflict`.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_capture(
        &self,
        task_id: u64,
        ip: &str,
        channel: &str,
        image_path: &str,
        detected_image_path: Option<&str>,
        observations: &[SpaceObservation],
        detected_at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        sqlx::query("DELETE FROM snapshots WHERE task_id = ?")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO snapshots (
                task_id, ip, channel, image_path, detected_image_path,
                change_count, change_status, detected_at, created_at
            ) VALUES (?, ?, ?, ?, ?, 0, 'pending', ?, ?)
            "#,
        )
        .bind(task_id)
        .bind(ip)
        .bind(channel)
        .bind(image_path)
        .bind(detected_image_path)
        .bind(detected_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let snapshot_id = result.last_insert_id();

        for obs in observations {
            sqlx::query(
                r#"
                INSERT INTO space_states (snapshot_id, space_id, space_name, occupied, confidence)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(snapshot_id)
            .bind(&obs.space_id)
            .bind(&obs.space_name)
            .bind(obs.occupied)
            .bind(obs.confidence)
            .execute(&mut *tx)
            .await?;
        }

        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'screenshot_taken', screenshot_path = ?, error = NULL,
                operation_time = NOW(3)
            WHERE id = ? AND status = 'playing'
            "#,
        )
        .bind(image_path)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::Conflict(format!(
                "task {} is not playing, capture discarded",
                task_id
            )));
        }

        tx.commit().await?;
        Ok(snapshot_id)
    }

    pub async fn get(&self, id: u64) -> Result<Option<SnapshotRow>> {
        let query = format!("SELECT {} FROM snapshots WHERE id = ?", SNAPSHOT_COLUMNS);
        Ok(sqlx::query_as::<_, SnapshotRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Snapshots still waiting for change inference, oldest first.
    ///
    /// `(detected_at, id)` ordering is the combo timeline order; ties on
    /// detected_at resolve to the larger id being later.
    pub async fn pending_change_batch(&self, limit: u32) -> Result<Vec<SnapshotRow>> {
        let query = format!(
            r#"
            SELECT {} FROM snapshots
            WHERE change_status = 'pending'
            ORDER BY detected_at, id
            LIMIT ?
            "#,
            SNAPSHOT_COLUMNS
        );
        Ok(sqlx::query_as::<_, SnapshotRow>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    /// The most recent completed snapshot of the same combo strictly before
    /// `(detected_at, id)`.
    pub async fn previous_done_snapshot(
        &self,
        ip: &str,
        channel: &str,
        detected_at: DateTime<Utc>,
        snapshot_id: u64,
    ) -> Result<Option<SnapshotRow>> {
        let query = format!(
            r#"
            SELECT {} FROM snapshots
            WHERE ip = ? AND channel = ? AND change_status = 'done'
              AND (detected_at < ? OR (detected_at = ? AND id < ?))
            ORDER BY detected_at DESC, id DESC
            LIMIT 1
            "#,
            SNAPSHOT_COLUMNS
        );
        Ok(sqlx::query_as::<_, SnapshotRow>(&query)
            .bind(ip)
            .bind(channel)
            .bind(detected_at)
            .bind(detected_at)
            .bind(snapshot_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn space_states_of(&self, snapshot_id: u64) -> Result<Vec<SpaceStateRow>> {
        Ok(sqlx::query_as::<_, SpaceStateRow>(
            r#"
            SELECT id, snapshot_id, space_id, space_name, occupied, confidence
            FROM space_states WHERE snapshot_id = ? ORDER BY id
            "#,
        )
        .bind(snapshot_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Commit the change inference for a snapshot in one transaction:
    /// N change rows, the denormalised change_count, and the done flag.
    pub async fn complete_change_write(
        &self,
        snapshot: &SnapshotRow,
        changes: &[ChangeInsert],
        change_count: i32,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        for change in changes {
            sqlx::query(
                r#"
                INSERT INTO parking_changes (
                    snapshot_id, prev_snapshot_id, ip, channel,
                    space_id, space_name, prev_occupied, curr_occupied,
                    change_type, detection_confidence, detected_at, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(snapshot.id)
            .bind(change.prev_snapshot_id)
            .bind(&snapshot.ip)
            .bind(&snapshot.channel)
            .bind(&change.space_id)
            .bind(&change.space_name)
            .bind(change.prev_occupied)
            .bind(change.curr_occupied)
            .bind(change.change_type)
            .bind(change.detection_confidence)
            .bind(snapshot.detected_at)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE snapshots
            SET change_count = ?, change_status = 'done', change_error = NULL
            WHERE id = ?
            "#,
        )
        .bind(change_count)
        .bind(snapshot.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Abandon a permanently failing change job; the snapshot stays
    /// queryable with change_count at its default 0.
    pub async fn mark_change_failed(&self, snapshot_id: u64, error: &str) -> Result<()> {
        let msg: String = error.chars().take(500).collect();
        sqlx::query(
            "UPDATE snapshots SET change_status = 'failed', change_error = ? WHERE id = ?",
        )
        .bind(msg)
        .bind(snapshot_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
