//! Task repository
//!
//! Row-level access for tasks and task configs. Status transitions are
//! conditional updates so multiple executor instances can coexist; the
//! planner's inserts ride on the `(date, segment_index, rtsp_url)` unique
//! key with insert-or-ignore semantics.

use super::types::{TaskConfigRow, TaskRow};
use crate::models::TaskStatus;
use crate::error::Result;
use sqlx::MySqlPool;

const TASK_COLUMNS: &str = r#"
    id, date, segment_index, start_ts, end_ts, rtsp_url, ip, channel,
    status, screenshot_path, error, retry_count, next_retry_at, operation_time
"#;

/// Task repository for database operations
#[derive(Clone)]
pub struct TaskRepository {
    pool: MySqlPool,
}

impl TaskRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    // ========================================
    // Planner writes
    // ========================================

    /// Insert one planned window; returns true when the row is new.
    /// An existing `(date, segment_index, rtsp_url)` row is left untouched.
    pub async fn insert_ignore_task(
        &self,
        date: &str,
        segment_index: i32,
        start_ts: i64,
        end_ts: i64,
        rtsp_url: &str,
        ip: &str,
        channel: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT IGNORE INTO tasks (
                date, segment_index, start_ts, end_ts, rtsp_url, ip, channel,
                status, operation_time
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', NOW(3))
            "#,
        )
        .bind(date)
        .bind(segment_index)
        .bind(start_ts)
        .bind(end_ts)
        .bind(rtsp_url)
        .bind(ip)
        .bind(channel)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Upsert the per-day plan row; existing rows only refresh
    /// `operation_time` and `task_count`.
    pub async fn upsert_task_config(
        &self,
        date: &str,
        rtsp_base: &str,
        ip: &str,
        channel: &str,
        interval_minutes: i32,
        day_start_ts: i64,
        day_end_ts: i64,
        task_count: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_configs (
                date, rtsp_base, ip, channel, interval_minutes,
                day_start_ts, day_end_ts, task_count, operation_time
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, NOW(3))
            ON DUPLICATE KEY UPDATE
                task_count = VALUES(task_count),
                operation_time = VALUES(operation_time)
            "#,
        )
        .bind(date)
        .bind(rtsp_base)
        .bind(ip)
        .bind(channel)
        .bind(interval_minutes)
        .bind(day_start_ts)
        .bind(day_end_ts)
        .bind(task_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================
    // Reads
    // ========================================

    pub async fn get_task(&self, id: u64) -> Result<Option<TaskRow>> {
        let query = format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS);
        Ok(sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Tasks for a (date, base, channel) combo in one of the given states.
    pub async fn tasks_in_states(
        &self,
        date: &str,
        ip: Option<&str>,
        channel: Option<&str>,
        states: &[TaskStatus],
    ) -> Result<Vec<TaskRow>> {
        let placeholders = vec!["?"; states.len().max(1)].join(", ");
        let mut query = format!(
            "SELECT {} FROM tasks WHERE date = ? AND status IN ({})",
            TASK_COLUMNS, placeholders
        );
        if ip.is_some() {
            query.push_str(" AND ip = ?");
        }
        if channel.is_some() {
            query.push_str(" AND channel = ?");
        }
        query.push_str(" ORDER BY segment_index");

        let mut q = sqlx::query_as::<_, TaskRow>(&query).bind(date);
        if states.is_empty() {
            q = q.bind("pending");
        } else {
            for s in states {
                q = q.bind(s.as_str());
            }
        }
        if let Some(ip) = ip {
            q = q.bind(ip);
        }
        if let Some(channel) = channel {
            q = q.bind(channel);
        }
        Ok(q.fetch_all(&self.pool).await?)
    }

    /// All tasks of a (date, ip, channel) combo, any state, in segment order.
    pub async fn tasks_for_combo(
        &self,
        date: &str,
        ip: &str,
        channel: &str,
    ) -> Result<Vec<TaskRow>> {
        let query = format!(
            "SELECT {} FROM tasks WHERE date = ? AND ip = ? AND channel = ? ORDER BY segment_index",
            TASK_COLUMNS
        );
        Ok(sqlx::query_as::<_, TaskRow>(&query)
            .bind(date)
            .bind(ip)
            .bind(channel)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Distinct (date, ip, channel) combos that still hold runnable work.
    pub async fn combos_with_pending(&self) -> Result<Vec<(String, String, String)>> {
        let rows: Vec<(String, Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT DISTINCT date, ip, channel FROM tasks
            WHERE status = 'pending'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(date, ip, channel)| Some((date, ip?, channel?)))
            .collect())
    }

    pub async fn available_dates(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT date FROM tasks ORDER BY date DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(d,)| d).collect())
    }

    pub async fn available_ips(&self) -> Result<Vec<String>> {
        let rows: Vec<(Option<String>,)> =
            sqlx::query_as("SELECT DISTINCT ip FROM tasks ORDER BY ip")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().filter_map(|(ip,)| ip).collect())
    }

    pub async fn available_channels(&self) -> Result<Vec<String>> {
        let rows: Vec<(Option<String>,)> =
            sqlx::query_as("SELECT DISTINCT channel FROM tasks ORDER BY channel")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().filter_map(|(c,)| c).collect())
    }

    // ========================================
    // Status transitions (single-writer via conditional updates)
    // ========================================

    /// `pending|failed|screenshot_taken -> playing`.
    /// Returns false when another worker owns the task.
    pub async fn claim_for_run(&self, id: u64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'playing', error = NULL, operation_time = NOW(3)
            WHERE id = ? AND status IN ('pending', 'failed', 'screenshot_taken')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `playing -> failed`, recording the error and arming the hourly
    /// retry sweep while attempts remain.
    pub async fn mark_failed(&self, id: u64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed',
                error = ?,
                retry_count = retry_count + 1,
                next_retry_at = CASE WHEN retry_count + 1 < 3
                                     THEN DATE_ADD(NOW(3), INTERVAL 1 HOUR)
                                     ELSE NULL END,
                operation_time = NOW(3)
            WHERE id = ? AND status = 'playing'
            "#,
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Re-arm terminal tasks to pending. `playing` rows are never touched.
    pub async fn reset_to_pending(
        &self,
        date: Option<&str>,
        ip: Option<&str>,
        channel: Option<&str>,
        task_id: Option<u64>,
    ) -> Result<Vec<u64>> {
        let mut query = String::from(
            "SELECT id FROM tasks WHERE status IN ('pending', 'failed', 'screenshot_taken')",
        );
        if task_id.is_some() {
            query.push_str(" AND id = ?");
        }
        if date.is_some() {
            query.push_str(" AND date = ?");
        }
        if ip.is_some() {
            query.push_str(" AND ip = ?");
        }
        if channel.is_some() {
            query.push_str(" AND channel = ?");
        }

        let mut q = sqlx::query_as::<_, (u64,)>(&query);
        if let Some(task_id) = task_id {
            q = q.bind(task_id);
        }
        if let Some(date) = date {
            q = q.bind(date);
        }
        if let Some(ip) = ip {
            q = q.bind(ip);
        }
        if let Some(channel) = channel {
            q = q.bind(channel);
        }
        let ids: Vec<u64> = q.fetch_all(&self.pool).await?.into_iter().map(|(id,)| id).collect();

        for id in &ids {
            sqlx::query(
                r#"
                UPDATE tasks
                SET status = 'pending', error = NULL, retry_count = 0,
                    next_retry_at = NULL, operation_time = NOW(3)
                WHERE id = ? AND status != 'playing'
                "#,
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
        }
        Ok(ids)
    }

    // ========================================
    // Background sweeps
    // ========================================

    /// Sweep tasks stuck in `playing` past 6x their window plus a minute
    /// (executor died or was abandoned at shutdown) back to `failed`.
    pub async fn sweep_stalled_playing(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed', error = 'stalled', operation_time = NOW(3)
            WHERE status = 'playing'
              AND TIMESTAMPDIFF(SECOND, operation_time, NOW(3)) > 6 * (end_ts - start_ts) + 60
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Failed tasks whose hourly retry window has opened.
    pub async fn failed_tasks_due_for_retry(&self) -> Result<Vec<u64>> {
        let rows: Vec<(u64,)> = sqlx::query_as(
            r#"
            SELECT id FROM tasks
            WHERE status = 'failed'
              AND retry_count < 3
              AND (next_retry_at IS NULL OR next_retry_at <= NOW(3))
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    // ========================================
    // Task configs
    // ========================================

    pub async fn get_task_config(
        &self,
        date: &str,
        rtsp_base: &str,
        channel: &str,
        interval_minutes: i32,
    ) -> Result<Option<TaskConfigRow>> {
        Ok(sqlx::query_as::<_, TaskConfigRow>(
            r#"
            SELECT id, date, rtsp_base, ip, channel, interval_minutes,
                   day_start_ts, day_end_ts, task_count, operation_time
            FROM task_configs
            WHERE date = ? AND rtsp_base = ? AND channel = ? AND interval_minutes = ?
            "#,
        )
        .bind(date)
        .bind(rtsp_base)
        .bind(channel)
        .bind(interval_minutes)
        .fetch_optional(&self.pool)
        .await?)
    }
}
