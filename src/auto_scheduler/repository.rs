//! Auto-rule repository

use super::types::{AutoRule, AutoRuleCreate};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

const RULE_COLUMNS: &str = r#"
    id, name, use_today, custom_date, base_rtsp, channel, interval_minutes,
    trigger_time, is_enabled, execution_count, last_executed_at,
    last_execution_status, last_execution_error, created_at, updated_at
"#;

/// Auto-rule repository for database operations
#[derive(Clone)]
pub struct AutoRuleRepository {
    pool: MySqlPool,
}

impl AutoRuleRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn get_all(&self) -> Result<Vec<AutoRule>> {
        let query = format!("SELECT {} FROM auto_rules ORDER BY id", RULE_COLUMNS);
        Ok(sqlx::query_as::<_, AutoRule>(&query)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn get_enabled(&self) -> Result<Vec<AutoRule>> {
        let query = format!(
            "SELECT {} FROM auto_rules WHERE is_enabled = TRUE ORDER BY id",
            RULE_COLUMNS
        );
        Ok(sqlx::query_as::<_, AutoRule>(&query)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn get(&self, id: u64) -> Result<Option<AutoRule>> {
        let query = format!("SELECT {} FROM auto_rules WHERE id = ?", RULE_COLUMNS);
        Ok(sqlx::query_as::<_, AutoRule>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn create(&self, req: &AutoRuleCreate, name: &str, channel: &str) -> Result<AutoRule> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO auto_rules (
                name, use_today, custom_date, base_rtsp, channel,
                interval_minutes, trigger_time, is_enabled,
                execution_count, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, TRUE, 0, ?, ?)
            "#,
        )
        .bind(name)
        .bind(req.use_today)
        .bind(if req.use_today {
            None
        } else {
            req.custom_date.as_deref()
        })
        .bind(req.base_rtsp.trim_end_matches('/'))
        .bind(channel)
        .bind(req.interval_minutes as i32)
        .bind(&req.trigger_time)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get(result.last_insert_id())
            .await?
            .ok_or_else(|| Error::NotFound("rule not found after insert".to_string()))
    }

    pub async fn set_enabled(&self, id: u64, is_enabled: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE auto_rules SET is_enabled = ?, updated_at = NOW(3) WHERE id = ?",
        )
        .bind(is_enabled)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("rule {} not found", id)));
        }
        Ok(())
    }

    pub async fn delete(&self, id: u64) -> Result<()> {
        let result = sqlx::query("DELETE FROM auto_rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("rule {} not found", id)));
        }
        Ok(())
    }

    /// Mark a firing as started; the execution counter moves here so a
    /// crash mid-run still shows the attempt.
    pub async fn mark_running(&self, id: u64, fired_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE auto_rules
            SET last_executed_at = ?, last_execution_status = 'running',
                last_execution_error = NULL, execution_count = execution_count + 1,
                updated_at = NOW(3)
            WHERE id = ?
            "#,
        )
        .bind(fired_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_finished(&self, id: u64, success: bool, error: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE auto_rules
            SET last_execution_status = ?, last_execution_error = ?, updated_at = NOW(3)
            WHERE id = ?
            "#,
        )
        .bind(if success { "success" } else { "failed" })
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
