//! ConfigStore repository
//!
//! Database access layer for NVR / channel / parking-space rows.

use super::types::*;
use crate::error::{Error, Result};
use sqlx::MySqlPool;

/// ConfigStore repository for database operations
#[derive(Clone)]
pub struct ConfigRepository {
    pool: MySqlPool,
}

impl ConfigRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    const NVR_COLUMNS: &'static str = r#"
        id, nvr_ip, parking_name, nvr_username, nvr_password, nvr_port,
        db_host, db_port, db_user, db_password, db_name,
        created_at, updated_at
    "#;

    const CHANNEL_COLUMNS: &'static str = r#"
        id, nvr_config_id, channel_code, camera_ip, camera_name, camera_sn,
        track_space, created_at, updated_at
    "#;

    const SPACE_COLUMNS: &'static str = r#"
        id, channel_config_id, space_id, space_name,
        bbox_x1, bbox_y1, bbox_x2, bbox_y2, sort_order
    "#;

    // ========================================
    // NVR CRUD
    // ========================================

    pub async fn get_all_nvrs(&self) -> Result<Vec<NvrConfig>> {
        let query = format!(
            "SELECT {} FROM nvr_configs ORDER BY parking_name, nvr_ip",
            Self::NVR_COLUMNS
        );
        Ok(sqlx::query_as::<_, NvrConfig>(&query)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn get_nvr(&self, id: u64) -> Result<Option<NvrConfig>> {
        let query = format!("SELECT {} FROM nvr_configs WHERE id = ?", Self::NVR_COLUMNS);
        Ok(sqlx::query_as::<_, NvrConfig>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn create_nvr(&self, req: &NvrConfigRequest) -> Result<NvrConfig> {
        let now = chrono::Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO nvr_configs (
                nvr_ip, parking_name, nvr_username, nvr_password, nvr_port,
                db_host, db_port, db_user, db_password, db_name,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&req.nvr_ip)
        .bind(&req.parking_name)
        .bind(&req.nvr_username)
        .bind(&req.nvr_password)
        .bind(req.nvr_port)
        .bind(&req.db_host)
        .bind(req.db_port)
        .bind(&req.db_user)
        .bind(&req.db_password)
        .bind(&req.db_name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(format!("NVR {} already configured", req.nvr_ip))
            }
            _ => Error::Database(e),
        })?;

        self.get_nvr(result.last_insert_id())
            .await?
            .ok_or_else(|| Error::NotFound("NVR not found after insert".to_string()))
    }

    pub async fn update_nvr(&self, id: u64, req: &NvrConfigRequest) -> Result<NvrConfig> {
        let now = chrono::Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE nvr_configs
            SET nvr_ip = ?, parking_name = ?, nvr_username = ?, nvr_password = ?,
                nvr_port = ?, db_host = ?, db_port = ?, db_user = ?,
                db_password = ?, db_name = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&req.nvr_ip)
        .bind(&req.parking_name)
        .bind(&req.nvr_username)
        .bind(&req.nvr_password)
        .bind(req.nvr_port)
        .bind(&req.db_host)
        .bind(req.db_port)
        .bind(&req.db_user)
        .bind(&req.db_password)
        .bind(&req.db_name)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("NVR {} not found", id)));
        }
        self.get_nvr(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("NVR {} not found", id)))
    }

    /// Cascade delete removes channels and spaces with the NVR.
    pub async fn delete_nvr(&self, id: u64) -> Result<()> {
        let result = sqlx::query("DELETE FROM nvr_configs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("NVR {} not found", id)));
        }
        Ok(())
    }

    // ========================================
    // Channel + spaces
    // ========================================

    pub async fn get_channels(&self, nvr_config_id: u64) -> Result<Vec<ChannelConfig>> {
        let query = format!(
            "SELECT {} FROM channel_configs WHERE nvr_config_id = ? ORDER BY channel_code",
            Self::CHANNEL_COLUMNS
        );
        Ok(sqlx::query_as::<_, ChannelConfig>(&query)
            .bind(nvr_config_id)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn get_channel(&self, id: u64) -> Result<Option<ChannelConfig>> {
        let query = format!(
            "SELECT {} FROM channel_configs WHERE id = ?",
            Self::CHANNEL_COLUMNS
        );
        Ok(sqlx::query_as::<_, ChannelConfig>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn get_spaces(&self, channel_config_id: u64) -> Result<Vec<ParkingSpace>> {
        let query = format!(
            "SELECT {} FROM parking_spaces WHERE channel_config_id = ? ORDER BY sort_order, id",
            Self::SPACE_COLUMNS
        );
        Ok(sqlx::query_as::<_, ParkingSpace>(&query)
            .bind(channel_config_id)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Upsert a channel and replace its space set in one transaction.
    pub async fn upsert_channel(
        &self,
        nvr_config_id: u64,
        req: &ChannelConfigRequest,
        channel_code: &str,
    ) -> Result<u64> {
        let now = chrono::Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO channel_configs (
                nvr_config_id, channel_code, camera_ip, camera_name, camera_sn,
                track_space, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                camera_ip = VALUES(camera_ip),
                camera_name = VALUES(camera_name),
                camera_sn = VALUES(camera_sn),
                track_space = VALUES(track_space),
                updated_at = VALUES(updated_at)
            "#,
        )
        .bind(nvr_config_id)
        .bind(channel_code)
        .bind(&req.camera_ip)
        .bind(&req.camera_name)
        .bind(&req.camera_sn)
        .bind(&req.track_space)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let (channel_id,): (u64,) = sqlx::query_as(
            "SELECT id FROM channel_configs WHERE nvr_config_id = ? AND channel_code = ?",
        )
        .bind(nvr_config_id)
        .bind(channel_code)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM parking_spaces WHERE channel_config_id = ?")
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;

        for (order, space) in req.parking_spaces.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO parking_spaces (
                    channel_config_id, space_id, space_name,
                    bbox_x1, bbox_y1, bbox_x2, bbox_y2, sort_order,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(channel_id)
            .bind(&space.space_id)
            .bind(&space.space_name)
            .bind(space.bbox[0])
            .bind(space.bbox[1])
            .bind(space.bbox[2])
            .bind(space.bbox[3])
            .bind(order as i32)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(channel_id)
    }

    pub async fn delete_channel(&self, id: u64) -> Result<()> {
        let result = sqlx::query("DELETE FROM channel_configs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("channel {} not found", id)));
        }
        Ok(())
    }

    /// Channel lookup for the capture pipeline.
    ///
    /// Prefers an exact (camera_ip, channel_code) match; falls back to any
    /// NVR that owns the channel code when the camera ip is unconfigured.
    pub async fn find_channel_for_capture(
        &self,
        camera_ip: &str,
        channel_code: &str,
    ) -> Result<Option<ChannelConfig>> {
        let query = format!(
            "SELECT {} FROM channel_configs WHERE camera_ip = ? AND channel_code = ? LIMIT 1",
            Self::CHANNEL_COLUMNS
        );
        if let Some(channel) = sqlx::query_as::<_, ChannelConfig>(&query)
            .bind(camera_ip)
            .bind(channel_code)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(Some(channel));
        }

        let query = format!(
            r#"
            SELECT {} FROM channel_configs c
            WHERE c.channel_code = ?
              AND EXISTS (SELECT 1 FROM nvr_configs n
                          WHERE n.id = c.nvr_config_id AND n.nvr_ip = ?)
            LIMIT 1
            "#,
            Self::CHANNEL_COLUMNS
        );
        Ok(sqlx::query_as::<_, ChannelConfig>(&query)
            .bind(channel_code)
            .bind(camera_ip)
            .fetch_optional(&self.pool)
            .await?)
    }
}
