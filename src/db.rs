//! Database pool and schema bootstrap
//!
//! The schema is created on startup with `CREATE TABLE IF NOT EXISTS`.
//! The two uniqueness constraints the pipeline leans on are declared here,
//! not in application code: `task_configs (date, rtsp_base, channel,
//! interval_minutes)` and `tasks (date, segment_index, rtsp_url)`.

use crate::error::Result;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use std::time::Duration;

/// Connect with the teacher-sized pool.
pub async fn connect(database_url: &str) -> Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}

const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS nvr_configs (
        id              BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        nvr_ip          VARCHAR(64)  NOT NULL,
        parking_name    VARCHAR(128) NOT NULL,
        nvr_username    VARCHAR(64)  NOT NULL,
        nvr_password    VARCHAR(128) NOT NULL,
        nvr_port        INT          NOT NULL DEFAULT 554,
        db_host         VARCHAR(64)  NULL,
        db_port         INT          NULL,
        db_user         VARCHAR(64)  NULL,
        db_password     VARCHAR(128) NULL,
        db_name         VARCHAR(64)  NULL,
        created_at      DATETIME(3)  NOT NULL,
        updated_at      DATETIME(3)  NOT NULL,
        UNIQUE KEY uq_nvr_ip (nvr_ip)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS channel_configs (
        id              BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        nvr_config_id   BIGINT UNSIGNED NOT NULL,
        channel_code    VARCHAR(16)  NOT NULL,
        camera_ip       VARCHAR(64)  NULL,
        camera_name     VARCHAR(128) NULL,
        camera_sn       VARCHAR(64)  NULL,
        track_space     VARCHAR(2048) NULL,
        created_at      DATETIME(3)  NOT NULL,
        updated_at      DATETIME(3)  NOT NULL,
        UNIQUE KEY uq_nvr_channel (nvr_config_id, channel_code),
        CONSTRAINT fk_channel_nvr FOREIGN KEY (nvr_config_id)
            REFERENCES nvr_configs (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS parking_spaces (
        id                BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        channel_config_id BIGINT UNSIGNED NOT NULL,
        space_id          VARCHAR(64) NOT NULL,
        space_name        VARCHAR(64) NOT NULL,
        bbox_x1           INT NOT NULL,
        bbox_y1           INT NOT NULL,
        bbox_x2           INT NOT NULL,
        bbox_y2           INT NOT NULL,
        sort_order        INT NOT NULL DEFAULT 0,
        created_at        DATETIME(3) NOT NULL,
        updated_at        DATETIME(3) NOT NULL,
        KEY idx_space_channel (channel_config_id),
        CONSTRAINT fk_space_channel FOREIGN KEY (channel_config_id)
            REFERENCES channel_configs (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_configs (
        id               BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        date             VARCHAR(10)  NOT NULL,
        rtsp_base        VARCHAR(512) NOT NULL,
        ip               VARCHAR(64)  NULL,
        channel          VARCHAR(16)  NOT NULL,
        interval_minutes INT          NOT NULL,
        day_start_ts     BIGINT       NOT NULL,
        day_end_ts       BIGINT       NOT NULL,
        task_count       INT          NOT NULL DEFAULT 0,
        operation_time   DATETIME(3)  NOT NULL,
        UNIQUE KEY uq_task_config (date, rtsp_base, channel, interval_minutes),
        KEY idx_task_config_date (date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id              BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        date            VARCHAR(10)  NOT NULL,
        segment_index   INT          NOT NULL,
        start_ts        BIGINT       NOT NULL,
        end_ts          BIGINT       NOT NULL,
        rtsp_url        VARCHAR(512) NOT NULL,
        ip              VARCHAR(64)  NULL,
        channel         VARCHAR(16)  NULL,
        status          VARCHAR(32)  NOT NULL DEFAULT 'pending',
        screenshot_path VARCHAR(512) NULL,
        error           VARCHAR(512) NULL,
        retry_count     INT          NOT NULL DEFAULT 0,
        next_retry_at   DATETIME(3)  NULL,
        operation_time  DATETIME(3)  NOT NULL,
        UNIQUE KEY uq_task_window (date, segment_index, rtsp_url),
        KEY idx_task_date (date),
        KEY idx_task_ip (ip),
        KEY idx_task_channel (channel),
        KEY idx_task_status (status)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS snapshots (
        id                  BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        task_id             BIGINT UNSIGNED NOT NULL,
        ip                  VARCHAR(64)  NULL,
        channel             VARCHAR(16)  NULL,
        image_path          VARCHAR(512) NOT NULL,
        detected_image_path VARCHAR(512) NULL,
        change_count        INT          NOT NULL DEFAULT 0,
        change_status       VARCHAR(32)  NOT NULL DEFAULT 'pending',
        change_error        VARCHAR(512) NULL,
        detected_at         DATETIME(6)  NOT NULL,
        created_at          DATETIME(3)  NOT NULL,
        UNIQUE KEY uq_snapshot_task (task_id),
        KEY idx_snapshot_combo_time (ip, channel, detected_at),
        KEY idx_snapshot_change_status (change_status),
        CONSTRAINT fk_snapshot_task FOREIGN KEY (task_id)
            REFERENCES tasks (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS space_states (
        id          BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        snapshot_id BIGINT UNSIGNED NOT NULL,
        space_id    VARCHAR(64) NOT NULL,
        space_name  VARCHAR(64) NOT NULL,
        occupied    BOOLEAN NULL,
        confidence  FLOAT   NULL,
        KEY idx_state_snapshot (snapshot_id),
        CONSTRAINT fk_state_snapshot FOREIGN KEY (snapshot_id)
            REFERENCES snapshots (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS parking_changes (
        id                   BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        snapshot_id          BIGINT UNSIGNED NOT NULL,
        prev_snapshot_id     BIGINT UNSIGNED NULL,
        ip                   VARCHAR(64) NULL,
        channel              VARCHAR(16) NULL,
        space_id             VARCHAR(64) NOT NULL,
        space_name           VARCHAR(64) NOT NULL,
        prev_occupied        BOOLEAN NULL,
        curr_occupied        BOOLEAN NULL,
        change_type          VARCHAR(32) NULL,
        detection_confidence FLOAT NULL,
        detected_at          DATETIME(6) NOT NULL,
        created_at           DATETIME(3) NOT NULL,
        KEY idx_change_snapshot (snapshot_id),
        KEY idx_change_combo_time (ip, channel, detected_at),
        KEY idx_change_type (change_type),
        CONSTRAINT fk_change_snapshot FOREIGN KEY (snapshot_id)
            REFERENCES snapshots (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS auto_rules (
        id                    BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        name                  VARCHAR(128) NULL,
        use_today             BOOLEAN      NOT NULL DEFAULT TRUE,
        custom_date           VARCHAR(10)  NULL,
        base_rtsp             VARCHAR(512) NOT NULL,
        channel               VARCHAR(16)  NOT NULL,
        interval_minutes      INT          NOT NULL DEFAULT 10,
        trigger_time          VARCHAR(5)   NOT NULL,
        is_enabled            BOOLEAN      NOT NULL DEFAULT TRUE,
        execution_count       INT          NOT NULL DEFAULT 0,
        last_executed_at      DATETIME(3)  NULL,
        last_execution_status VARCHAR(32)  NULL,
        last_execution_error  VARCHAR(512) NULL,
        created_at            DATETIME(3)  NOT NULL,
        updated_at            DATETIME(3)  NOT NULL
    )
    "#,
];

/// Create missing tables. Idempotent, safe to run on every boot.
pub async fn bootstrap_schema(pool: &MySqlPool) -> Result<()> {
    for ddl in DDL {
        sqlx::query(ddl).execute(pool).await?;
    }
    tracing::info!(tables = DDL.len(), "Database schema checked");
    Ok(())
}
