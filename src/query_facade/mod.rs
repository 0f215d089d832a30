//! QueryFacade - Paged Reads over Tasks, Configs, Images and Changes
//!
//! ## Responsibilities
//!
//! - Filtered pagination for the four read surfaces
//! - Image presence (`missing`) computed by stat'ing the blob, behind a
//!   10-second per-path cache so list endpoints stay cheap
//! - The `completed` wire alias folds into `screenshot_taken` everywhere a
//!   status filter is accepted

mod types;

pub use types::*;

use crate::blob_store::BlobStore;
use crate::error::{Error, Result};
use crate::models::{clamp_paging, Page, TaskStatus};
use sqlx::mysql::MySql;
use sqlx::MySqlPool;
use sqlx::QueryBuilder;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const STAT_CACHE_TTL: Duration = Duration::from_secs(10);

/// Parse a csv of wire statuses, folding aliases; rejects a list with no
/// valid entry.
pub fn parse_status_in(csv: &str) -> Result<Vec<TaskStatus>> {
    let statuses: Vec<TaskStatus> = csv
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(TaskStatus::parse)
        .collect();
    if statuses.is_empty() {
        return Err(Error::InvalidInput(format!(
            "status__in has no valid status: {}",
            csv
        )));
    }
    Ok(statuses)
}

/// Label a task for the image views.
pub fn status_label(status: &str, file_present: bool) -> &'static str {
    match TaskStatus::parse(status) {
        Some(TaskStatus::ScreenshotTaken) => {
            if file_present {
                "ok"
            } else {
                "missing"
            }
        }
        Some(TaskStatus::Playing) => "playing",
        Some(TaskStatus::Failed) => "failed",
        _ => "pending",
    }
}

/// File-presence cache: path -> (checked_at, exists)
struct StatCache {
    entries: RwLock<HashMap<String, (Instant, bool)>>,
}

impl StatCache {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn exists(&self, blob: &BlobStore, rel: &str) -> bool {
        {
            let entries = self.entries.read().await;
            if let Some((at, exists)) = entries.get(rel) {
                if at.elapsed() < STAT_CACHE_TTL {
                    return *exists;
                }
            }
        }
        let exists = blob.exists(rel);
        let mut entries = self.entries.write().await;
        if entries.len() > 4096 {
            entries.retain(|_, (at, _)| at.elapsed() < STAT_CACHE_TTL);
        }
        entries.insert(rel.to_string(), (Instant::now(), exists));
        exists
    }
}

/// QueryFacade instance
pub struct QueryFacade {
    pool: MySqlPool,
    blob_store: Arc<BlobStore>,
    stat_cache: StatCache,
}

impl QueryFacade {
    pub fn new(pool: MySqlPool, blob_store: Arc<BlobStore>) -> Self {
        Self {
            pool,
            blob_store,
            stat_cache: StatCache::new(),
        }
    }

    // ========================================
    // Tasks
    // ========================================

    fn push_task_filters(qb: &mut QueryBuilder<'_, MySql>, q: &TaskQuery) -> Result<()> {
        if let Some(date) = &q.date {
            qb.push(" AND t.date = ").push_bind(date.clone());
        }
        if let Some(id) = q.task_id {
            qb.push(" AND t.id = ").push_bind(id);
        }
        if let Some(ip) = &q.ip {
            qb.push(" AND t.ip = ").push_bind(ip.clone());
        }
        if let Some(ip_like) = &q.ip_like {
            qb.push(" AND t.ip LIKE ").push_bind(format!("{}%", ip_like));
        }
        if let Some(channel) = &q.channel {
            qb.push(" AND t.channel = ").push_bind(channel.to_ascii_lowercase());
        }
        if let Some(channel_like) = &q.channel_like {
            qb.push(" AND t.channel LIKE ")
                .push_bind(format!("{}%", channel_like.to_ascii_lowercase()));
        }
        if let Some(status) = &q.status {
            let status = TaskStatus::parse(status)
                .ok_or_else(|| Error::InvalidInput(format!("unknown status: {}", status)))?;
            qb.push(" AND t.status = ").push_bind(status.as_str());
        }
        if let Some(csv) = &q.status_in {
            let statuses = parse_status_in(csv)?;
            qb.push(" AND t.status IN (");
            let mut sep = qb.separated(", ");
            for s in statuses {
                sep.push_bind(s.as_str());
            }
            qb.push(")");
        }
        if let Some(like) = &q.rtsp_url_like {
            qb.push(" AND t.rtsp_url LIKE ").push_bind(format!("%{}%", like));
        }
        if let Some(like) = &q.screenshot_name_like {
            qb.push(" AND t.screenshot_path LIKE ")
                .push_bind(format!("%{}%", like));
        }
        if let Some(like) = &q.error_like {
            qb.push(" AND t.error LIKE ").push_bind(format!("%{}%", like));
        }
        if let Some(v) = q.start_ts_gte {
            qb.push(" AND t.start_ts >= ").push_bind(v);
        }
        if let Some(v) = q.start_ts_lte {
            qb.push(" AND t.start_ts <= ").push_bind(v);
        }
        if let Some(v) = q.end_ts_gte {
            qb.push(" AND t.end_ts >= ").push_bind(v);
        }
        if let Some(v) = q.end_ts_lte {
            qb.push(" AND t.end_ts <= ").push_bind(v);
        }
        if let Some(v) = q.operation_time_gte {
            qb.push(" AND t.operation_time >= ").push_bind(v);
        }
        if let Some(v) = q.operation_time_lte {
            qb.push(" AND t.operation_time <= ").push_bind(v);
        }
        Ok(())
    }

    pub async fn tasks_paged(&self, q: &TaskQuery) -> Result<Page<TaskItem>> {
        let (page, page_size) = clamp_paging(q.page, q.page_size);

        let mut count_qb: QueryBuilder<MySql> =
            QueryBuilder::new("SELECT COUNT(*) FROM tasks t WHERE 1=1");
        Self::push_task_filters(&mut count_qb, q)?;
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb: QueryBuilder<MySql> = QueryBuilder::new(
            r#"
            SELECT t.id, t.date, t.segment_index, t.start_ts, t.end_ts, t.rtsp_url,
                   t.ip, t.channel, t.status, t.screenshot_path, t.error, t.operation_time
            FROM tasks t WHERE 1=1
            "#,
        );
        Self::push_task_filters(&mut qb, q)?;
        qb.push(" ORDER BY t.date DESC, t.segment_index DESC LIMIT ")
            .push_bind(page_size as i64)
            .push(" OFFSET ")
            .push_bind(((page - 1) * page_size) as i64);

        type Row = (
            u64,
            String,
            i32,
            i64,
            i64,
            String,
            Option<String>,
            Option<String>,
            String,
            Option<String>,
            Option<String>,
            chrono::DateTime<chrono::Utc>,
        );
        let rows: Vec<Row> = qb.build_query_as().fetch_all(&self.pool).await?;
        let items = rows
            .into_iter()
            .map(
                |(id, date, index, start_ts, end_ts, rtsp_url, ip, channel, status, shot, error, op)| {
                    TaskItem {
                        id,
                        date,
                        index,
                        start_ts,
                        end_ts,
                        rtsp_url,
                        ip,
                        channel,
                        status,
                        screenshot_path: shot,
                        error,
                        operation_time: op,
                    }
                },
            )
            .collect();

        Ok(Page {
            page,
            page_size,
            total,
            items,
        })
    }

    // ========================================
    // Task configs
    // ========================================

    pub async fn task_configs_paged(&self, q: &TaskQuery) -> Result<Page<TaskConfigItem>> {
        let (page, page_size) = clamp_paging(q.page, q.page_size);

        let mut count_qb: QueryBuilder<MySql> =
            QueryBuilder::new("SELECT COUNT(*) FROM task_configs t WHERE 1=1");
        Self::push_config_filters(&mut count_qb, q);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb: QueryBuilder<MySql> = QueryBuilder::new(
            r#"
            SELECT t.id, t.date, t.rtsp_base, t.ip, t.channel, t.interval_minutes,
                   t.day_start_ts, t.day_end_ts, t.task_count, t.operation_time
            FROM task_configs t WHERE 1=1
            "#,
        );
        Self::push_config_filters(&mut qb, q);
        qb.push(" ORDER BY t.date DESC, t.id DESC LIMIT ")
            .push_bind(page_size as i64)
            .push(" OFFSET ")
            .push_bind(((page - 1) * page_size) as i64);

        type Row = (
            u64,
            String,
            String,
            Option<String>,
            String,
            i32,
            i64,
            i64,
            i32,
            chrono::DateTime<chrono::Utc>,
        );
        let rows: Vec<Row> = qb.build_query_as().fetch_all(&self.pool).await?;

        let mut items = Vec::with_capacity(rows.len());
        for (id, date, rtsp_base, ip, channel, interval, day_start, day_end, task_count, op) in rows
        {
            let counts: Vec<(String, i64)> = sqlx::query_as(
                r#"
                SELECT status, COUNT(*) FROM tasks
                WHERE date = ? AND ip = ? AND channel = ?
                GROUP BY status
                "#,
            )
            .bind(&date)
            .bind(&ip)
            .bind(&channel)
            .fetch_all(&self.pool)
            .await?;

            let mut pending = 0;
            let mut playing = 0;
            let mut completed = 0;
            let mut failed = 0;
            for (status, n) in counts {
                match TaskStatus::parse(&status) {
                    Some(TaskStatus::Pending) => pending += n,
                    Some(TaskStatus::Playing) => playing += n,
                    Some(TaskStatus::ScreenshotTaken) => completed += n,
                    Some(TaskStatus::Failed) => failed += n,
                    None => {}
                }
            }

            items.push(TaskConfigItem {
                id,
                date,
                rtsp_base,
                ip,
                channel,
                interval_minutes: interval,
                day_start_ts: day_start,
                day_end_ts: day_end,
                task_count,
                operation_time: op,
                pending,
                playing,
                completed,
                failed,
            });
        }

        Ok(Page {
            page,
            page_size,
            total,
            items,
        })
    }

    fn push_config_filters(qb: &mut QueryBuilder<'_, MySql>, q: &TaskQuery) {
        if let Some(date) = &q.date {
            qb.push(" AND t.date = ").push_bind(date.clone());
        }
        if let Some(ip) = &q.ip {
            qb.push(" AND t.ip = ").push_bind(ip.clone());
        }
        if let Some(ip_like) = &q.ip_like {
            qb.push(" AND t.ip LIKE ").push_bind(format!("{}%", ip_like));
        }
        if let Some(channel) = &q.channel {
            qb.push(" AND t.channel = ").push_bind(channel.to_ascii_lowercase());
        }
        if let Some(channel_like) = &q.channel_like {
            qb.push(" AND t.channel LIKE ")
                .push_bind(format!("{}%", channel_like.to_ascii_lowercase()));
        }
        if let Some(v) = q.operation_time_gte {
            qb.push(" AND t.operation_time >= ").push_bind(v);
        }
        if let Some(v) = q.operation_time_lte {
            qb.push(" AND t.operation_time <= ").push_bind(v);
        }
        if let Some(v) = q.interval_minutes {
            qb.push(" AND t.interval_minutes = ").push_bind(v);
        }
        if let Some(v) = q.interval_minutes_gte {
            qb.push(" AND t.interval_minutes >= ").push_bind(v);
        }
        if let Some(v) = q.interval_minutes_lte {
            qb.push(" AND t.interval_minutes <= ").push_bind(v);
        }
        if let Some(v) = q.start_ts_gte {
            qb.push(" AND t.day_start_ts >= ").push_bind(v);
        }
        if let Some(v) = q.start_ts_lte {
            qb.push(" AND t.day_start_ts <= ").push_bind(v);
        }
        if let Some(v) = q.end_ts_gte {
            qb.push(" AND t.day_end_ts >= ").push_bind(v);
        }
        if let Some(v) = q.end_ts_lte {
            qb.push(" AND t.day_end_ts <= ").push_bind(v);
        }
    }

    // ========================================
    // Images
    // ========================================

    pub async fn images_paged(&self, q: &ImageQuery) -> Result<Page<ImageItem>> {
        let (page, page_size) = clamp_paging(q.page, q.page_size);

        // status_label narrows the store-side status first; the ok/missing
        // split is decided per row by the stat cache afterwards.
        let store_status: Option<&'static str> = match q.status_label.as_deref() {
            None => None,
            Some("ok") | Some("missing") => Some("screenshot_taken"),
            Some("pending") => Some("pending"),
            Some("playing") => Some("playing"),
            Some("failed") => Some("failed"),
            Some(other) => {
                return Err(Error::InvalidInput(format!(
                    "unknown status_label: {}",
                    other
                )))
            }
        };

        let mut count_qb: QueryBuilder<MySql> = QueryBuilder::new(
            "SELECT COUNT(*) FROM tasks t LEFT JOIN snapshots s ON s.task_id = t.id WHERE 1=1",
        );
        Self::push_image_filters(&mut count_qb, q, store_status);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb: QueryBuilder<MySql> = QueryBuilder::new(
            r#"
            SELECT t.id, s.id, t.date, t.segment_index, t.ip, t.channel,
                   t.start_ts, t.end_ts, t.status, t.screenshot_path,
                   s.detected_image_path, s.change_count, s.detected_at
            FROM tasks t LEFT JOIN snapshots s ON s.task_id = t.id
            WHERE 1=1
            "#,
        );
        Self::push_image_filters(&mut qb, q, store_status);
        qb.push(" ORDER BY t.date DESC, t.segment_index DESC LIMIT ")
            .push_bind(page_size as i64)
            .push(" OFFSET ")
            .push_bind(((page - 1) * page_size) as i64);

        type Row = (
            u64,
            Option<u64>,
            String,
            i32,
            Option<String>,
            Option<String>,
            i64,
            i64,
            String,
            Option<String>,
            Option<String>,
            Option<i32>,
            Option<chrono::DateTime<chrono::Utc>>,
        );
        let rows: Vec<Row> = qb.build_query_as().fetch_all(&self.pool).await?;

        let mut items = Vec::with_capacity(rows.len());
        for (
            task_id,
            snapshot_id,
            date,
            index,
            ip,
            channel,
            start_ts,
            end_ts,
            status,
            screenshot_path,
            detected_path,
            change_count,
            detected_at,
        ) in rows
        {
            let missing = match &screenshot_path {
                Some(rel) => !self.stat_cache.exists(&self.blob_store, rel).await,
                None => true,
            };
            let label = status_label(&status, !missing);

            if let Some(wanted) = q.status_label.as_deref() {
                if label != wanted {
                    continue;
                }
            }
            if let Some(wanted_missing) = q.missing {
                if missing != wanted_missing {
                    continue;
                }
            }

            items.push(ImageItem {
                task_id,
                snapshot_id,
                date,
                index,
                ip,
                channel,
                start_ts,
                end_ts,
                status,
                status_label: label.to_string(),
                missing,
                image_url: screenshot_path.as_deref().map(|p| format!("/shots/{}", p)),
                detected_image_url: detected_path.as_deref().map(|p| format!("/shots/{}", p)),
                change_count: change_count.unwrap_or(0),
                detected_at,
            });
        }

        Ok(Page {
            page,
            page_size,
            total,
            items,
        })
    }

    fn push_image_filters(
        qb: &mut QueryBuilder<'_, MySql>,
        q: &ImageQuery,
        store_status: Option<&'static str>,
    ) {
        if let Some(date) = &q.date {
            qb.push(" AND t.date = ").push_bind(date.clone());
        }
        if let Some(ip) = &q.ip {
            qb.push(" AND t.ip = ").push_bind(ip.clone());
        }
        if let Some(ip_like) = &q.ip_like {
            qb.push(" AND t.ip LIKE ").push_bind(format!("{}%", ip_like));
        }
        if let Some(channel) = &q.channel {
            qb.push(" AND t.channel = ").push_bind(channel.to_ascii_lowercase());
        }
        if let Some(channel_like) = &q.channel_like {
            qb.push(" AND t.channel LIKE ")
                .push_bind(format!("{}%", channel_like.to_ascii_lowercase()));
        }
        if let Some(status) = store_status {
            qb.push(" AND t.status = ").push_bind(status);
        }
        if let Some(v) = q.start_ts_gte {
            qb.push(" AND t.start_ts >= ").push_bind(v);
        }
        if let Some(v) = q.start_ts_lte {
            qb.push(" AND t.start_ts <= ").push_bind(v);
        }
        if let Some(v) = q.end_ts_gte {
            qb.push(" AND t.end_ts >= ").push_bind(v);
        }
        if let Some(v) = q.end_ts_lte {
            qb.push(" AND t.end_ts <= ").push_bind(v);
        }
    }

    // ========================================
    // Changes
    // ========================================

    pub async fn changes_paged(&self, q: &ChangeQuery) -> Result<Page<ChangeItem>> {
        let (page, page_size) = clamp_paging(q.page, q.page_size);

        let mut count_qb: QueryBuilder<MySql> = QueryBuilder::new(
            r#"
            SELECT COUNT(*)
            FROM parking_changes pc
            JOIN snapshots s ON pc.snapshot_id = s.id
            JOIN tasks t ON s.task_id = t.id
            WHERE 1=1
            "#,
        );
        Self::push_change_filters(&mut count_qb, q)?;
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb: QueryBuilder<MySql> = QueryBuilder::new(
            r#"
            SELECT pc.id, pc.snapshot_id, pc.prev_snapshot_id, t.id, t.date,
                   pc.ip, pc.channel, pc.space_id, pc.space_name,
                   pc.prev_occupied, pc.curr_occupied, pc.change_type,
                   pc.detection_confidence, pc.detected_at,
                   t.screenshot_path, s.detected_image_path
            FROM parking_changes pc
            JOIN snapshots s ON pc.snapshot_id = s.id
            JOIN tasks t ON s.task_id = t.id
            WHERE 1=1
            "#,
        );
        Self::push_change_filters(&mut qb, q)?;
        qb.push(" ORDER BY pc.detected_at DESC, pc.snapshot_id DESC, pc.id LIMIT ")
            .push_bind(page_size as i64)
            .push(" OFFSET ")
            .push_bind(((page - 1) * page_size) as i64);

        type Row = (
            u64,
            u64,
            Option<u64>,
            u64,
            String,
            Option<String>,
            Option<String>,
            String,
            String,
            Option<bool>,
            Option<bool>,
            Option<String>,
            Option<f32>,
            chrono::DateTime<chrono::Utc>,
            Option<String>,
            Option<String>,
        );
        let rows: Vec<Row> = qb.build_query_as().fetch_all(&self.pool).await?;
        let items = rows
            .into_iter()
            .map(
                |(
                    id,
                    snapshot_id,
                    prev_snapshot_id,
                    task_id,
                    date,
                    ip,
                    channel,
                    space_id,
                    space_name,
                    prev_occupied,
                    curr_occupied,
                    change_type,
                    detection_confidence,
                    detected_at,
                    screenshot_path,
                    detected_path,
                )| ChangeItem {
                    id,
                    snapshot_id,
                    prev_snapshot_id,
                    task_id,
                    date,
                    ip,
                    channel,
                    space_id,
                    space_name,
                    prev_occupied,
                    curr_occupied,
                    change_type,
                    detection_confidence,
                    detected_at,
                    image_url: screenshot_path.as_deref().map(|p| format!("/shots/{}", p)),
                    detected_image_url: detected_path.as_deref().map(|p| format!("/shots/{}", p)),
                },
            )
            .collect();

        Ok(Page {
            page,
            page_size,
            total,
            items,
        })
    }

    fn push_change_filters(qb: &mut QueryBuilder<'_, MySql>, q: &ChangeQuery) -> Result<()> {
        if let Some(date) = &q.date {
            qb.push(" AND t.date = ").push_bind(date.clone());
        }
        if let Some(ip) = &q.ip {
            qb.push(" AND pc.ip = ").push_bind(ip.clone());
        }
        if let Some(ip_like) = &q.ip_like {
            qb.push(" AND pc.ip LIKE ").push_bind(format!("{}%", ip_like));
        }
        if let Some(channel) = &q.channel {
            qb.push(" AND pc.channel = ").push_bind(channel.to_ascii_lowercase());
        }
        if let Some(channel_like) = &q.channel_like {
            qb.push(" AND pc.channel LIKE ")
                .push_bind(format!("{}%", channel_like.to_ascii_lowercase()));
        }
        if let Some(space_id) = &q.space_id {
            qb.push(" AND pc.space_id = ").push_bind(space_id.clone());
        }
        if let Some(csv) = &q.change_type_in {
            let types: Vec<&'static str> = csv
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(crate::models::ChangeType::parse)
                .map(|c| c.as_str())
                .collect();
            if types.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "change_type__in has no valid type: {}",
                    csv
                )));
            }
            qb.push(" AND pc.change_type IN (");
            let mut sep = qb.separated(", ");
            for t in types {
                sep.push_bind(t);
            }
            qb.push(")");
        }
        if let Some(v) = q.detected_at_gte {
            qb.push(" AND pc.detected_at >= ").push_bind(v);
        }
        if let Some(v) = q.detected_at_lte {
            qb.push(" AND pc.detected_at <= ").push_bind(v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_in_folds_completed() {
        let statuses = parse_status_in("completed, failed").unwrap();
        assert_eq!(
            statuses,
            vec![TaskStatus::ScreenshotTaken, TaskStatus::Failed]
        );
        assert!(parse_status_in("bogus").is_err());
        assert!(parse_status_in("").is_err());
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(status_label("screenshot_taken", true), "ok");
        assert_eq!(status_label("screenshot_taken", false), "missing");
        assert_eq!(status_label("completed", true), "ok");
        assert_eq!(status_label("playing", false), "playing");
        assert_eq!(status_label("failed", false), "failed");
        assert_eq!(status_label("pending", false), "pending");
    }
}
