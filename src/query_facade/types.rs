//! Query facade types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_page() -> u32 {
    1
}
fn default_page_size() -> u32 {
    20
}

/// Filters shared by the task list endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskQuery {
    pub date: Option<String>,
    pub task_id: Option<u64>,
    pub ip: Option<String>,
    #[serde(alias = "ip__like")]
    pub ip_like: Option<String>,
    pub channel: Option<String>,
    #[serde(alias = "channel__like")]
    pub channel_like: Option<String>,
    pub status: Option<String>,
    #[serde(alias = "status__in")]
    pub status_in: Option<String>,
    #[serde(alias = "rtsp_url__like")]
    pub rtsp_url_like: Option<String>,
    #[serde(alias = "screenshot_name__like")]
    pub screenshot_name_like: Option<String>,
    #[serde(alias = "error__like")]
    pub error_like: Option<String>,
    #[serde(alias = "start_ts__gte")]
    pub start_ts_gte: Option<i64>,
    #[serde(alias = "start_ts__lte")]
    pub start_ts_lte: Option<i64>,
    #[serde(alias = "end_ts__gte")]
    pub end_ts_gte: Option<i64>,
    #[serde(alias = "end_ts__lte")]
    pub end_ts_lte: Option<i64>,
    #[serde(alias = "operation_time__gte")]
    pub operation_time_gte: Option<DateTime<Utc>>,
    #[serde(alias = "operation_time__lte")]
    pub operation_time_lte: Option<DateTime<Utc>>,
    pub interval_minutes: Option<i32>,
    #[serde(alias = "interval_minutes__gte")]
    pub interval_minutes_gte: Option<i32>,
    #[serde(alias = "interval_minutes__lte")]
    pub interval_minutes_lte: Option<i32>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Task list item
#[derive(Debug, Serialize)]
pub struct TaskItem {
    pub id: u64,
    pub date: String,
    pub index: i32,
    pub start_ts: i64,
    pub end_ts: i64,
    pub rtsp_url: String,
    pub ip: Option<String>,
    pub channel: Option<String>,
    pub status: String,
    pub screenshot_path: Option<String>,
    pub error: Option<String>,
    pub operation_time: DateTime<Utc>,
}

/// Task-config list item with its status aggregates
#[derive(Debug, Serialize)]
pub struct TaskConfigItem {
    pub id: u64,
    pub date: String,
    pub rtsp_base: String,
    pub ip: Option<String>,
    pub channel: String,
    pub interval_minutes: i32,
    pub day_start_ts: i64,
    pub day_end_ts: i64,
    pub task_count: i32,
    pub operation_time: DateTime<Utc>,
    pub pending: i64,
    pub playing: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Filters for the image (snapshot) list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageQuery {
    pub date: Option<String>,
    pub ip: Option<String>,
    #[serde(alias = "ip__like")]
    pub ip_like: Option<String>,
    pub channel: Option<String>,
    #[serde(alias = "channel__like")]
    pub channel_like: Option<String>,
    /// ok | missing | failed | pending | playing
    pub status_label: Option<String>,
    pub missing: Option<bool>,
    #[serde(alias = "start_ts__gte")]
    pub start_ts_gte: Option<i64>,
    #[serde(alias = "start_ts__lte")]
    pub start_ts_lte: Option<i64>,
    #[serde(alias = "end_ts__gte")]
    pub end_ts_gte: Option<i64>,
    #[serde(alias = "end_ts__lte")]
    pub end_ts_lte: Option<i64>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Image list item
#[derive(Debug, Serialize)]
pub struct ImageItem {
    pub task_id: u64,
    pub snapshot_id: Option<u64>,
    pub date: String,
    pub index: i32,
    pub ip: Option<String>,
    pub channel: Option<String>,
    pub start_ts: i64,
    pub end_ts: i64,
    pub status: String,
    pub status_label: String,
    pub missing: bool,
    pub image_url: Option<String>,
    pub detected_image_url: Option<String>,
    pub change_count: i32,
    pub detected_at: Option<DateTime<Utc>>,
}

/// Filters for the change list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeQuery {
    pub date: Option<String>,
    pub ip: Option<String>,
    #[serde(alias = "ip__like")]
    pub ip_like: Option<String>,
    pub channel: Option<String>,
    #[serde(alias = "channel__like")]
    pub channel_like: Option<String>,
    pub space_id: Option<String>,
    /// csv over arrive|leave|unknown
    #[serde(alias = "change_type__in")]
    pub change_type_in: Option<String>,
    #[serde(alias = "detected_at__gte")]
    pub detected_at_gte: Option<DateTime<Utc>>,
    #[serde(alias = "detected_at__lte")]
    pub detected_at_lte: Option<DateTime<Utc>>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Change list item
#[derive(Debug, Serialize)]
pub struct ChangeItem {
    pub id: u64,
    pub snapshot_id: u64,
    pub prev_snapshot_id: Option<u64>,
    pub task_id: u64,
    pub date: String,
    pub ip: Option<String>,
    pub channel: Option<String>,
    pub space_id: String,
    pub space_name: String,
    pub prev_occupied: Option<bool>,
    pub curr_occupied: Option<bool>,
    pub change_type: Option<String>,
    pub detection_confidence: Option<f32>,
    pub detected_at: DateTime<Utc>,
    pub image_url: Option<String>,
    pub detected_image_url: Option<String>,
}
