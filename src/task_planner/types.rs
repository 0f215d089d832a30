//! Task planner types

use crate::models::TaskStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// One capture window row
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: u64,
    pub date: String,
    pub segment_index: i32,
    pub start_ts: i64,
    pub end_ts: i64,
    pub rtsp_url: String,
    pub ip: Option<String>,
    pub channel: Option<String>,
    pub status: String,
    pub screenshot_path: Option<String>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub operation_time: DateTime<Utc>,
}

impl TaskRow {
    pub fn status(&self) -> Option<TaskStatus> {
        TaskStatus::parse(&self.status)
    }

    /// Capture window length in seconds
    pub fn duration_sec(&self) -> i64 {
        (self.end_ts - self.start_ts).max(0)
    }
}

/// Per-day capture plan row
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TaskConfigRow {
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
}

/// One planned segment before it is persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: i32,
    pub start_ts: i64,
    pub end_ts: i64,
}

/// Outcome of one `plan` call
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlanOutcome {
    pub date: String,
    pub created: u64,
    pub existing: u64,
    pub total: u64,
}

/// Validated plan request
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub date: String,
    pub base_rtsp: String,
    pub channel: String,
    pub interval_minutes: u32,
}
