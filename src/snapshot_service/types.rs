//! Snapshot persistence types

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// One completed capture: image on disk plus detector outputs
#[derive(Debug, Clone, FromRow)]
pub struct SnapshotRow {
    pub id: u64,
    pub task_id: u64,
    pub ip: Option<String>,
    pub channel: Option<String>,
    pub image_path: String,
    pub detected_image_path: Option<String>,
    pub change_count: i32,
    pub change_status: String,
    pub change_error: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Detector output for one space within one snapshot
#[derive(Debug, Clone, FromRow)]
pub struct SpaceStateRow {
    pub id: u64,
    pub snapshot_id: u64,
    pub space_id: String,
    pub space_name: String,
    pub occupied: Option<bool>,
    pub confidence: Option<f32>,
}

/// One change row to be written for a snapshot
#[derive(Debug, Clone)]
pub struct ChangeInsert {
    pub prev_snapshot_id: Option<u64>,
    pub space_id: String,
    pub space_name: String,
    pub prev_occupied: Option<bool>,
    pub curr_occupied: Option<bool>,
    pub change_type: Option<&'static str>,
    pub detection_confidence: Option<f32>,
}
