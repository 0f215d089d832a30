//! Auto-rule types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A recurring or one-shot scheduling rule
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AutoRule {
    pub id: u64,
    pub name: Option<String>,
    pub use_today: bool,
    pub custom_date: Option<String>,
    pub base_rtsp: String,
    pub channel: String,
    pub interval_minutes: i32,
    /// Wall-clock `HH:MM`
    pub trigger_time: String,
    pub is_enabled: bool,
    pub execution_count: i32,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub last_execution_status: Option<String>,
    pub last_execution_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create payload for a rule
#[derive(Debug, Clone, Deserialize)]
pub struct AutoRuleCreate {
    pub name: Option<String>,
    #[serde(default)]
    pub use_today: bool,
    pub custom_date: Option<String>,
    pub base_rtsp: String,
    pub channel: String,
    #[serde(default = "default_interval")]
    pub interval_minutes: u32,
    pub trigger_time: String,
}

fn default_interval() -> u32 {
    10
}

/// Update payload (enable/disable toggle)
#[derive(Debug, Clone, Deserialize)]
pub struct AutoRuleUpdate {
    pub is_enabled: bool,
}

/// Explicit run-now request
#[derive(Debug, Clone, Deserialize)]
pub struct RunNowRequest {
    pub date: String,
    pub base_rtsp: String,
    pub channel: String,
    #[serde(default = "default_interval")]
    pub interval_minutes: u32,
}

/// Rerun request: by task id, or by (date, ip?, channel?)
#[derive(Debug, Clone, Deserialize)]
pub struct RerunRequest {
    pub task_id: Option<u64>,
    pub date: Option<String>,
    pub ip: Option<String>,
    pub channel: Option<String>,
}

/// Submission summary returned by run-now / rerun
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub planned: Option<crate::task_planner::PlanOutcome>,
    pub submitted: usize,
}
