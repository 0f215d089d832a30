//! ConfigStore types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One NVR deployment at a site
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NvrConfig {
    pub id: u64,
    pub nvr_ip: String,
    pub parking_name: String,
    pub nvr_username: String,
    pub nvr_password: String,
    pub nvr_port: i32,
    pub db_host: Option<String>,
    pub db_port: Option<i32>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub db_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One camera under an NVR
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChannelConfig {
    pub id: u64,
    pub nvr_config_id: u64,
    pub channel_code: String,
    pub camera_ip: Option<String>,
    pub camera_name: Option<String>,
    pub camera_sn: Option<String>,
    /// Recognition ROI polygon, opaque to the pipeline (display only)
    pub track_space: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One detection region, bbox in the 1920x1080 reference frame
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ParkingSpace {
    pub id: u64,
    pub channel_config_id: u64,
    pub space_id: String,
    pub space_name: String,
    pub bbox_x1: i32,
    pub bbox_y1: i32,
    pub bbox_x2: i32,
    pub bbox_y2: i32,
    pub sort_order: i32,
}

impl ParkingSpace {
    pub fn bbox(&self) -> [i32; 4] {
        [self.bbox_x1, self.bbox_y1, self.bbox_x2, self.bbox_y2]
    }
}

/// Create/update payload for an NVR
#[derive(Debug, Clone, Deserialize)]
pub struct NvrConfigRequest {
    pub nvr_ip: String,
    pub parking_name: String,
    pub nvr_username: String,
    pub nvr_password: String,
    #[serde(default = "default_nvr_port")]
    pub nvr_port: i32,
    pub db_host: Option<String>,
    pub db_port: Option<i32>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub db_name: Option<String>,
}

fn default_nvr_port() -> i32 {
    554
}

/// Parking-space payload inside a channel request
#[derive(Debug, Clone, Deserialize)]
pub struct ParkingSpaceRequest {
    pub space_id: String,
    pub space_name: String,
    pub bbox: [i32; 4],
}

/// Create/update payload for a channel, spaces replaced wholesale
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfigRequest {
    pub channel_code: String,
    pub camera_ip: Option<String>,
    pub camera_name: Option<String>,
    pub camera_sn: Option<String>,
    pub track_space: Option<String>,
    #[serde(default)]
    pub parking_spaces: Vec<ParkingSpaceRequest>,
}

/// Channel with its spaces, as the API returns it
#[derive(Debug, Clone, Serialize)]
pub struct ChannelView {
    #[serde(flatten)]
    pub channel: ChannelConfig,
    pub parking_spaces: Vec<ParkingSpace>,
}

/// NVR with its channels, as the API returns it
#[derive(Debug, Clone, Serialize)]
pub struct NvrView {
    #[serde(flatten)]
    pub nvr: NvrConfig,
    pub channels: Vec<ChannelView>,
}
