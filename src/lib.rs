//! parkwatch - NVR Replay Capture and Parking-Change Detection
//!
//! ## Architecture (11 Components)
//!
//! 1. WallClock - day boundaries and trigger times in the wall zone
//! 2. ConfigStore - NVR / channel / parking-space configuration
//! 3. BlobStore - screenshot image storage
//! 4. TaskPlanner - per-day capture plan expansion
//! 5. ScreenshotCapture - single-frame RTSP grabs via ffmpeg
//! 6. Detector - occupancy inference adapter + annotated rendering
//! 7. CaptureEngine - bounded concurrent execution
//! 8. SnapshotService - transactional capture persistence
//! 9. ChangeEngine - arrive/leave inference between snapshots
//! 10. AutoScheduler - trigger-time rules, run-now, rerun
//! 11. HlsGateway / QueryFacade / WebAPI - playback and read surfaces
//!
//! ## Design Principles
//!
//! - Single-writer task transitions via conditional updates
//! - Layered counted permits, never per-task threads
//! - All multi-row writes are transactions

pub mod auto_scheduler;
pub mod blob_store;
pub mod capture_engine;
pub mod change_engine;
pub mod config_store;
pub mod db;
pub mod detector;
pub mod error;
pub mod hls_gateway;
pub mod models;
pub mod query_facade;
pub mod rtsp_url;
pub mod screenshot_capture;
pub mod snapshot_service;
pub mod state;
pub mod task_planner;
pub mod wall_clock;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
