//! API Routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tower_http::services::ServeDir;

use crate::auto_scheduler::{AutoRuleCreate, AutoRuleUpdate, RerunRequest, RunNowRequest};
use crate::config_store::{ChannelConfigRequest, NvrConfigRequest};
use crate::error::Result;
use crate::models::ApiResponse;
use crate::query_facade::{ChangeQuery, ImageQuery, TaskQuery};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    let shots_dir = state.config.screenshot_dir.clone();
    let hls_dir = state.config.hls_dir.clone();

    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Task planning & execution
        .route("/api/tasks/create", post(create_tasks))
        .route("/api/tasks/run", post(run_tasks))
        .route("/api/tasks/:id/rerun", post(rerun_task))
        .route("/api/tasks/configs/rerun", post(rerun_config))
        // Task reads
        .route("/api/tasks/paged", get(tasks_paged))
        .route("/api/tasks/configs", get(task_configs))
        .route("/api/tasks/available_dates", get(available_dates))
        .route("/api/tasks/available_ips", get(available_ips))
        .route("/api/tasks/available_channels", get(available_channels))
        // Images & changes
        .route("/api/images", get(images_paged))
        .route("/api/changes", get(changes_paged))
        // Auto-schedule rules
        .route("/api/auto-schedule/rules", get(list_rules))
        .route("/api/auto-schedule/rules", post(create_rule))
        .route("/api/auto-schedule/rules/:id", put(update_rule))
        .route("/api/auto-schedule/rules/:id", delete(delete_rule))
        // NVR configuration
        .route("/api/nvr-configs", get(list_nvrs))
        .route("/api/nvr-configs", post(create_nvr))
        .route("/api/nvr-configs/:id", get(get_nvr))
        .route("/api/nvr-configs/:id", put(update_nvr))
        .route("/api/nvr-configs/:id", delete(delete_nvr))
        .route("/api/nvr-configs/:id/channels", put(upsert_channel))
        .route("/api/channels/:id", delete(delete_channel))
        // HLS
        .route("/api/hls/start", post(hls_start))
        // Static blobs
        .nest_service("/shots", ServeDir::new(shots_dir))
        .nest_service("/hls", ServeDir::new(hls_dir))
        .with_state(state)
}

// ========================================
// Task handlers
// ========================================

#[derive(Debug, Deserialize)]
struct TaskCreateRequest {
    date: String,
    base_rtsp: String,
    channel: String,
    #[serde(default = "default_interval")]
    interval_minutes: u32,
}

fn default_interval() -> u32 {
    10
}

/// Plan a day's windows and start running them.
async fn create_tasks(
    State(state): State<AppState>,
    Json(req): Json<TaskCreateRequest>,
) -> Result<impl IntoResponse> {
    let outcome = state
        .scheduler
        .run_now(RunNowRequest {
            date: req.date,
            base_rtsp: req.base_rtsp,
            channel: req.channel,
            interval_minutes: req.interval_minutes,
        })
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

async fn run_tasks(
    State(state): State<AppState>,
    Json(req): Json<RunNowRequest>,
) -> Result<impl IntoResponse> {
    let outcome = state.scheduler.run_now(req).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

async fn rerun_task(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse> {
    let outcome = state
        .scheduler
        .rerun(RerunRequest {
            task_id: Some(id),
            date: None,
            ip: None,
            channel: None,
        })
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

async fn rerun_config(
    State(state): State<AppState>,
    Json(req): Json<RerunRequest>,
) -> Result<impl IntoResponse> {
    let outcome = state.scheduler.rerun(req).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

async fn tasks_paged(
    State(state): State<AppState>,
    Query(q): Query<TaskQuery>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.queries.tasks_paged(&q).await?))
}

async fn task_configs(
    State(state): State<AppState>,
    Query(q): Query<TaskQuery>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.queries.task_configs_paged(&q).await?))
}

async fn available_dates(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let dates = state.planner.repository().available_dates().await?;
    Ok(Json(serde_json::json!({ "dates": dates })))
}

async fn available_ips(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let ips = state.planner.repository().available_ips().await?;
    Ok(Json(serde_json::json!({ "ips": ips })))
}

async fn available_channels(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let channels = state.planner.repository().available_channels().await?;
    Ok(Json(serde_json::json!({ "channels": channels })))
}

// ========================================
// Image & change handlers
// ========================================

async fn images_paged(
    State(state): State<AppState>,
    Query(q): Query<ImageQuery>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.queries.images_paged(&q).await?))
}

async fn changes_paged(
    State(state): State<AppState>,
    Query(q): Query<ChangeQuery>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.queries.changes_paged(&q).await?))
}

// ========================================
// Auto-rule handlers
// ========================================

async fn list_rules(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let rules = state.scheduler.rules().get_all().await?;
    Ok(Json(ApiResponse::success(rules)))
}

async fn create_rule(
    State(state): State<AppState>,
    Json(req): Json<AutoRuleCreate>,
) -> Result<impl IntoResponse> {
    let rule = state.scheduler.create_rule(req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(rule))))
}

async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<AutoRuleUpdate>,
) -> Result<impl IntoResponse> {
    state.scheduler.rules().set_enabled(id, req.is_enabled).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse> {
    state.scheduler.rules().delete(id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// ========================================
// NVR configuration handlers
// ========================================

async fn list_nvrs(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let nvrs = state.config_store.service().list_nvrs().await?;
    Ok(Json(ApiResponse::success(nvrs)))
}

async fn get_nvr(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse> {
    let nvr = state.config_store.service().get_nvr(id).await?;
    Ok(Json(ApiResponse::success(nvr)))
}

async fn create_nvr(
    State(state): State<AppState>,
    Json(req): Json<NvrConfigRequest>,
) -> Result<impl IntoResponse> {
    let nvr = state.config_store.service().create_nvr(req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(nvr))))
}

async fn update_nvr(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<NvrConfigRequest>,
) -> Result<impl IntoResponse> {
    let nvr = state.config_store.service().update_nvr(id, req).await?;
    Ok(Json(ApiResponse::success(nvr)))
}

async fn delete_nvr(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse> {
    state.config_store.service().delete_nvr(id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn upsert_channel(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<ChannelConfigRequest>,
) -> Result<impl IntoResponse> {
    let channel = state.config_store.service().upsert_channel(id, req).await?;
    Ok(Json(ApiResponse::success(channel)))
}

async fn delete_channel(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse> {
    state.config_store.service().delete_channel(id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// ========================================
// HLS handlers
// ========================================

#[derive(Debug, Deserialize)]
struct HlsStartRequest {
    rtsp_url: String,
}

async fn hls_start(
    State(state): State<AppState>,
    Json(req): Json<HlsStartRequest>,
) -> Result<impl IntoResponse> {
    if !req.rtsp_url.starts_with("rtsp://") {
        return Err(crate::error::Error::InvalidInput(format!(
            "not an rtsp url: {}",
            req.rtsp_url
        )));
    }

    let m3u8 = state.hls.start(&req.rtsp_url).await?;
    Ok(Json(serde_json::json!({ "m3u8": m3u8 })))
}
