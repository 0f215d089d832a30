//! parkwatch server
//!
//! Main entry point: wires the components, starts the background loops and
//! serves the REST API.

use parkwatch::auto_scheduler::{AutoRuleRepository, AutoScheduler};
use parkwatch::blob_store::BlobStore;
use parkwatch::capture_engine::{CaptureEngine, EngineSettings};
use parkwatch::change_engine::ChangeEngine;
use parkwatch::config_store::ConfigStore;
use parkwatch::detector::DetectorClient;
use parkwatch::hls_gateway::HlsGateway;
use parkwatch::query_facade::QueryFacade;
use parkwatch::snapshot_service::SnapshotRepository;
use parkwatch::state::{AppConfig, AppState};
use parkwatch::task_planner::{TaskPlanner, TaskRepository};
use parkwatch::wall_clock::WallClock;
use parkwatch::{db, web_api};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parkwatch=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting parkwatch v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        detector_url = %config.detector_url,
        wall_timezone = %config.wall_timezone,
        max_combo_concurrency = config.max_combo_concurrency,
        max_workers_per_combo = config.max_workers_per_combo,
        "Configuration loaded"
    );

    let pool = db::connect(&config.database_url).await?;
    db::bootstrap_schema(&pool).await?;
    tracing::info!("Database connected");

    let clock = WallClock::new(&config.wall_timezone)?;

    let config_store = Arc::new(ConfigStore::new(
        pool.clone(),
        config.reference_width,
        config.reference_height,
    ));
    let blob_store = Arc::new(BlobStore::new(config.screenshot_dir.clone()).await?);
    let detector = Arc::new(DetectorClient::new(
        config.detector_url.clone(),
        config.reference_width,
        config.reference_height,
    ));

    let task_repository = TaskRepository::new(pool.clone());
    let snapshot_repository = SnapshotRepository::new(pool.clone());

    let planner = Arc::new(TaskPlanner::new(task_repository.clone(), clock.clone()));

    let engine = Arc::new(CaptureEngine::new(
        task_repository.clone(),
        snapshot_repository.clone(),
        config_store.clone(),
        blob_store.clone(),
        detector.clone(),
        config.max_combo_concurrency,
        config.max_workers_per_combo,
        EngineSettings {
            rtsp_connect_timeout_sec: config.rtsp_connect_timeout_sec,
            task_retry_count: config.task_retry_count,
            task_deadline_factor: config.task_deadline_factor,
            frame_width: config.reference_width,
            frame_height: config.reference_height,
        },
    ));
    engine.start().await;
    tracing::info!("Capture engine started");

    let change_engine = Arc::new(ChangeEngine::new(snapshot_repository.clone()));
    change_engine.start().await;
    tracing::info!("Change engine started");

    let scheduler = Arc::new(AutoScheduler::new(
        AutoRuleRepository::new(pool.clone()),
        planner.clone(),
        engine.clone(),
        clock.clone(),
    ));
    scheduler.start().await;
    tracing::info!("Auto scheduler started");

    let hls = HlsGateway::new(config.hls_dir.clone(), config.hls_idle_timeout_sec).await?;
    hls.start_reaper().await;
    tracing::info!("HLS gateway started");

    let queries = Arc::new(QueryFacade::new(pool.clone(), blob_store.clone()));

    let state = AppState {
        pool,
        config: config.clone(),
        clock,
        config_store,
        blob_store,
        planner,
        detector,
        engine: engine.clone(),
        change_engine: change_engine.clone(),
        scheduler: scheduler.clone(),
        hls: hls.clone(),
        queries,
    };

    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // Cooperative drain: stop intake, let in-flight captures finish.
    scheduler.stop().await;
    change_engine.stop().await;
    engine.shutdown().await;
    hls.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}
