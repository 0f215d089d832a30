//! CaptureEngine - Bounded Concurrent Task Execution
//!
//! ## Responsibilities
//!
//! - Run due capture tasks under two layered permit caps
//!   (MAX_COMBO_CONCURRENCY globally, MAX_WORKERS_PER_COMBO per camera)
//! - Per-task pipeline: claim -> grab frame -> detect -> persist blobs ->
//!   transactional snapshot write
//! - Transport retries with 2s backoff; decoder failures fail immediately
//! - Per-task wall deadline `max(30s, factor x window)`
//! - Background sweeps: stalled-playing reaper, hourly failed-task retry,
//!   pending-combo autorunner
//! - Cooperative drain on shutdown: acquisitions fail at once, in-flight
//!   tasks get 15 seconds, stragglers are recovered by the reaper
//!
//! Completion order within a combo is not submission order (decode latency
//! varies); the change engine re-sorts by `detected_at`.

mod limiter;

pub use limiter::{ComboLimiter, ComboPermit};

use crate::blob_store::BlobStore;
use crate::config_store::ConfigStore;
use crate::detector::{annotate, DetectorClient, SpaceObservation};
use crate::error::{Error, Result};
use crate::rtsp_url::{ComboKey, ReplayUrl};
use crate::screenshot_capture::{capture_frame, CaptureSpec};
use crate::snapshot_service::SnapshotRepository;
use crate::task_planner::{TaskRepository, TaskRow};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};

const TRANSPORT_RETRY_BACKOFF: Duration = Duration::from_secs(2);
const REAPER_INTERVAL: Duration = Duration::from_secs(60);
const FAILED_RETRY_INTERVAL: Duration = Duration::from_secs(3600);
const AUTORUN_INTERVAL: Duration = Duration::from_secs(5);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Engine tuning, injected at construction
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub rtsp_connect_timeout_sec: u64,
    pub task_retry_count: u32,
    pub task_deadline_factor: u32,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// CaptureEngine instance
pub struct CaptureEngine {
    tasks: TaskRepository,
    snapshots: SnapshotRepository,
    config_store: Arc<ConfigStore>,
    blob_store: Arc<BlobStore>,
    detector: Arc<DetectorClient>,
    limiter: Arc<ComboLimiter>,
    settings: EngineSettings,
    /// Tasks queued or running, to keep the autorunner from re-submitting
    queued: Arc<Mutex<HashSet<u64>>>,
    active: Arc<AtomicUsize>,
    idle_notify: Arc<Notify>,
    running: Arc<RwLock<bool>>,
}

impl CaptureEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: TaskRepository,
        snapshots: SnapshotRepository,
        config_store: Arc<ConfigStore>,
        blob_store: Arc<BlobStore>,
        detector: Arc<DetectorClient>,
        max_combo_concurrency: usize,
        max_workers_per_combo: usize,
        settings: EngineSettings,
    ) -> Self {
        Self {
            tasks,
            snapshots,
            config_store,
            blob_store,
            detector,
            limiter: Arc::new(ComboLimiter::new(
                max_combo_concurrency,
                max_workers_per_combo,
            )),
            settings,
            queued: Arc::new(Mutex::new(HashSet::new())),
            active: Arc::new(AtomicUsize::new(0)),
            idle_notify: Arc::new(Notify::new()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Number of workers currently holding permits
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Queue one task for execution. Duplicate submissions while the task
    /// is queued or running are dropped.
    pub async fn submit(self: &Arc<Self>, task_id: u64) {
        {
            let mut queued = self.queued.lock().await;
            if !queued.insert(task_id) {
                return;
            }
        }

        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_one(task_id).await;
            let mut queued = engine.queued.lock().await;
            queued.remove(&task_id);
        });
    }

    /// Submit a batch, in segment order.
    pub async fn submit_all(self: &Arc<Self>, task_ids: &[u64]) {
        for &id in task_ids {
            self.submit(id).await;
        }
    }

    async fn run_one(self: &Arc<Self>, task_id: u64) {
        let task = match self.tasks.get_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::warn!(task_id, "Submitted task no longer exists");
                return;
            }
            Err(e) => {
                tracing::error!(task_id, error = %e, "Task fetch failed");
                return;
            }
        };

        let combo = match self.combo_of(&task) {
            Ok(combo) => combo,
            Err(e) => {
                tracing::error!(task_id, error = %e, "Task has no parsable combo");
                return;
            }
        };

        // Global permit first, then the combo's; both release on drop.
        let _permit = match self.limiter.acquire(&combo).await {
            Ok(p) => p,
            Err(_) => {
                tracing::debug!(task_id, "Engine draining, submission dropped");
                return;
            }
        };

        // Conditional claim: zero rows means another worker owns the task.
        match self.tasks.claim_for_run(task_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(task_id, "Task already claimed, skipping");
                return;
            }
            Err(e) => {
                tracing::error!(task_id, error = %e, "Claim failed");
                return;
            }
        }

        self.active.fetch_add(1, Ordering::SeqCst);
        let deadline = Duration::from_secs(
            (self.settings.task_deadline_factor as i64 * task.duration_sec()).max(30) as u64,
        );

        let outcome = tokio::time::timeout(deadline, self.run_pipeline(&task, &combo)).await;
        match outcome {
            Ok(Ok(snapshot_id)) => {
                tracing::info!(
                    task_id,
                    snapshot_id,
                    combo = %combo,
                    "Capture completed"
                );
            }
            Ok(Err(Error::Conflict(msg))) => {
                // e.g. the reaper failed the task mid-write; expected
                tracing::warn!(task_id, %msg, "Capture result discarded");
            }
            Ok(Err(e)) => {
                let error = e.task_error_string();
                tracing::warn!(task_id, combo = %combo, error = %error, "Capture failed");
                if let Err(e) = self.tasks.mark_failed(task_id, &error).await {
                    tracing::error!(task_id, error = %e, "Failed to record task failure");
                }
            }
            Err(_) => {
                tracing::warn!(
                    task_id,
                    combo = %combo,
                    deadline_sec = deadline.as_secs(),
                    "Task deadline exceeded"
                );
                if let Err(e) = self.tasks.mark_failed(task_id, "deadline").await {
                    tracing::error!(task_id, error = %e, "Failed to record deadline failure");
                }
            }
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.idle_notify.notify_waiters();
    }

    fn combo_of(&self, task: &TaskRow) -> Result<ComboKey> {
        match (&task.ip, &task.channel) {
            (Some(ip), Some(channel)) => Ok(ComboKey {
                ip: ip.clone(),
                channel: channel.clone(),
            }),
            _ => Ok(ReplayUrl::parse(&task.rtsp_url)?.combo()),
        }
    }

    /// Steps 2-6 of the per-task pipeline. The caller owns the permits and
    /// the deadline.
    async fn run_pipeline(&self, task: &TaskRow, combo: &ComboKey) -> Result<u64> {
        let spec = CaptureSpec {
            rtsp_url: task.rtsp_url.clone(),
            connect_timeout_sec: self.settings.rtsp_connect_timeout_sec,
            read_timeout_sec: (task.duration_sec().clamp(1, 30)) as u64,
            width: self.settings.frame_width,
            height: self.settings.frame_height,
        };

        let frame = self.capture_with_retries(&spec, task.id).await?;
        let (frame_w, frame_h) = annotate::frame_dimensions(&frame)?;

        let spaces = self
            .config_store
            .service()
            .spaces_for_capture(&combo.ip, &combo.channel)
            .await?;
        let scaled = self.detector.scale_spaces(&spaces, frame_w, frame_h);

        let observations: Vec<SpaceObservation> = if scaled.is_empty() {
            Vec::new()
        } else {
            self.detector
                .detect(frame.clone(), &scaled)
                .await
                .map_err(|e| Error::Decoder(format!("detector: {}", e)))?
        };

        let rel = BlobStore::frame_rel_path(
            &task.date,
            &combo.ip,
            task.start_ts,
            task.end_ts,
            &combo.channel,
        );
        self.blob_store.put(&rel, &frame).await?;

        let annotated = annotate::render_annotated(&frame, &observations)?;
        let detected_rel = BlobStore::detected_rel_path(&rel);
        self.blob_store.put(&detected_rel, &annotated).await?;

        self.snapshots
            .record_capture(
                task.id,
                &combo.ip,
                &combo.channel,
                &rel,
                Some(&detected_rel),
                &observations,
                Utc::now(),
            )
            .await
    }

    async fn capture_with_retries(&self, spec: &CaptureSpec, task_id: u64) -> Result<Vec<u8>> {
        let mut attempt = 0u32;
        loop {
            match capture_frame(spec).await {
                Ok(frame) => return Ok(frame),
                Err(e) if e.is_transient() && attempt < self.settings.task_retry_count => {
                    attempt += 1;
                    tracing::warn!(
                        task_id,
                        attempt,
                        error = %e,
                        "Transport failure, retrying"
                    );
                    tokio::time::sleep(TRANSPORT_RETRY_BACKOFF).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ========================================
    // Background loops
    // ========================================

    /// Start the reaper, failed-retry and pending-autorun loops.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Capture engine already running");
                return;
            }
            *running = true;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                if !*engine.running.read().await {
                    break;
                }
                match engine.tasks.sweep_stalled_playing().await {
                    Ok(0) => {}
                    Ok(n) => tracing::warn!(swept = n, "Stalled playing tasks failed by reaper"),
                    Err(e) => tracing::error!(error = %e, "Reaper sweep failed"),
                }
                tokio::time::sleep(REAPER_INTERVAL).await;
            }
        });

        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(FAILED_RETRY_INTERVAL).await;
                if !*engine.running.read().await {
                    break;
                }
                match engine.tasks.failed_tasks_due_for_retry().await {
                    Ok(ids) if !ids.is_empty() => {
                        tracing::info!(count = ids.len(), "Re-submitting failed tasks");
                        engine.submit_all(&ids).await;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Failed-task sweep failed"),
                }
            }
        });

        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                if !*engine.running.read().await {
                    break;
                }
                if let Err(e) = engine.autorun_pending().await {
                    tracing::warn!(error = %e, "Pending autorun failed");
                }
                tokio::time::sleep(AUTORUN_INTERVAL).await;
            }
        });
    }

    async fn autorun_pending(self: &Arc<Self>) -> Result<()> {
        use crate::models::TaskStatus;
        let combos = self.tasks.combos_with_pending().await?;
        for (date, ip, channel) in combos {
            let tasks = self
                .tasks
                .tasks_in_states(&date, Some(&ip), Some(&channel), &[TaskStatus::Pending])
                .await?;
            for task in tasks {
                self.submit(task.id).await;
            }
        }
        Ok(())
    }

    /// Cooperative drain: fail new acquisitions at once, give in-flight
    /// work 15 seconds, abandon the rest to the reaper.
    pub async fn shutdown(&self) {
        {
            let mut running = self.running.write().await;
            *running = false;
        }
        self.limiter.close().await;

        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while self.active.load(Ordering::SeqCst) > 0 {
            let wait = self.idle_notify.notified();
            if tokio::time::timeout_at(deadline, wait).await.is_err() {
                tracing::warn!(
                    abandoned = self.active.load(Ordering::SeqCst),
                    "Drain timeout, abandoning in-flight tasks to the reaper"
                );
                break;
            }
        }
        tracing::info!("Capture engine drained");
    }
}
