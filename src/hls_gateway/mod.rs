//! HlsGateway - On-Demand RTSP to HLS Transcoding
//!
//! ## Responsibilities
//!
//! - One ffmpeg child per request fingerprint (SHA-1 of the RTSP URL)
//! - Reuse a live child while it stays warm; refresh on every `start`
//! - Reap children idle past the timeout, delete their output directory
//!   after a grace window so last-byte consumers can finish
//! - Serialise spawns per fingerprint; rate-limit respawn storms
//!
//! The transcode forces H.264 baseline with fixed keyframes so browsers do
//! not black-screen on HEVC or raw replay streams.

use crate::error::{Error, Result};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};

const REAP_INTERVAL: Duration = Duration::from_secs(15);
/// Grace before a reaped child's directory is deleted
const DIR_DELETE_DELAY: Duration = Duration::from_secs(30);
/// A child that dies this fast never produced a usable playlist
const EARLY_EXIT_WINDOW: Duration = Duration::from_secs(2);
/// Minimum gap between spawn attempts per fingerprint
const SPAWN_MIN_GAP: Duration = Duration::from_secs(2);
/// How long to wait for the playlist to appear after spawn
const PLAYLIST_WAIT: Duration = Duration::from_secs(20);
const PLAYLIST_POLL: Duration = Duration::from_millis(500);

/// Deterministic fingerprint of an RTSP URL
pub fn fingerprint(rtsp_url: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(rtsp_url.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// Per-fingerprint spawn rate limiter
#[derive(Default)]
pub struct SpawnThrottle {
    last_attempt: HashMap<String, Instant>,
}

impl SpawnThrottle {
    /// Record and admit an attempt unless one ran within the minimum gap.
    pub fn admit(&mut self, fp: &str, now: Instant) -> bool {
        match self.last_attempt.get(fp) {
            Some(last) if now.duration_since(*last) < SPAWN_MIN_GAP => false,
            _ => {
                self.last_attempt.insert(fp.to_string(), now);
                true
            }
        }
    }
}

struct HlsEntry {
    child: Child,
    output_dir: PathBuf,
    last_access: Instant,
    spawned_at: Instant,
}

/// HlsGateway instance
pub struct HlsGateway {
    root: PathBuf,
    idle_timeout: Duration,
    registry: Mutex<HashMap<String, HlsEntry>>,
    spawn_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    throttle: Mutex<SpawnThrottle>,
    running: Arc<RwLock<bool>>,
}

impl HlsGateway {
    pub async fn new(root: PathBuf, idle_timeout_sec: u64) -> Result<Arc<Self>> {
        tokio::fs::create_dir_all(&root).await?;
        Ok(Arc::new(Self {
            root,
            idle_timeout: Duration::from_secs(idle_timeout_sec),
            registry: Mutex::new(HashMap::new()),
            spawn_locks: Mutex::new(HashMap::new()),
            throttle: Mutex::new(SpawnThrottle::default()),
            running: Arc::new(RwLock::new(false)),
        }))
    }

    fn m3u8_url(fp: &str) -> String {
        format!("/hls/{}/index.m3u8", fp)
    }

    async fn spawn_lock(&self, fp: &str) -> Arc<Mutex<()>> {
        let mut locks = self.spawn_locks.lock().await;
        locks
            .entry(fp.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Start or reuse a transcoder for the URL; returns the playlist URL.
    ///
    /// Concurrent calls for the same URL converge on one child via the
    /// per-fingerprint mutex.
    pub async fn start(&self, rtsp_url: &str) -> Result<String> {
        let fp = fingerprint(rtsp_url);
        let lock = self.spawn_lock(&fp).await;
        let _guard = lock.lock().await;

        // Reuse path: a live, warm child just gets its access refreshed.
        {
            let mut registry = self.registry.lock().await;
            if let Some(entry) = registry.get_mut(&fp) {
                let alive = entry.child.try_wait().ok().flatten().is_none();
                let early_death = !alive
                    && entry.spawned_at.elapsed() < EARLY_EXIT_WINDOW + PLAYLIST_WAIT;
                if alive && entry.last_access.elapsed() < self.idle_timeout {
                    entry.last_access = Instant::now();
                    tracing::debug!(fingerprint = %fp, "HLS child reused");
                    return Ok(Self::m3u8_url(&fp));
                }
                if early_death {
                    tracing::warn!(fingerprint = %fp, "HLS child died shortly after spawn");
                }
                // stale or dead entry: drop it and fall through to respawn
                let entry = registry.remove(&fp).unwrap();
                Self::dispose(entry, fp.clone());
            }
        }

        {
            let mut throttle = self.throttle.lock().await;
            if !throttle.admit(&fp, Instant::now()) {
                return Err(Error::Transport(format!(
                    "transcoder for {} restarting too fast, retry shortly",
                    fp
                )));
            }
        }

        let output_dir = self.root.join(&fp);
        tokio::fs::create_dir_all(&output_dir).await?;
        let mut child = spawn_transcoder(rtsp_url, &output_dir)?;
        let spawned_at = Instant::now();

        // Wait for the playlist; a child that exits first is a dead spawn.
        let m3u8_path = output_dir.join("index.m3u8");
        loop {
            if m3u8_path.exists() {
                break;
            }
            if let Ok(Some(status)) = child.try_wait() {
                let _ = tokio::fs::remove_dir_all(&output_dir).await;
                return Err(Error::Transport(format!(
                    "transcoder exited before producing a playlist ({})",
                    status
                )));
            }
            if spawned_at.elapsed() > PLAYLIST_WAIT {
                let _ = child.start_kill();
                let _ = tokio::fs::remove_dir_all(&output_dir).await;
                return Err(Error::Transport(
                    "transcoder produced no playlist in time".to_string(),
                ));
            }
            tokio::time::sleep(PLAYLIST_POLL).await;
        }

        tracing::info!(fingerprint = %fp, dir = %output_dir.display(), "HLS child started");
        let mut registry = self.registry.lock().await;
        registry.insert(
            fp.clone(),
            HlsEntry {
                child,
                output_dir,
                last_access: Instant::now(),
                spawned_at,
            },
        );
        Ok(Self::m3u8_url(&fp))
    }

    /// Kill a child and schedule its directory for delayed deletion.
    fn dispose(mut entry: HlsEntry, fp: String) {
        let _ = entry.child.start_kill();
        let dir = entry.output_dir.clone();
        tokio::spawn(async move {
            // let the child flush and any last-byte readers finish
            let _ = entry.child.wait().await;
            tokio::time::sleep(DIR_DELETE_DELAY).await;
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                tracing::debug!(fingerprint = %fp, error = %e, "HLS dir already gone");
            }
        });
    }

    /// Number of registered children (used by status endpoints and tests)
    pub async fn live_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Start the idle reaper.
    pub async fn start_reaper(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("HLS reaper already running");
                return;
            }
            *running = true;
        }

        let gateway = self.clone();
        tokio::spawn(async move {
            tracing::info!(
                idle_timeout_sec = gateway.idle_timeout.as_secs(),
                "HLS reaper started"
            );
            loop {
                if !*gateway.running.read().await {
                    break;
                }
                gateway.reap_once().await;
                tokio::time::sleep(REAP_INTERVAL).await;
            }
            tracing::info!("HLS reaper stopped");
        });
    }

    /// One reaper pass: drop idle or dead children.
    pub async fn reap_once(&self) {
        let mut registry = self.registry.lock().await;
        let stale: Vec<String> = registry
            .iter_mut()
            .filter_map(|(fp, entry)| {
                let dead = entry.child.try_wait().ok().flatten().is_some();
                let idle = entry.last_access.elapsed() > self.idle_timeout;
                (dead || idle).then(|| fp.clone())
            })
            .collect();
        for fp in stale {
            if let Some(entry) = registry.remove(&fp) {
                tracing::info!(fingerprint = %fp, "HLS child reaped");
                Self::dispose(entry, fp);
            }
        }
    }

    /// Kill everything at shutdown.
    pub async fn shutdown(&self) {
        {
            let mut running = self.running.write().await;
            *running = false;
        }
        let mut registry = self.registry.lock().await;
        for (fp, mut entry) in registry.drain() {
            let _ = entry.child.start_kill();
            tracing::debug!(fingerprint = %fp, "HLS child killed at shutdown");
        }
    }
}

/// ffmpeg RTSP -> HLS: video only, H.264 baseline, 2s segments, sliding
/// 6-entry window with segment deletion.
fn spawn_transcoder(rtsp_url: &str, output_dir: &std::path::Path) -> Result<Child> {
    let playlist = output_dir.join("index.m3u8");
    let segments = output_dir.join("index%03d.ts");
    Command::new("ffmpeg")
        .args([
            "-rtsp_transport",
            "tcp",
            "-i",
            rtsp_url,
            "-fflags",
            "nobuffer",
            "-flags",
            "low_delay",
            "-an",
            "-map",
            "0:v:0",
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-tune",
            "zerolatency",
            "-pix_fmt",
            "yuv420p",
            "-profile:v",
            "baseline",
            "-level",
            "3.1",
            "-g",
            "50",
            "-keyint_min",
            "50",
            "-sc_threshold",
            "0",
            "-force_key_frames",
            "expr:gte(t,n_forced*2)",
            "-b:v",
            "1500k",
            "-max_muxing_queue_size",
            "1024",
            "-f",
            "hls",
            "-hls_time",
            "2",
            "-hls_list_size",
            "6",
            "-hls_flags",
            "delete_segments+program_date_time",
            "-hls_segment_type",
            "mpegts",
            "-hls_segment_filename",
            segments.to_str().unwrap_or("index%03d.ts"),
            "-loglevel",
            "error",
            playlist.to_str().unwrap_or("index.m3u8"),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Transport(format!("ffmpeg spawn failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let a = fingerprint("rtsp://u:p@10.0.0.1:554/c1/b1/e2/replay/s1");
        let b = fingerprint("rtsp://u:p@10.0.0.1:554/c1/b1/e2/replay/s1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_differs_per_url() {
        assert_ne!(
            fingerprint("rtsp://10.0.0.1/c1/b1/e2/replay/s1"),
            fingerprint("rtsp://10.0.0.1/c2/b1/e2/replay/s1")
        );
    }

    #[test]
    fn test_throttle_blocks_rapid_respawns() {
        let mut throttle = SpawnThrottle::default();
        let t0 = Instant::now();
        assert!(throttle.admit("abc", t0));
        assert!(!throttle.admit("abc", t0 + Duration::from_millis(500)));
        assert!(throttle.admit("abc", t0 + Duration::from_secs(3)));
        // independent fingerprints are not throttled together
        assert!(throttle.admit("def", t0 + Duration::from_millis(100)));
    }
}
