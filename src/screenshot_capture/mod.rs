//! ScreenshotCapture - Single-Frame Grab from RTSP Replay
//!
//! ## Responsibilities
//!
//! - Pull one keyframe from an NVR replay URL via ffmpeg
//! - Normalise the frame to the 1920x1080 reference resolution
//! - Classify failures: connect/read problems are transport (retryable),
//!   a stream that produced bytes ffmpeg could not decode is a decoder
//!   failure (not retryable)
//!
//! ffmpeg children are spawned with kill_on_drop so a timeout that cancels
//! the future also reaps the process; unresponsive NVRs cannot accumulate
//! zombies.

use crate::error::{Error, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Frame grab parameters for one capture window
#[derive(Debug, Clone)]
pub struct CaptureSpec {
    pub rtsp_url: String,
    /// RTSP connect limit in seconds
    pub connect_timeout_sec: u64,
    /// Read limit: min(30s, window duration)
    pub read_timeout_sec: u64,
    /// Output width/height the frame is scaled to
    pub width: u32,
    pub height: u32,
}

/// Grab one frame as JPEG bytes.
pub async fn capture_frame(spec: &CaptureSpec) -> Result<Vec<u8>> {
    let stimeout_us = (spec.connect_timeout_sec * 1_000_000).to_string();
    let scale = format!(
        "scale={}:{}:force_original_aspect_ratio=decrease,pad={}:{}:(ow-iw)/2:(oh-ih)/2",
        spec.width, spec.height, spec.width, spec.height
    );

    // -frames:v 1 stops after the first decodable frame; MJPEG to stdout.
    let child = Command::new("ffmpeg")
        .args([
            "-rtsp_transport",
            "tcp",
            "-stimeout",
            &stimeout_us,
            "-i",
            &spec.rtsp_url,
            "-frames:v",
            "1",
            "-vf",
            &scale,
            "-f",
            "image2pipe",
            "-vcodec",
            "mjpeg",
            "-loglevel",
            "error",
            "-y",
            "-",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Transport(format!("ffmpeg spawn failed: {}", e)))?;

    let total = Duration::from_secs(spec.connect_timeout_sec + spec.read_timeout_sec);
    match tokio::time::timeout(total, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(classify_ffmpeg_failure(stderr.trim()));
            }
            if output.stdout.is_empty() {
                return Err(Error::Decoder("ffmpeg produced no frame".to_string()));
            }
            Ok(output.stdout)
        }
        Ok(Err(e)) => Err(Error::Transport(format!("ffmpeg wait failed: {}", e))),
        Err(_) => {
            tracing::warn!(
                rtsp_url = %spec.rtsp_url,
                timeout_sec = total.as_secs(),
                "frame grab timeout, ffmpeg killed via kill_on_drop"
            );
            Err(Error::Transport("timeout".to_string()))
        }
    }
}

/// Quick readability probe: decode one second and discard it.
pub async fn probe_rtsp(rtsp_url: &str, timeout_sec: u64) -> Result<()> {
    let stimeout_us = (timeout_sec * 1_000_000).to_string();
    let child = Command::new("ffmpeg")
        .args([
            "-rtsp_transport",
            "tcp",
            "-stimeout",
            &stimeout_us,
            "-i",
            rtsp_url,
            "-t",
            "1",
            "-f",
            "null",
            "-loglevel",
            "error",
            "-",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Transport(format!("ffmpeg spawn failed: {}", e)))?;

    match tokio::time::timeout(
        Duration::from_secs(timeout_sec + 2),
        child.wait_with_output(),
    )
    .await
    {
        Ok(Ok(output)) if output.status.success() => Ok(()),
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::Transport(format!("probe failed: {}", stderr.trim())))
        }
        Ok(Err(e)) => Err(Error::Transport(format!("ffmpeg wait failed: {}", e))),
        Err(_) => Err(Error::Transport("probe timeout".to_string())),
    }
}

/// Split transport problems from decode problems on the ffmpeg stderr.
fn classify_ffmpeg_failure(stderr: &str) -> Error {
    let lower = stderr.to_ascii_lowercase();
    let transport_markers = [
        "connection refused",
        "connection timed out",
        "connection reset",
        "no route to host",
        "network is unreachable",
        "host is unreachable",
        "timed out",
        "timeout",
        "401 unauthorized",
        "453 not enough bandwidth",
        "broken pipe",
        "end of file",
    ];
    if transport_markers.iter().any(|m| lower.contains(m)) {
        return Error::Transport(stderr.chars().take(300).collect());
    }
    if stderr.is_empty() {
        return Error::Decoder("undecodable stream".to_string());
    }
    Error::Decoder(stderr.chars().take(300).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failures_are_retryable() {
        let e = classify_ffmpeg_failure("rtsp://10.0.0.1: Connection refused");
        assert!(e.is_transient());
        let e = classify_ffmpeg_failure("Connection timed out");
        assert!(e.is_transient());
    }

    #[test]
    fn test_decode_failures_are_not_retryable() {
        let e = classify_ffmpeg_failure("Invalid data found when processing input");
        assert!(!e.is_transient());
        assert!(matches!(e, Error::Decoder(_)));
        let e = classify_ffmpeg_failure("");
        assert!(matches!(e, Error::Decoder(_)));
    }
}
