//! Detector - Occupancy Inference Adapter
//!
//! ## Responsibilities
//!
//! - Send one frame plus its rescaled parking-space boxes to the inference
//!   service, one request per frame
//! - Rescale reference-frame (1920x1080) boxes to the actual frame size
//! - Store the per-space verdicts verbatim; thresholding belongs to the
//!   detector, not to this adapter
//! - Render the annotated copy of the frame

pub mod annotate;

use crate::config_store::ParkingSpace;
use crate::error::{Error, Result};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A parking space rescaled into the coordinates of a concrete frame
#[derive(Debug, Clone, Serialize)]
pub struct ScaledSpace {
    pub space_id: String,
    pub space_name: String,
    /// [x1, y1, x2, y2] in frame pixels
    pub bbox: [i32; 4],
}

/// Per-space verdict from the inference service.
///
/// `occupied = None` means the detector saw nothing crossing its minimum
/// IoU against the box; confidence is absent in that case.
#[derive(Debug, Clone, Deserialize)]
pub struct SpaceVerdict {
    pub space_id: String,
    #[serde(default)]
    pub occupied: Option<bool>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    spaces: Vec<SpaceVerdict>,
}

/// One space's state as the pipeline stores it
#[derive(Debug, Clone)]
pub struct SpaceObservation {
    pub space_id: String,
    pub space_name: String,
    pub bbox: [i32; 4],
    pub occupied: Option<bool>,
    pub confidence: Option<f32>,
}

/// Detector HTTP adapter
pub struct DetectorClient {
    client: reqwest::Client,
    base_url: String,
    reference_width: u32,
    reference_height: u32,
}

impl DetectorClient {
    pub fn new(base_url: String, reference_width: u32, reference_height: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url,
            reference_width,
            reference_height,
        }
    }

    /// Rescale a reference bbox to `frame_w x frame_h`.
    pub fn rescale_bbox(&self, bbox: [i32; 4], frame_w: u32, frame_h: u32) -> [i32; 4] {
        let sx = frame_w as f64 / self.reference_width as f64;
        let sy = frame_h as f64 / self.reference_height as f64;
        [
            (bbox[0] as f64 * sx).round() as i32,
            (bbox[1] as f64 * sy).round() as i32,
            (bbox[2] as f64 * sx).round() as i32,
            (bbox[3] as f64 * sy).round() as i32,
        ]
    }

    /// Rescale the channel's spaces into frame coordinates, preserving order.
    pub fn scale_spaces(
        &self,
        spaces: &[ParkingSpace],
        frame_w: u32,
        frame_h: u32,
    ) -> Vec<ScaledSpace> {
        spaces
            .iter()
            .map(|s| ScaledSpace {
                space_id: s.space_id.clone(),
                space_name: s.space_name.clone(),
                bbox: self.rescale_bbox(s.bbox(), frame_w, frame_h),
            })
            .collect()
    }

    /// One inference round trip for one frame.
    pub async fn detect(
        &self,
        frame_jpeg: Vec<u8>,
        scaled: &[ScaledSpace],
    ) -> Result<Vec<SpaceObservation>> {
        let spaces_json = serde_json::to_string(scaled)?;
        let form = Form::new()
            .part(
                "image",
                Part::bytes(frame_jpeg)
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")
                    .map_err(|e| Error::Internal(format!("multipart build failed: {}", e)))?,
            )
            .text("spaces", spaces_json);

        let url = format!("{}/api/detect", self.base_url);
        let resp = self.client.post(&url).multipart(form).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Decoder(format!(
                "detector returned {}",
                resp.status()
            )));
        }
        let body: DetectResponse = resp.json().await?;

        // Merge verdicts back onto the ordered space list; a space the
        // detector failed to mention is unknown.
        let observations = scaled
            .iter()
            .map(|s| {
                let verdict = body.spaces.iter().find(|v| v.space_id == s.space_id);
                SpaceObservation {
                    space_id: s.space_id.clone(),
                    space_name: s.space_name.clone(),
                    bbox: s.bbox,
                    occupied: verdict.and_then(|v| v.occupied),
                    confidence: verdict.and_then(|v| v.confidence),
                }
            })
            .collect();
        Ok(observations)
    }

    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/healthz", self.base_url);
        let resp = self.client.get(&url).send().await?;
        Ok(resp.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> DetectorClient {
        DetectorClient::new("http://127.0.0.1:9000".to_string(), 1920, 1080)
    }

    #[test]
    fn test_rescale_identity_at_reference_size() {
        let c = client();
        assert_eq!(c.rescale_bbox([100, 200, 300, 400], 1920, 1080), [100, 200, 300, 400]);
    }

    #[test]
    fn test_rescale_half_resolution() {
        let c = client();
        assert_eq!(c.rescale_bbox([100, 200, 301, 401], 960, 540), [50, 100, 151, 201]);
    }

    #[test]
    fn test_rescale_rounds_not_truncates() {
        let c = client();
        // 1919 * 960/1920 = 959.5 -> rounds to 960
        assert_eq!(c.rescale_bbox([1919, 0, 1920, 1], 960, 540)[0], 960);
    }
}
