//! ConfigStore service
//!
//! Validation on top of the repository.

use super::repository::ConfigRepository;
use super::types::*;
use crate::error::{Error, Result};
use crate::rtsp_url::normalize_channel;

/// ConfigStore business logic
pub struct ConfigService {
    repository: ConfigRepository,
    reference_width: u32,
    reference_height: u32,
}

impl ConfigService {
    pub fn new(repository: ConfigRepository, reference_width: u32, reference_height: u32) -> Self {
        Self {
            repository,
            reference_width,
            reference_height,
        }
    }

    pub fn repository(&self) -> &ConfigRepository {
        &self.repository
    }

    fn validate_bbox(&self, space: &ParkingSpaceRequest) -> Result<()> {
        let [x1, y1, x2, y2] = space.bbox;
        let w = self.reference_width as i32;
        let h = self.reference_height as i32;
        if !(0 <= x1 && x1 < x2 && x2 <= w && 0 <= y1 && y1 < y2 && y2 <= h) {
            return Err(Error::InvalidInput(format!(
                "space {} bbox {:?} out of {}x{} reference frame",
                space.space_id, space.bbox, w, h
            )));
        }
        Ok(())
    }

    pub async fn list_nvrs(&self) -> Result<Vec<NvrView>> {
        let nvrs = self.repository.get_all_nvrs().await?;
        let mut views = Vec::with_capacity(nvrs.len());
        for nvr in nvrs {
            views.push(self.build_view(nvr).await?);
        }
        Ok(views)
    }

    pub async fn get_nvr(&self, id: u64) -> Result<NvrView> {
        let nvr = self
            .repository
            .get_nvr(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("NVR {} not found", id)))?;
        self.build_view(nvr).await
    }

    async fn build_view(&self, nvr: NvrConfig) -> Result<NvrView> {
        let channels = self.repository.get_channels(nvr.id).await?;
        let mut channel_views = Vec::with_capacity(channels.len());
        for channel in channels {
            let parking_spaces = self.repository.get_spaces(channel.id).await?;
            channel_views.push(ChannelView {
                channel,
                parking_spaces,
            });
        }
        Ok(NvrView {
            nvr,
            channels: channel_views,
        })
    }

    pub async fn create_nvr(&self, req: NvrConfigRequest) -> Result<NvrConfig> {
        if req.nvr_ip.trim().is_empty() {
            return Err(Error::InvalidInput("nvr_ip is required".to_string()));
        }
        self.repository.create_nvr(&req).await
    }

    pub async fn update_nvr(&self, id: u64, req: NvrConfigRequest) -> Result<NvrConfig> {
        self.repository.update_nvr(id, &req).await
    }

    pub async fn delete_nvr(&self, id: u64) -> Result<()> {
        self.repository.delete_nvr(id).await
    }

    pub async fn upsert_channel(
        &self,
        nvr_config_id: u64,
        req: ChannelConfigRequest,
    ) -> Result<ChannelView> {
        let channel_code = normalize_channel(&req.channel_code)?;
        for space in &req.parking_spaces {
            self.validate_bbox(space)?;
        }
        if self.repository.get_nvr(nvr_config_id).await?.is_none() {
            return Err(Error::NotFound(format!("NVR {} not found", nvr_config_id)));
        }

        let channel_id = self
            .repository
            .upsert_channel(nvr_config_id, &req, &channel_code)
            .await?;
        let channel = self
            .repository
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| Error::NotFound("channel not found after upsert".to_string()))?;
        let parking_spaces = self.repository.get_spaces(channel_id).await?;
        Ok(ChannelView {
            channel,
            parking_spaces,
        })
    }

    pub async fn delete_channel(&self, id: u64) -> Result<()> {
        self.repository.delete_channel(id).await
    }

    /// Spaces for a capture combo, empty when the channel is unconfigured.
    pub async fn spaces_for_capture(
        &self,
        camera_ip: &str,
        channel_code: &str,
    ) -> Result<Vec<ParkingSpace>> {
        match self
            .repository
            .find_channel_for_capture(camera_ip, channel_code)
            .await?
        {
            Some(channel) => self.repository.get_spaces(channel.id).await,
            None => Ok(Vec::new()),
        }
    }
}
