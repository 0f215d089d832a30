//! ConfigStore - NVR / Channel / Parking-Space Configuration
//!
//! ## Responsibilities
//!
//! - CRUD over NvrConfig -> ChannelConfig -> ParkingSpace (cascade delete)
//! - Space lookup for the capture pipeline by (camera ip, channel code)
//! - Validation of channel codes and reference-frame bboxes

mod repository;
mod service;
mod types;

pub use repository::ConfigRepository;
pub use service::ConfigService;
pub use types::*;

use sqlx::MySqlPool;

/// ConfigStore facade owning the repository + service pair
pub struct ConfigStore {
    service: ConfigService,
}

impl ConfigStore {
    pub fn new(pool: MySqlPool, reference_width: u32, reference_height: u32) -> Self {
        let repository = ConfigRepository::new(pool);
        Self {
            service: ConfigService::new(repository, reference_width, reference_height),
        }
    }

    pub fn service(&self) -> &ConfigService {
        &self.service
    }
}
