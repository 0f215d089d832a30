//! SnapshotService - Capture Persistence
//!
//! ## Responsibilities
//!
//! - Transactional write of a completed capture: snapshot row, per-space
//!   states, and the task's `playing -> screenshot_taken` transition
//! - Snapshot reads for the change engine (predecessor lookup, pending
//!   change queue)

mod repository;
mod types;

pub use repository::SnapshotRepository;
pub use types::*;
