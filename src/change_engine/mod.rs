//! ChangeEngine - Arrive/Leave Inference Between Consecutive Snapshots
//!
//! ## Responsibilities
//!
//! - Poll snapshots whose change inference is still pending, in
//!   `(detected_at, id)` order
//! - Re-read the immediate predecessor for the same `(ip, channel)` at diff
//!   time; completion order of the capture workers carries no meaning
//! - Apply the occupancy transition table and write the change rows plus
//!   the denormalised `change_count` in one transaction
//! - Retry transient store failures with 1s/3s/9s backoff, then abandon
//!
//! ## Transition table
//!
//! | prev  | curr  | change_type |
//! |-------|-------|-------------|
//! | false | true  | arrive      |
//! | true  | false | leave       |
//! | equal | equal | none        |
//! | null  | value | unknown     |
//! | value | null  | unknown     |
//! | null  | null  | none        |

use crate::error::Result;
use crate::models::ChangeType;
use crate::snapshot_service::{ChangeInsert, SnapshotRepository, SnapshotRow, SpaceStateRow};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const BATCH_SIZE: u32 = 10;
const RETRY_BACKOFF_SEC: [u64; 3] = [1, 3, 9];

/// Classify one space transition.
pub fn classify_transition(prev: Option<bool>, curr: Option<bool>) -> Option<ChangeType> {
    match (prev, curr) {
        (Some(false), Some(true)) => Some(ChangeType::Arrive),
        (Some(true), Some(false)) => Some(ChangeType::Leave),
        (Some(_), Some(_)) => None,
        (None, Some(_)) => Some(ChangeType::Unknown),
        (Some(_), None) => Some(ChangeType::Unknown),
        (None, None) => None,
    }
}

/// Diff the current snapshot's states against the predecessor's.
///
/// With no predecessor every space yields a baseline row with
/// `change_type = None` and the count stays 0. Otherwise the count is the
/// number of arrive/leave/unknown rows.
pub fn compute_changes(
    prev_snapshot_id: Option<u64>,
    prev_states: &HashMap<String, Option<bool>>,
    curr_states: &[SpaceStateRow],
) -> (Vec<ChangeInsert>, i32) {
    let mut rows = Vec::with_capacity(curr_states.len());
    let mut count = 0i32;

    for state in curr_states {
        let change_type = match prev_snapshot_id {
            None => None,
            Some(_) => {
                let prev = prev_states.get(&state.space_id).copied().flatten();
                classify_transition(prev, state.occupied)
            }
        };
        if change_type.is_some() {
            count += 1;
        }
        rows.push(ChangeInsert {
            prev_snapshot_id,
            space_id: state.space_id.clone(),
            space_name: state.space_name.clone(),
            prev_occupied: match prev_snapshot_id {
                None => None,
                Some(_) => prev_states.get(&state.space_id).copied().flatten(),
            },
            curr_occupied: state.occupied,
            change_type: change_type.map(|c| c.as_str()),
            detection_confidence: state.confidence,
        });
    }
    (rows, count)
}

/// ChangeEngine instance
pub struct ChangeEngine {
    repository: SnapshotRepository,
    running: Arc<RwLock<bool>>,
}

impl ChangeEngine {
    pub fn new(repository: SnapshotRepository) -> Self {
        Self {
            repository,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the background worker loop.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Change engine already running");
                return;
            }
            *running = true;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            tracing::info!("Change engine worker started");
            loop {
                {
                    let running = engine.running.read().await;
                    if !*running {
                        break;
                    }
                }
                match engine.drain_pending().await {
                    Ok(0) => tokio::time::sleep(POLL_INTERVAL).await,
                    Ok(n) => tracing::debug!(processed = n, "Change batch processed"),
                    Err(e) => {
                        tracing::error!(error = %e, "Change batch failed");
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                }
            }
            tracing::info!("Change engine worker stopped");
        });
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// Process one batch of pending snapshots; returns how many were handled.
    pub async fn drain_pending(&self) -> Result<usize> {
        let batch = self.repository.pending_change_batch(BATCH_SIZE).await?;
        let n = batch.len();
        for snapshot in batch {
            self.process_snapshot(snapshot).await;
        }
        Ok(n)
    }

    /// Diff one snapshot against its predecessor, with the retry schedule.
    async fn process_snapshot(&self, snapshot: SnapshotRow) {
        let snapshot_id = snapshot.id;
        let mut last_error = None;

        for (attempt, backoff_sec) in RETRY_BACKOFF_SEC.iter().enumerate() {
            match self.infer_and_write(&snapshot).await {
                Ok(change_count) => {
                    tracing::info!(
                        snapshot_id,
                        ip = snapshot.ip.as_deref().unwrap_or(""),
                        channel = snapshot.channel.as_deref().unwrap_or(""),
                        change_count,
                        "Change inference committed"
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        snapshot_id,
                        attempt = attempt + 1,
                        error = %e,
                        "Change write failed, backing off"
                    );
                    last_error = Some(e);
                    tokio::time::sleep(Duration::from_secs(*backoff_sec)).await;
                }
            }
        }

        let error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        tracing::error!(snapshot_id, error = %error, "Change inference abandoned");
        if let Err(e) = self.repository.mark_change_failed(snapshot_id, &error).await {
            tracing::error!(snapshot_id, error = %e, "Failed to record change failure");
        }
    }

    async fn infer_and_write(&self, snapshot: &SnapshotRow) -> Result<i32> {
        let curr_states = self.repository.space_states_of(snapshot.id).await?;

        let prev = match (snapshot.ip.as_deref(), snapshot.channel.as_deref()) {
            (Some(ip), Some(channel)) => {
                self.repository
                    .previous_done_snapshot(ip, channel, snapshot.detected_at, snapshot.id)
                    .await?
            }
            _ => None,
        };

        let (prev_snapshot_id, prev_states) = match &prev {
            Some(p) => {
                let states = self.repository.space_states_of(p.id).await?;
                let map: HashMap<String, Option<bool>> = states
                    .into_iter()
                    .map(|s| (s.space_id, s.occupied))
                    .collect();
                (Some(p.id), map)
            }
            None => (None, HashMap::new()),
        };

        let (rows, change_count) = compute_changes(prev_snapshot_id, &prev_states, &curr_states);
        self.repository
            .complete_change_write(snapshot, &rows, change_count)
            .await?;
        Ok(change_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(space: &str, occupied: Option<bool>, confidence: Option<f32>) -> SpaceStateRow {
        SpaceStateRow {
            id: 0,
            snapshot_id: 0,
            space_id: space.to_string(),
            space_name: space.to_string(),
            occupied,
            confidence,
        }
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(
            classify_transition(Some(false), Some(true)),
            Some(ChangeType::Arrive)
        );
        assert_eq!(
            classify_transition(Some(true), Some(false)),
            Some(ChangeType::Leave)
        );
        assert_eq!(classify_transition(Some(true), Some(true)), None);
        assert_eq!(classify_transition(Some(false), Some(false)), None);
        assert_eq!(
            classify_transition(None, Some(true)),
            Some(ChangeType::Unknown)
        );
        assert_eq!(
            classify_transition(None, Some(false)),
            Some(ChangeType::Unknown)
        );
        assert_eq!(
            classify_transition(Some(true), None),
            Some(ChangeType::Unknown)
        );
        assert_eq!(
            classify_transition(Some(false), None),
            Some(ChangeType::Unknown)
        );
        assert_eq!(classify_transition(None, None), None);
    }

    #[test]
    fn test_arrival_counts_once() {
        // S3: prev has A free, current has A occupied
        let mut prev = HashMap::new();
        prev.insert("A".to_string(), Some(false));
        let curr = vec![state("A", Some(true), Some(0.9))];

        let (rows, count) = compute_changes(Some(7), &prev, &curr);
        assert_eq!(count, 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].change_type, Some("arrive"));
        assert_eq!(rows[0].prev_occupied, Some(false));
        assert_eq!(rows[0].curr_occupied, Some(true));
        assert_eq!(rows[0].prev_snapshot_id, Some(7));
    }

    #[test]
    fn test_null_prev_state_is_unknown() {
        // S4: prev saw A as null, current sees a car
        let mut prev = HashMap::new();
        prev.insert("A".to_string(), None);
        let curr = vec![state("A", Some(true), Some(0.8))];

        let (rows, count) = compute_changes(Some(7), &prev, &curr);
        assert_eq!(count, 1);
        assert_eq!(rows[0].change_type, Some("unknown"));
    }

    #[test]
    fn test_first_snapshot_is_baseline() {
        let curr = vec![
            state("A", Some(true), Some(0.9)),
            state("B", Some(false), Some(0.7)),
            state("C", None, None),
        ];
        let (rows, count) = compute_changes(None, &HashMap::new(), &curr);
        assert_eq!(count, 0);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.change_type.is_none()));
        assert!(rows.iter().all(|r| r.prev_occupied.is_none()));
        assert!(rows.iter().all(|r| r.prev_snapshot_id.is_none()));
    }

    #[test]
    fn test_space_absent_from_prev_snapshot_is_unknown() {
        // space appeared in the configuration between the two captures
        let prev = HashMap::new();
        let curr = vec![state("NEW", Some(false), Some(0.6))];
        let (rows, count) = compute_changes(Some(3), &prev, &curr);
        assert_eq!(count, 1);
        assert_eq!(rows[0].change_type, Some("unknown"));
        assert_eq!(rows[0].prev_occupied, None);
    }

    #[test]
    fn test_steady_state_counts_nothing() {
        let mut prev = HashMap::new();
        prev.insert("A".to_string(), Some(true));
        prev.insert("B".to_string(), Some(false));
        let curr = vec![
            state("A", Some(true), Some(0.95)),
            state("B", Some(false), Some(0.5)),
        ];
        let (rows, count) = compute_changes(Some(1), &prev, &curr);
        assert_eq!(count, 0);
        assert!(rows.iter().all(|r| r.change_type.is_none()));
        // baseline states are still recorded per space
        assert_eq!(rows.len(), 2);
    }
}
