//! TaskPlanner - Per-Day Capture Plan Expansion
//!
//! ## Responsibilities
//!
//! - Expand (day, base_rtsp, channel, interval) into gapless capture windows
//! - Idempotent upsert: existing windows keep their status, re-planning a
//!   day never rewrites rows
//! - Denormalise ip/channel onto each task for cheap filtered reads
//!
//! Window math runs in the configured wall zone; persisted timestamps are
//! unix seconds.

mod repository;
mod types;

pub use repository::TaskRepository;
pub use types::*;

use crate::error::{Error, Result};
use crate::rtsp_url::{build_replay_url, normalize_channel, RtspBase};
use crate::screenshot_capture::probe_rtsp;
use crate::wall_clock::WallClock;

/// TaskPlanner instance
pub struct TaskPlanner {
    repository: TaskRepository,
    clock: WallClock,
}

impl TaskPlanner {
    pub fn new(repository: TaskRepository, clock: WallClock) -> Self {
        Self { repository, clock }
    }

    pub fn repository(&self) -> &TaskRepository {
        &self.repository
    }

    /// Validate a raw plan request. Rejections are synchronous and leave no
    /// state behind.
    pub fn validate(
        &self,
        date: &str,
        base_rtsp: &str,
        channel: &str,
        interval_minutes: u32,
    ) -> Result<(PlanRequest, RtspBase)> {
        if !(1..=1440).contains(&interval_minutes) {
            return Err(Error::InvalidInput(format!(
                "interval_minutes must be in 1..=1440, got {}",
                interval_minutes
            )));
        }
        let base = RtspBase::parse(base_rtsp)?;
        let channel = normalize_channel(channel)?;
        // surfaces bad dates before any write
        self.clock.day_bounds(date)?;

        Ok((
            PlanRequest {
                date: date.to_string(),
                base_rtsp: base_rtsp.trim_end_matches('/').to_string(),
                channel,
                interval_minutes,
            },
            base,
        ))
    }

    /// Materialise the day's windows. Safe to call from concurrent writers;
    /// counts both freshly created and pre-existing rows.
    pub async fn plan(
        &self,
        date: &str,
        base_rtsp: &str,
        channel: &str,
        interval_minutes: u32,
    ) -> Result<PlanOutcome> {
        let (req, base) = self.validate(date, base_rtsp, channel, interval_minutes)?;
        let (day_start, day_end) = self.clock.day_bounds(&req.date)?;
        let segments = generate_segments(day_start, day_end, req.interval_minutes);

        // Pre-flight probe of the first window; a dead stream is worth a
        // warning but never blocks planning.
        if let Some(first) = segments.first() {
            let url = build_replay_url(&req.base_rtsp, &req.channel, first.start_ts, first.end_ts);
            if let Err(e) = probe_rtsp(&url, 5).await {
                tracing::warn!(
                    date = %req.date,
                    channel = %req.channel,
                    error = %e,
                    "RTSP probe failed, continuing to plan"
                );
            }
        }

        let mut created: u64 = 0;
        for seg in &segments {
            let url = build_replay_url(&req.base_rtsp, &req.channel, seg.start_ts, seg.end_ts);
            let inserted = self
                .repository
                .insert_ignore_task(
                    &req.date,
                    seg.index,
                    seg.start_ts,
                    seg.end_ts,
                    &url,
                    &base.host,
                    &req.channel,
                )
                .await?;
            if inserted {
                created += 1;
            }
        }

        let total = segments.len() as u64;
        self.repository
            .upsert_task_config(
                &req.date,
                &req.base_rtsp,
                &base.host,
                &req.channel,
                req.interval_minutes as i32,
                day_start,
                day_end,
                total as i32,
            )
            .await?;

        let outcome = PlanOutcome {
            date: req.date.clone(),
            created,
            existing: total - created,
            total,
        };
        tracing::info!(
            date = %req.date,
            channel = %req.channel,
            interval_minutes = req.interval_minutes,
            created = outcome.created,
            existing = outcome.existing,
            total = outcome.total,
            "Task plan materialised"
        );
        Ok(outcome)
    }
}

/// Expand `[day_start, day_end]` into windows of `interval_minutes`.
///
/// Windows are disjoint, cover the day exactly, and the last one is clipped
/// to the day end.
pub fn generate_segments(day_start: i64, day_end: i64, interval_minutes: u32) -> Vec<Segment> {
    let step = interval_minutes as i64 * 60;
    let mut segments = Vec::new();
    let mut start = day_start;
    let mut index = 0i32;
    while start <= day_end {
        segments.push(Segment {
            index,
            start_ts: start,
            end_ts: (start + step - 1).min(day_end),
        });
        start += step;
        index += 1;
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_START: i64 = 1_766_073_600; // 2025-12-19T00:00:00+08:00
    const DAY_END: i64 = DAY_START + 86_399;

    #[test]
    fn test_ten_minute_day_has_144_windows() {
        let segments = generate_segments(DAY_START, DAY_END, 10);
        assert_eq!(segments.len(), 144);
        assert_eq!(segments[0].index, 0);
        assert_eq!(segments[0].start_ts, DAY_START);
        assert_eq!(segments[0].end_ts, DAY_START + 599);
        assert_eq!(segments.last().unwrap().end_ts, DAY_END);
    }

    #[test]
    fn test_coverage_is_gapless_and_disjoint() {
        for interval in [1u32, 7, 10, 13, 60, 720, 1440] {
            let segments = generate_segments(DAY_START, DAY_END, interval);
            assert_eq!(segments[0].start_ts, DAY_START, "interval {}", interval);
            assert_eq!(segments.last().unwrap().end_ts, DAY_END);
            for pair in segments.windows(2) {
                assert_eq!(
                    pair[1].start_ts,
                    pair[0].end_ts + 1,
                    "gap/overlap at interval {}",
                    interval
                );
                assert_eq!(pair[1].index, pair[0].index + 1);
            }
            for seg in &segments {
                assert!(seg.start_ts < seg.end_ts);
                assert!(seg.end_ts - seg.start_ts <= interval as i64 * 60);
            }
        }
    }

    #[test]
    fn test_whole_day_interval_is_one_window() {
        let segments = generate_segments(DAY_START, DAY_END, 1440);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_ts, DAY_START);
        assert_eq!(segments[0].end_ts, DAY_END);
    }
}
