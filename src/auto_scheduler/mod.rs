//! AutoScheduler - Trigger-Time Rules, Run-Now and Rerun
//!
//! ## Responsibilities
//!
//! - 30-second tick over enabled rules; a rule fires when the current wall
//!   minute equals its `trigger_time` and it has not fired this minute
//! - Duplicate-fire protection: `(rule_id, wall_minute)` dedup set on top
//!   of the `last_executed_at` check
//! - Explicit run-now: plan a day then submit its runnable tasks
//! - Rerun: re-arm terminal tasks (never `playing` ones) and submit them

mod repository;
mod types;

pub use repository::AutoRuleRepository;
pub use types::*;

use crate::capture_engine::CaptureEngine;
use crate::error::{Error, Result};
use crate::models::TaskStatus;
use crate::rtsp_url::{normalize_channel, RtspBase};
use crate::task_planner::{TaskPlanner, TaskRow};
use crate::wall_clock::{valid_trigger_time, WallClock};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

const TICK_INTERVAL: Duration = Duration::from_secs(30);
/// States the explicit run-now path re-submits: everything not currently
/// owned by a worker, completed windows included.
const RUN_NOW_STATES: [TaskStatus; 3] = [
    TaskStatus::Pending,
    TaskStatus::Failed,
    TaskStatus::ScreenshotTaken,
];
/// States an auto-rule firing submits: freshly planned windows only.
/// A rule that fires repeatedly for the same day must not re-capture
/// windows that already completed or were recorded as failed.
const AUTO_RULE_STATES: [TaskStatus; 1] = [TaskStatus::Pending];

/// Task ids whose current state is in the given submission set.
pub fn eligible_ids(tasks: &[TaskRow], states: &[TaskStatus]) -> Vec<u64> {
    tasks
        .iter()
        .filter(|t| t.status().map(|s| states.contains(&s)).unwrap_or(false))
        .map(|t| t.id)
        .collect()
}

/// Decide whether a rule fires in the given wall minute.
///
/// `last_executed_at` inside the same wall minute suppresses the firing;
/// the in-memory dedup set guards the window between the decision and the
/// database write.
pub fn rule_due(
    trigger_time: &str,
    current_minute: &str,
    last_executed_at: Option<DateTime<Utc>>,
    zone: Tz,
    now: DateTime<Utc>,
) -> bool {
    if trigger_time != current_minute {
        return false;
    }
    match last_executed_at {
        None => true,
        Some(last) => {
            let last_minute = last.with_timezone(&zone).format("%Y-%m-%d %H:%M").to_string();
            let this_minute = now.with_timezone(&zone).format("%Y-%m-%d %H:%M").to_string();
            last_minute != this_minute
        }
    }
}

/// AutoScheduler instance
pub struct AutoScheduler {
    rules: AutoRuleRepository,
    planner: Arc<TaskPlanner>,
    engine: Arc<CaptureEngine>,
    clock: WallClock,
    zone: Tz,
    /// (rule_id, wall_minute) pairs that already fired
    fired: Mutex<HashSet<(u64, String)>>,
    running: Arc<RwLock<bool>>,
}

impl AutoScheduler {
    pub fn new(
        rules: AutoRuleRepository,
        planner: Arc<TaskPlanner>,
        engine: Arc<CaptureEngine>,
        clock: WallClock,
    ) -> Self {
        let zone: Tz = clock
            .zone_name()
            .parse()
            .expect("wall clock zone is always a valid Tz");
        Self {
            rules,
            planner,
            engine,
            clock,
            zone,
            fired: Mutex::new(HashSet::new()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn rules(&self) -> &AutoRuleRepository {
        &self.rules
    }

    // ========================================
    // Rule CRUD validation
    // ========================================

    pub async fn create_rule(&self, req: AutoRuleCreate) -> Result<AutoRule> {
        if !req.use_today && req.custom_date.is_none() {
            return Err(Error::InvalidInput(
                "either use_today or custom_date is required".to_string(),
            ));
        }
        if req.use_today && req.custom_date.is_some() {
            return Err(Error::InvalidInput(
                "custom_date conflicts with use_today".to_string(),
            ));
        }
        if !valid_trigger_time(&req.trigger_time) {
            return Err(Error::InvalidInput(format!(
                "trigger_time must be HH:MM, got {}",
                req.trigger_time
            )));
        }
        if let Some(date) = &req.custom_date {
            self.clock.day_bounds(date)?;
        }
        if !(1..=1440).contains(&req.interval_minutes) {
            return Err(Error::InvalidInput(format!(
                "interval_minutes must be in 1..=1440, got {}",
                req.interval_minutes
            )));
        }
        let base = RtspBase::parse(&req.base_rtsp)?;
        let channel = normalize_channel(&req.channel)?;

        let name = match &req.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!("{}_{}_{}", base.host, channel, req.trigger_time),
        };
        self.rules.create(&req, &name, &channel).await
    }

    // ========================================
    // Tick loop
    // ========================================

    pub async fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Auto scheduler already running");
                return;
            }
            *running = true;
        }

        let scheduler = self.clone();
        tokio::spawn(async move {
            tracing::info!(tick_sec = TICK_INTERVAL.as_secs(), "Auto scheduler started");
            loop {
                if !*scheduler.running.read().await {
                    break;
                }
                if let Err(e) = scheduler.tick().await {
                    tracing::error!(error = %e, "Scheduler tick error");
                }
                tokio::time::sleep(TICK_INTERVAL).await;
            }
            tracing::info!("Auto scheduler stopped");
        });
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// One scheduler tick.
    pub async fn tick(&self) -> Result<()> {
        let now = Utc::now();
        let current_minute = self.clock.current_minute();
        let minute_key = self.clock.now_wall().format("%Y-%m-%d %H:%M").to_string();

        let rules = self.rules.get_enabled().await?;
        for rule in rules {
            if !rule_due(
                &rule.trigger_time,
                &current_minute,
                rule.last_executed_at,
                self.zone,
                now,
            ) {
                continue;
            }
            {
                let mut fired = self.fired.lock().await;
                if !fired.insert((rule.id, minute_key.clone())) {
                    continue;
                }
                // the set only needs to survive the current minute
                if fired.len() > 1024 {
                    fired.retain(|(_, minute)| minute == &minute_key);
                }
            }

            tracing::info!(
                rule_id = rule.id,
                trigger_time = %rule.trigger_time,
                "Auto rule fired"
            );
            self.execute_rule(&rule, now).await;
        }
        Ok(())
    }

    async fn execute_rule(&self, rule: &AutoRule, fired_at: DateTime<Utc>) {
        if let Err(e) = self.rules.mark_running(rule.id, fired_at).await {
            tracing::error!(rule_id = rule.id, error = %e, "Failed to mark rule running");
            return;
        }

        let date = if rule.use_today {
            self.clock.today()
        } else {
            rule.custom_date.clone().unwrap_or_else(|| self.clock.today())
        };

        // Auto rules submit pending windows only; the broader re-submit
        // set belongs to the operator-triggered run-now path.
        let result = self
            .plan_and_submit(
                &date,
                &rule.base_rtsp,
                &rule.channel,
                rule.interval_minutes.max(1) as u32,
                &AUTO_RULE_STATES,
            )
            .await;

        let (success, error) = match &result {
            Ok(outcome) => {
                tracing::info!(
                    rule_id = rule.id,
                    submitted = outcome.submitted,
                    "Auto rule execution finished"
                );
                (true, None)
            }
            Err(e) => {
                tracing::error!(rule_id = rule.id, error = %e, "Auto rule execution failed");
                (false, Some(e.to_string()))
            }
        };
        if let Err(e) = self
            .rules
            .mark_finished(rule.id, success, error.as_deref())
            .await
        {
            tracing::error!(rule_id = rule.id, error = %e, "Failed to record rule outcome");
        }
    }

    // ========================================
    // Run-now / rerun entry points
    // ========================================

    /// Plan a day and submit the combo's tasks whose state is in `states`.
    async fn plan_and_submit(
        &self,
        date: &str,
        base_rtsp: &str,
        channel: &str,
        interval_minutes: u32,
        states: &[TaskStatus],
    ) -> Result<SubmitOutcome> {
        let planned = self
            .planner
            .plan(date, base_rtsp, channel, interval_minutes)
            .await?;

        let base = RtspBase::parse(base_rtsp)?;
        let channel = normalize_channel(channel)?;
        let tasks = self
            .planner
            .repository()
            .tasks_for_combo(date, &base.host, &channel)
            .await?;
        let ids = eligible_ids(&tasks, states);
        self.engine.submit_all(&ids).await;

        Ok(SubmitOutcome {
            planned: Some(planned),
            submitted: ids.len(),
        })
    }

    /// Plan a day and submit every runnable task of the combo, terminal
    /// states included.
    pub async fn run_now(&self, req: RunNowRequest) -> Result<SubmitOutcome> {
        self.plan_and_submit(
            &req.date,
            &req.base_rtsp,
            &req.channel,
            req.interval_minutes,
            &RUN_NOW_STATES,
        )
        .await
    }

    /// Re-arm matching terminal tasks and submit them.
    pub async fn rerun(&self, req: RerunRequest) -> Result<SubmitOutcome> {
        if req.task_id.is_none() && req.date.is_none() {
            return Err(Error::InvalidInput(
                "rerun needs task_id or date".to_string(),
            ));
        }
        let channel = match &req.channel {
            Some(c) => Some(normalize_channel(c)?),
            None => None,
        };

        let ids = self
            .planner
            .repository()
            .reset_to_pending(
                req.date.as_deref(),
                req.ip.as_deref(),
                channel.as_deref(),
                req.task_id,
            )
            .await?;
        if ids.is_empty() && req.task_id.is_some() {
            return Err(Error::NotFound(
                "task not found or currently playing".to_string(),
            ));
        }
        self.engine.submit_all(&ids).await;
        Ok(SubmitOutcome {
            planned: None,
            submitted: ids.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn shanghai() -> Tz {
        "Asia/Shanghai".parse().unwrap()
    }

    #[test]
    fn test_rule_fires_on_matching_minute() {
        // 18:00 Shanghai == 10:00 UTC
        let now = Utc.with_ymd_and_hms(2025, 12, 19, 10, 0, 30).unwrap();
        assert!(rule_due("18:00", "18:00", None, shanghai(), now));
        assert!(!rule_due("18:00", "18:01", None, shanghai(), now));
    }

    #[test]
    fn test_rule_suppressed_within_same_minute() {
        let now = Utc.with_ymd_and_hms(2025, 12, 19, 10, 0, 45).unwrap();
        let fired_earlier_this_minute = Utc.with_ymd_and_hms(2025, 12, 19, 10, 0, 5).unwrap();
        assert!(!rule_due(
            "18:00",
            "18:00",
            Some(fired_earlier_this_minute),
            shanghai(),
            now
        ));
    }

    #[test]
    fn test_rule_fires_again_next_day() {
        let now = Utc.with_ymd_and_hms(2025, 12, 19, 10, 0, 10).unwrap();
        let yesterday = Utc.with_ymd_and_hms(2025, 12, 18, 10, 0, 10).unwrap();
        assert!(rule_due("18:00", "18:00", Some(yesterday), shanghai(), now));
    }

    fn task(id: u64, status: &str) -> TaskRow {
        TaskRow {
            id,
            date: "2025-12-19".to_string(),
            segment_index: id as i32,
            start_ts: 1_766_073_600 + id as i64 * 600,
            end_ts: 1_766_073_600 + id as i64 * 600 + 599,
            rtsp_url: format!(
                "rtsp://u:p@10.0.0.1:554/c1/b{}/e{}/replay/s1",
                1_766_073_600 + id as i64 * 600,
                1_766_073_600 + id as i64 * 600 + 599
            ),
            ip: Some("10.0.0.1".to_string()),
            channel: Some("c1".to_string()),
            status: status.to_string(),
            screenshot_path: None,
            error: None,
            retry_count: 0,
            next_retry_at: None,
            operation_time: Utc::now(),
        }
    }

    /// A rule firing again for a day with history must only pick up fresh
    /// windows; the broader re-submit set is run-now's alone.
    #[test]
    fn test_auto_rule_submits_pending_only() {
        let tasks = vec![
            task(1, "pending"),
            task(2, "failed"),
            task(3, "screenshot_taken"),
            task(4, "playing"),
        ];

        assert_eq!(eligible_ids(&tasks, &AUTO_RULE_STATES), vec![1]);
        assert_eq!(eligible_ids(&tasks, &RUN_NOW_STATES), vec![1, 2, 3]);
    }

    #[test]
    fn test_no_path_submits_playing_tasks() {
        let tasks = vec![task(7, "playing")];
        assert!(eligible_ids(&tasks, &AUTO_RULE_STATES).is_empty());
        assert!(eligible_ids(&tasks, &RUN_NOW_STATES).is_empty());
    }
}
