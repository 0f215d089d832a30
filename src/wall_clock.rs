//! Wall-zone clock and calendar
//!
//! Day boundaries and trigger times are expressed in the configured IANA
//! zone (default Asia/Shanghai); everything persisted is UTC or unix
//! seconds.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Clock pinned to a wall zone
#[derive(Debug, Clone)]
pub struct WallClock {
    zone: Tz,
}

impl WallClock {
    pub fn new(zone_name: &str) -> Result<Self> {
        let zone: Tz = zone_name
            .parse()
            .map_err(|_| Error::InvalidInput(format!("unknown timezone: {}", zone_name)))?;
        Ok(Self { zone })
    }

    pub fn zone_name(&self) -> &'static str {
        self.zone.name()
    }

    /// Current instant in the wall zone
    pub fn now_wall(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.zone)
    }

    /// Today's wall date as `YYYY-MM-DD`
    pub fn today(&self) -> String {
        self.now_wall().format("%Y-%m-%d").to_string()
    }

    /// Current wall minute as `HH:MM` (trigger-time resolution)
    pub fn current_minute(&self) -> String {
        self.now_wall().format("%H:%M").to_string()
    }

    /// Unix-second bounds of a wall date: `[00:00:00, 23:59:59]`.
    pub fn day_bounds(&self, date: &str) -> Result<(i64, i64)> {
        let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| Error::InvalidInput(format!("bad date (want YYYY-MM-DD): {}", date)))?;
        let midnight = day
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| Error::Internal("midnight out of range".to_string()))?;
        let start = self
            .zone
            .from_local_datetime(&midnight)
            .earliest()
            .ok_or_else(|| Error::InvalidInput(format!("no midnight in zone for {}", date)))?;
        let start_ts = start.timestamp();
        Ok((start_ts, start_ts + 86_400 - 1))
    }

    /// Wall date a unix second falls on
    pub fn date_of(&self, ts: i64) -> String {
        self.zone
            .timestamp_opt(ts, 0)
            .single()
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    }
}

/// Validate `HH:MM` trigger-time syntax.
pub fn valid_trigger_time(s: &str) -> bool {
    let Some((h, m)) = s.split_once(':') else {
        return false;
    };
    if h.len() != 2 || m.len() != 2 {
        return false;
    }
    match (h.parse::<u8>(), m.parse::<u8>()) {
        (Ok(h), Ok(m)) => h < 24 && m < 60,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_bounds_shanghai() {
        let clock = WallClock::new("Asia/Shanghai").unwrap();
        let (start, end) = clock.day_bounds("2025-12-19").unwrap();
        // 2025-12-19T00:00:00+08:00
        assert_eq!(start, 1766073600);
        assert_eq!(end - start, 86_399);
        assert_eq!(clock.date_of(start), "2025-12-19");
        assert_eq!(clock.date_of(end), "2025-12-19");
    }

    #[test]
    fn test_bad_date_rejected() {
        let clock = WallClock::new("Asia/Shanghai").unwrap();
        assert!(clock.day_bounds("2025/12/19").is_err());
        assert!(clock.day_bounds("not-a-date").is_err());
    }

    #[test]
    fn test_bad_zone_rejected() {
        assert!(WallClock::new("Mars/OlympusMons").is_err());
    }

    #[test]
    fn test_trigger_time_syntax() {
        assert!(valid_trigger_time("18:00"));
        assert!(valid_trigger_time("00:00"));
        assert!(valid_trigger_time("23:59"));
        assert!(!valid_trigger_time("24:00"));
        assert!(!valid_trigger_time("18:60"));
        assert!(!valid_trigger_time("6:00"));
        assert!(!valid_trigger_time("1800"));
    }
}
