// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Weekly opening hours of a channel.
//!
//! Stored on the channel as JSON:
//!
//! ```json
//! {"offset_minutes": -180, "mon": "08:00-12:00,13:00-18:00", "sat": "09:00-13:00"}
//! ```
//!
//! `offset_minutes` is the tenant's UTC offset. A missing or empty day is
//! closed all day.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use serde::Deserialize;

use zapdesk_core::ZapdeskError;
use zapdesk_core::models::minutes_of;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSchedule {
    #[serde(default)]
    offset_minutes: i32,
    #[serde(default)]
    mon: Option<String>,
    #[serde(default)]
    tue: Option<String>,
    #[serde(default)]
    wed: Option<String>,
    #[serde(default)]
    thu: Option<String>,
    #[serde(default)]
    fri: Option<String>,
    #[serde(default)]
    sat: Option<String>,
    #[serde(default)]
    sun: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklySchedule {
    offset: FixedOffset,
    /// Monday first; each range is `[start, end)` in minutes since midnight.
    days: [Vec<(i64, i64)>; 7],
}

impl WeeklySchedule {
    pub fn parse(json: &str) -> Result<Self, ZapdeskError> {
        let raw: RawSchedule = serde_json::from_str(json)
            .map_err(|e| ZapdeskError::Validation(format!("invalid schedule: {e}")))?;
        let offset = FixedOffset::east_opt(raw.offset_minutes * 60).ok_or_else(|| {
            ZapdeskError::Validation(format!("invalid utc offset {}", raw.offset_minutes))
        })?;
        let days = [
            raw.mon, raw.tue, raw.wed, raw.thu, raw.fri, raw.sat, raw.sun,
        ]
        .map(|d| parse_ranges(d.as_deref().unwrap_or("")));

        let mut parsed: [Vec<(i64, i64)>; 7] = Default::default();
        for (slot, day) in parsed.iter_mut().zip(days) {
            *slot = day?;
        }
        Ok(Self {
            offset,
            days: parsed,
        })
    }

    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.offset);
        let day = local.weekday().num_days_from_monday() as usize;
        let minute = i64::from(local.hour() * 60 + local.minute());
        self.days[day]
            .iter()
            .any(|(start, end)| (*start..*end).contains(&minute))
    }
}

fn parse_ranges(ranges: &str) -> Result<Vec<(i64, i64)>, ZapdeskError> {
    ranges
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|range| {
            let invalid = || ZapdeskError::Validation(format!("invalid hours range `{range}`"));
            let (start, end) = range.split_once('-').ok_or_else(invalid)?;
            let start = minutes_of(start).ok_or_else(invalid)?;
            // "24:00" closes at midnight.
            let end = if end.trim() == "24:00" {
                24 * 60
            } else {
                minutes_of(end).ok_or_else(invalid)?
            };
            if end <= start {
                return Err(invalid());
            }
            Ok((start, end))
        })
        .collect()
}

/// Whether the channel is outside its opening hours at `at`.
///
/// Channels without a schedule, or with one that fails to parse, are
/// treated as always open.
pub fn is_out_of_hours(schedule: Option<&str>, at: DateTime<Utc>) -> bool {
    match schedule.map(WeeklySchedule::parse) {
        Some(Ok(s)) => !s.is_open(at),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "ignoring unparsable channel schedule");
            false
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // 2026-03-02 is a Monday.
    fn utc(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, h, m, 0).unwrap()
    }

    #[test]
    fn open_inside_ranges_only() {
        let s = WeeklySchedule::parse(r#"{"mon": "08:00-12:00, 13:00-18:00"}"#).unwrap();
        assert!(s.is_open(utc(2, 8, 0)));
        assert!(!s.is_open(utc(2, 12, 30)));
        assert!(s.is_open(utc(2, 17, 59)));
        assert!(!s.is_open(utc(2, 18, 0)));
        assert!(!s.is_open(utc(3, 9, 0)), "tuesday is closed");
    }

    #[test]
    fn offset_shifts_the_local_day() {
        // 01:00 UTC Tuesday is 22:00 Monday at -03:00.
        let s = WeeklySchedule::parse(r#"{"offset_minutes": -180, "mon": "20:00-24:00"}"#)
            .unwrap();
        assert!(s.is_open(utc(3, 1, 0)));
        assert!(!s.is_open(utc(2, 22, 0)));
    }

    #[test]
    fn malformed_ranges_are_rejected() {
        assert!(WeeklySchedule::parse(r#"{"mon": "18:00-08:00"}"#).is_err());
        assert!(WeeklySchedule::parse(r#"{"mon": "8h-12h"}"#).is_err());
        assert!(WeeklySchedule::parse(r#"{"monday": "08:00-12:00"}"#).is_err());
    }

    #[test]
    fn missing_or_broken_schedule_means_open() {
        assert!(!is_out_of_hours(None, utc(2, 3, 0)));
        assert!(!is_out_of_hours(Some("not json"), utc(2, 3, 0)));
        assert!(is_out_of_hours(Some(r#"{"mon": "08:00-09:00"}"#), utc(2, 3, 0)));
    }
}
