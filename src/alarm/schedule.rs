//! Next-alarm computation.

use super::parse::localize;
use super::{AlarmMap, NextAlarmComputation, NormalizedAlarm, Note, Schedule};
use chrono::{DateTime, Datelike, FixedOffset, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// Number of alarms listed in the diagnostics preview.
pub const PREVIEW_LIMIT: usize = 5;

/// Next trigger of a single alarm strictly after `now`.
///
/// Repeating alarms look at today and the following seven days, at the base
/// time's local clock time.
pub fn compute_single_alarm_next<T: TimeZone>(
    alarm: &NormalizedAlarm,
    now: &DateTime<T>,
    tz: &Tz,
) -> Option<DateTime<FixedOffset>> {
    if !alarm.enabled {
        return None;
    }

    if !alarm.repeat {
        return (alarm.base_time > *now).then_some(alarm.base_time);
    }

    if alarm.repeat_days_normalized.is_empty() {
        return None;
    }

    let local_today = now.with_timezone(tz).date_naive();
    let base_clock = alarm.base_time.with_timezone(tz).time();

    (0..8)
        .map(|offset| local_today + TimeDelta::days(offset))
        .filter(|date| {
            let weekday = date.weekday().num_days_from_monday() as u8;
            alarm.repeat_days_normalized.contains(&weekday)
        })
        .map(|date| localize(date.and_time(base_clock), tz).fixed_offset())
        .find(|candidate| *candidate > *now)
}

/// Next trigger per alarm key.
pub fn compute_alarm_schedule<T: TimeZone>(
    alarms: &AlarmMap,
    now: &DateTime<T>,
    tz: &Tz,
) -> Schedule {
    alarms
        .iter()
        .map(|(key, alarm)| (key.clone(), compute_single_alarm_next(alarm, now, tz)))
        .collect()
}

/// Pick the alarm that rings next.
///
/// The earliest trigger wins; ties go to the lowest key.
pub fn compute_next_alarm<T: TimeZone>(
    alarms: &AlarmMap,
    now: &DateTime<T>,
    tz: &Tz,
) -> NextAlarmComputation {
    let schedule = compute_alarm_schedule(alarms, now, tz);
    let mut next: Option<(&NormalizedAlarm, DateTime<FixedOffset>)> = None;

    for (key, alarm) in alarms {
        let Some(candidate) = schedule.get(key).copied().flatten() else {
            continue;
        };
        if next.is_none_or(|(_, best)| candidate < best) {
            next = Some((alarm, candidate));
        }
    }

    let note = if alarms.is_empty() {
        Some(Note::NoAlarms)
    } else if alarms.values().all(|alarm| !alarm.enabled) {
        Some(Note::NoEnabled)
    } else if next.is_none() {
        Some(Note::NoFuture)
    } else {
        None
    };

    NextAlarmComputation {
        alarm: next.map(|(alarm, _)| alarm.clone()),
        next_time: next.map(|(_, time)| time),
        schedule,
        note,
    }
}

/// One line of the diagnostics preview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewEntry {
    pub key: String,
    pub label: String,
    pub enabled: bool,
    pub repeat: bool,
    pub repeat_days: Vec<u8>,
    pub next: Option<String>,
}

/// Truncated view of the normalized alarms for the diagnostics sensor.
pub fn build_normalized_preview(alarms: &AlarmMap, schedule: &Schedule) -> Vec<PreviewEntry> {
    alarms
        .values()
        .take(PREVIEW_LIMIT)
        .map(|alarm| PreviewEntry {
            key: alarm.key.clone(),
            label: alarm.label.clone(),
            enabled: alarm.enabled,
            repeat: alarm.repeat,
            repeat_days: alarm.repeat_days_normalized.clone(),
            next: schedule
                .get(&alarm.key)
                .copied()
                .flatten()
                .map(|time| time.to_rfc3339()),
        })
        .collect()
}

/// Human friendly time until `target`, e.g. `in 1d 2h 5m`.
pub fn describe_time_until<T: TimeZone>(
    target: Option<&DateTime<T>>,
    now: DateTime<Utc>,
) -> Option<String> {
    let target = target?.with_timezone(&Utc);
    let total_seconds = (target - now).num_seconds();
    if total_seconds <= 0 {
        return Some("due".to_string());
    }

    let days = total_seconds / 86_400;
    let hours = total_seconds % 86_400 / 3_600;
    let minutes = total_seconds % 3_600 / 60;
    let seconds = total_seconds % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if parts.is_empty() {
        parts.push(format!("{seconds}s"));
    }
    Some(format!("in {}", parts.join(" ")))
}
