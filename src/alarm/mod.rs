//! Alarm payload normalization and next-alarm scheduling.
//!
//! The Shortcut pushes the raw Clock app alarm list (dates as displayed on
//! the phone, `on`/`off` flags, repeat days as localized weekday names). This
//! module turns that list into [`NormalizedAlarm`]s and computes which alarm
//! rings next.

pub mod parse;
pub mod schedule;
pub mod weekday;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

pub use parse::{normalize_event, parse_alarm_datetime, parse_on_off};
pub use schedule::{
    PreviewEntry, build_normalized_preview, compute_alarm_schedule, compute_next_alarm,
    compute_single_alarm_next, describe_time_until,
};
pub use weekday::{WeekdayMaps, build_weekday_maps, detect_weekday_locale, normalize_day_key};

/// Version of the weekday mapping rules applied to stored alarms.
pub const MAP_VERSION: u32 = 1;

/// Alarms keyed by the Shortcut's alarm key, ordered by key.
pub type AlarmMap = BTreeMap<String, NormalizedAlarm>;

/// Next trigger per alarm key.
pub type Schedule = BTreeMap<String, Option<DateTime<FixedOffset>>>;

/// A single alarm after parsing and weekday normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedAlarm {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub snooze: bool,
    pub base_time: DateTime<FixedOffset>,
    #[serde(default)]
    pub repeat_days_localized: Vec<String>,
    /// Monday = 0 ... Sunday = 6, in the order the phone listed them.
    #[serde(default)]
    pub repeat_days_normalized: Vec<u8>,
}

/// Result of normalizing one alarm event.
#[derive(Debug, Clone, Default)]
pub struct NormalizedEvent {
    pub alarms: AlarmMap,
    pub map_locale: String,
    pub parse_errors: Vec<String>,
    pub map_errors: Vec<String>,
}

/// Why there is no next alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Note {
    NoAlarms,
    NoEnabled,
    NoFuture,
    Waiting,
}

impl Note {
    /// Human readable text shown in entity attributes.
    pub fn message(self) -> &'static str {
        match self {
            Note::NoAlarms => "No alarms provided",
            Note::NoEnabled => "No enabled alarms",
            Note::NoFuture => "No future alarms",
            Note::Waiting => "Waiting for first event",
        }
    }
}

/// Outcome of evaluating the next alarm for one person.
#[derive(Debug, Clone)]
pub struct NextAlarmComputation {
    pub alarm: Option<NormalizedAlarm>,
    pub next_time: Option<DateTime<FixedOffset>>,
    pub schedule: Schedule,
    pub note: Option<Note>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_string_forms() {
        assert_eq!(Note::NoFuture.to_string(), "no_future");
        assert_eq!("no_enabled".parse::<Note>().unwrap(), Note::NoEnabled);
        assert_eq!(
            serde_json::to_value(Note::NoAlarms).unwrap(),
            serde_json::json!("no_alarms")
        );
        assert_eq!(Note::Waiting.message(), "Waiting for first event");
    }
}
