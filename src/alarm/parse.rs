//! Parsing of the raw Shortcut alarm payload.

use super::weekday::{WeekdayMaps, detect_weekday_locale, normalize_repeat_days, repeat_day_lines};
use super::{AlarmMap, NormalizedAlarm, NormalizedEvent};
use chrono::{DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, TimeDelta, TimeZone};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use thiserror::Error;

/// Field names used by the Shortcut's alarm dictionary.
pub mod fields {
    pub const DATE: &str = "Date";
    pub const LABEL: &str = "Label";
    pub const REPEAT: &str = "Repeat";
    pub const REPEAT_DAYS: &str = "Repeat Days";
    pub const SNOOZE: &str = "Snooze";
    pub const STATE: &str = "State";
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateParseError {
    #[error("missing datetime value")]
    Missing,
    #[error("unsupported datetime format: {0}")]
    Unsupported(String),
}

const ISO_NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const ISO_AWARE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
];

/// Attach `tz` to a wall clock time.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside a
/// DST gap are moved forward by the gap.
pub fn localize(naive: NaiveDateTime, tz: &Tz) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(value) => value,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let shifted = naive + TimeDelta::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .unwrap_or_else(|| tz.from_utc_datetime(&naive))
        }
    }
}

fn parse_iso(text: &str, tz: &Tz) -> Option<DateTime<FixedOffset>> {
    let text = match text.strip_suffix('Z') {
        Some(stripped) => format!("{stripped}+00:00"),
        None => text.to_string(),
    };

    if let Ok(aware) = DateTime::parse_from_rfc3339(&text) {
        return Some(aware);
    }
    for format in ISO_AWARE_FORMATS {
        if let Ok(aware) = DateTime::parse_from_str(&text, format) {
            return Some(aware);
        }
    }
    for format in ISO_NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&text, format) {
            return Some(localize(naive, tz).fixed_offset());
        }
    }
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| localize(naive, tz).fixed_offset())
}

/// Parse an alarm date as sent by the Shortcut.
///
/// Accepts ISO 8601, the 24h `dd.mm.yyyy HH:MM` form and the US
/// `mm/dd/yyyy hh:mm AM` form. The result is expressed in `tz`.
pub fn parse_alarm_datetime(
    value: &str,
    tz: &Tz,
) -> Result<DateTime<FixedOffset>, DateParseError> {
    let text = value.trim();
    if text.is_empty() {
        return Err(DateParseError::Missing);
    }

    let parsed = match parse_iso(text, tz) {
        Some(parsed) => parsed,
        None => {
            let naive = match NaiveDateTime::parse_from_str(text, "%d.%m.%Y %H:%M") {
                Ok(naive) => naive,
                Err(_) => {
                    let upper = text.to_uppercase();
                    if !(upper.contains("AM") || upper.contains("PM")) {
                        return Err(DateParseError::Unsupported(text.to_string()));
                    }
                    NaiveDateTime::parse_from_str(text, "%m/%d/%Y %I:%M %p")
                        .map_err(|_| DateParseError::Unsupported(text.to_string()))?
                }
            };
            localize(naive, tz).fixed_offset()
        }
    };
    Ok(parsed.with_timezone(tz).fixed_offset())
}

/// Render a JSON value the way it is shown in error messages and labels.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse an `on`/`off` flag, recording an error for anything else.
pub fn parse_on_off(
    value: Option<&Value>,
    field: &str,
    alarm_key: &str,
    errors: &mut Vec<String>,
) -> Option<bool> {
    match value {
        Some(Value::String(text)) => match text.trim().to_lowercase().as_str() {
            "on" => return Some(true),
            "off" => return Some(false),
            _ => {}
        },
        Some(Value::Bool(flag)) => return Some(*flag),
        _ => {}
    }
    let shown = value.map(value_text).unwrap_or_else(|| "None".to_string());
    errors.push(format!(
        "Alarm {alarm_key}: invalid value '{shown}' for field '{field}'"
    ));
    None
}

/// Normalize the `alarms` object of an event.
///
/// Invalid alarms are dropped with an entry in `parse_errors`; the weekday
/// locale is detected once across all alarms so mixed payloads decode
/// consistently.
pub fn normalize_event(
    alarms: &Map<String, Value>,
    tz: &Tz,
    locale_option: &str,
    maps: &WeekdayMaps,
    map_errors: &[String],
) -> NormalizedEvent {
    let mut parse_errors = Vec::new();
    let mut all_repeat_lines = Vec::new();
    let mut valid = Vec::new();

    for (key, raw_alarm) in alarms {
        let Some(raw_alarm) = raw_alarm.as_object() else {
            parse_errors.push(format!(
                "Alarm {key}: payload must be an object with alarm fields"
            ));
            continue;
        };
        if let Some(Value::String(days)) = raw_alarm.get(fields::REPEAT_DAYS) {
            all_repeat_lines.extend(repeat_day_lines(days));
        }
        valid.push((key, raw_alarm));
    }

    let map_locale = detect_weekday_locale(&all_repeat_lines, locale_option, maps);
    let mut normalized = AlarmMap::new();

    for (key, raw_alarm) in valid {
        if let Some(alarm) = normalize_alarm(key, raw_alarm, tz, &map_locale, maps, &mut parse_errors)
        {
            normalized.insert(key.clone(), alarm);
        }
    }

    NormalizedEvent {
        alarms: normalized,
        map_locale,
        parse_errors,
        map_errors: map_errors.to_vec(),
    }
}

fn normalize_alarm(
    key: &str,
    raw_alarm: &Map<String, Value>,
    tz: &Tz,
    map_locale: &str,
    maps: &WeekdayMaps,
    errors: &mut Vec<String>,
) -> Option<NormalizedAlarm> {
    let label = raw_alarm
        .get(fields::LABEL)
        .map(value_text)
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| key.to_string());

    let raw_date = match raw_alarm.get(fields::DATE) {
        None | Some(Value::Null) => {
            errors.push(format!("Alarm {key}: missing Date"));
            return None;
        }
        Some(raw_date) => value_text(raw_date),
    };
    let base_time = match parse_alarm_datetime(&raw_date, tz) {
        Ok(base_time) => base_time,
        Err(err) => {
            errors.push(format!("Alarm {key}: {err}"));
            return None;
        }
    };

    let enabled = parse_on_off(raw_alarm.get(fields::STATE), fields::STATE, key, errors)?;
    let repeat = parse_on_off(raw_alarm.get(fields::REPEAT), fields::REPEAT, key, errors)?;
    let snooze = parse_on_off(raw_alarm.get(fields::SNOOZE), fields::SNOOZE, key, errors)?;

    let mut repeat_days_localized = Vec::new();
    let mut repeat_days_normalized = Vec::new();
    if repeat {
        let raw_days = raw_alarm
            .get(fields::REPEAT_DAYS)
            .map(value_text)
            .unwrap_or_default();
        let days = normalize_repeat_days(&raw_days, key, map_locale, maps, errors);
        if days.normalized.is_empty() {
            errors.push(format!(
                "Alarm {key}: repeat is enabled but no valid repeat days were provided"
            ));
            return None;
        }
        repeat_days_localized = days.localized;
        repeat_days_normalized = days.normalized;
    }

    Some(NormalizedAlarm {
        key: key.to_string(),
        label,
        enabled,
        repeat,
        snooze,
        base_time,
        repeat_days_localized,
        repeat_days_normalized,
    })
}
