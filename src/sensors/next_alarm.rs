//! Next alarm timestamp sensor.

use serde_json::{Map, Value};

use super::{EntityContext, UNKNOWN_STATE, insert_local_time, note_text};
use crate::alarm::describe_time_until;
use crate::coordinator::PersonState;

pub fn state(person: &PersonState) -> String {
    person
        .next_alarm_time
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| UNKNOWN_STATE.to_string())
}

pub fn attributes(person: &PersonState, ctx: &EntityContext) -> Value {
    let mut attributes = Map::new();
    attributes.insert("source_person".into(), person.person.clone().into());
    attributes.insert("map_version".into(), person.map_version.into());
    attributes.insert("weekday_map_locale".into(), person.map_locale.clone().into());
    attributes.insert("note".into(), note_text(person.note));

    if let Some(event_time) = person.last_event_time {
        attributes.insert("source_event_time".into(), event_time.to_rfc3339().into());
        attributes.insert(
            "source_event_time_local".into(),
            event_time.with_timezone(&ctx.tz).to_rfc3339().into(),
        );
    }

    if let Some(next) = person.next_alarm_time {
        attributes.insert(
            "time_until".into(),
            describe_time_until(Some(&next), ctx.now).into(),
        );
        insert_local_time(&mut attributes, "next_alarm", next, &ctx.tz);
    }

    if let Some(alarm) = person.next_alarm() {
        attributes.insert("label".into(), alarm.label.clone().into());
        attributes.insert("enabled".into(), alarm.enabled.into());
        attributes.insert("repeat".into(), alarm.repeat.into());
        attributes.insert(
            "repeat_days_localized".into(),
            alarm.repeat_days_localized.clone().into(),
        );
        attributes.insert(
            "repeat_days_normalized".into(),
            alarm.repeat_days_normalized.clone().into(),
        );
        attributes.insert("snooze".into(), alarm.snooze.into());
        attributes.insert("source_alarm_key".into(), alarm.key.clone().into());
    }

    Value::Object(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::{NormalizedAlarm, Note};
    use chrono::{DateTime, Utc};
    use chrono_tz::Europe::Warsaw;

    fn ctx(now: &str) -> EntityContext {
        EntityContext {
            tz: Warsaw,
            now: DateTime::parse_from_rfc3339(now).unwrap().with_timezone(&Utc),
            stale_after: None,
        }
    }

    #[test]
    fn test_waiting_person() {
        let mut person = PersonState::new("ola", "Ola");
        person.note = Some(Note::NoAlarms);
        assert_eq!(state(&person), "None");
        let attributes = attributes(&person, &ctx("2025-09-17T18:00:00Z"));
        assert_eq!(attributes["note"], "No alarms provided");
        assert_eq!(attributes["source_person"], "Ola");
        assert!(attributes.get("time_until").is_none());
    }

    #[test]
    fn test_next_alarm_attributes() {
        let next = DateTime::parse_from_rfc3339("2025-09-18T05:15:00+02:00").unwrap();
        let mut person = PersonState::new("ola", "Ola");
        person.normalized_alarms.insert(
            "1".to_string(),
            NormalizedAlarm {
                key: "1".to_string(),
                label: "Work".to_string(),
                enabled: true,
                repeat: true,
                snooze: true,
                base_time: next,
                repeat_days_localized: vec!["Poniedziałek".to_string()],
                repeat_days_normalized: vec![0],
            },
        );
        person.next_alarm_key = Some("1".to_string());
        person.next_alarm_time = Some(next);
        person.note = None;
        person.last_event_time =
            Some(DateTime::parse_from_rfc3339("2025-09-17T18:00:00+00:00").unwrap());

        assert_eq!(state(&person), "2025-09-18T05:15:00+02:00");
        let attributes = attributes(&person, &ctx("2025-09-17T18:00:00Z"));
        assert_eq!(attributes["label"], "Work");
        assert_eq!(attributes["source_alarm_key"], "1");
        assert_eq!(attributes["repeat_days_normalized"], serde_json::json!([0]));
        assert_eq!(attributes["time_until"], "in 9h 15m");
        assert_eq!(attributes["next_alarm_date_local"], "2025-09-18");
        assert_eq!(attributes["next_alarm_clock_time_local"], "05:15:00");
        assert_eq!(
            attributes["source_event_time_local"],
            "2025-09-17T20:00:00+02:00"
        );
        assert_eq!(attributes["note"], Value::Null);
    }
}
