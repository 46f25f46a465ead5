//! Diagnostics sensor: the last raw event and what the parser made of it.

use serde_json::{Map, Value};

use super::{EntityContext, UNKNOWN_STATE, insert_local_time, iso, note_text};
use crate::alarm::build_normalized_preview;
use crate::coordinator::PersonState;

pub fn state(person: &PersonState) -> String {
    person
        .last_event_time
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| UNKNOWN_STATE.to_string())
}

pub fn attributes(person: &PersonState, ctx: &EntityContext) -> Value {
    let mut attributes = Map::new();
    attributes.insert("note".into(), note_text(person.note));
    attributes.insert("map_version".into(), person.map_version.into());
    attributes.insert("weekday_map_locale".into(), person.map_locale.clone().into());
    attributes.insert("next_alarm_key".into(), person.next_alarm_key.clone().into());
    attributes.insert("next_alarm_time".into(), iso(person.next_alarm_time));
    attributes.insert("source_person".into(), person.person.clone().into());
    attributes.insert("parse_errors".into(), person.parse_errors.clone().into());
    attributes.insert("map_errors".into(), person.map_errors.clone().into());
    let preview = build_normalized_preview(&person.normalized_alarms, &person.schedule);
    attributes.insert(
        "normalized_preview".into(),
        serde_json::to_value(preview).unwrap_or(Value::Null),
    );

    if let Some(event_time) = person.last_event_time {
        attributes.insert(
            "last_event_time_local".into(),
            event_time.with_timezone(&ctx.tz).to_rfc3339().into(),
        );
    }
    if let Some(next) = person.next_alarm_time {
        insert_local_time(&mut attributes, "next_alarm", next, &ctx.tz);
    }
    if let Some(event) = &person.raw_event {
        attributes.insert(
            "event".into(),
            serde_json::to_value(event).unwrap_or(Value::Null),
        );
    }

    Value::Object(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::RawEvent;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    #[test]
    fn test_diagnostics_attributes() {
        let fired = DateTime::parse_from_rfc3339("2025-09-17T18:00:00Z").unwrap();
        let mut person = PersonState::new("ola", "Ola");
        assert_eq!(state(&person), "None");

        person.last_event_time = Some(fired);
        person.parse_errors = vec!["Alarm 3: missing Date".to_string()];
        person.raw_event = Some(RawEvent {
            event_type: "ha_ios_nextalarm".to_string(),
            origin: "REMOTE".to_string(),
            time_fired: fired.with_timezone(&Utc),
            context: json!({"id": "ctx"}),
            data: json!({"person": "Ola"}),
        });

        let ctx = EntityContext {
            tz: chrono_tz::UTC,
            now: fired.with_timezone(&Utc),
            stale_after: None,
        };
        assert_eq!(state(&person), "2025-09-17T18:00:00+00:00");
        let attributes = attributes(&person, &ctx);
        assert_eq!(attributes["parse_errors"], json!(["Alarm 3: missing Date"]));
        assert_eq!(attributes["normalized_preview"], json!([]));
        assert_eq!(attributes["next_alarm_time"], Value::Null);
        assert_eq!(attributes["event"]["origin"], "REMOTE");
        assert_eq!(attributes["event"]["data"]["person"], "Ola");
    }
}
