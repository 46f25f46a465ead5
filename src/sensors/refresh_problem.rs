//! Refresh-problem binary sensor.

use serde_json::{Map, Value};

use super::{EntityContext, iso};
use crate::coordinator::PersonState;

pub const STATE_ON: &str = "ON";
pub const STATE_OFF: &str = "OFF";

pub fn state(person: &PersonState) -> String {
    if person.has_refresh_problem() {
        STATE_ON.to_string()
    } else {
        STATE_OFF.to_string()
    }
}

pub fn attributes(person: &PersonState, ctx: &EntityContext) -> Value {
    let mut attributes = Map::new();
    attributes.insert("source_person".into(), person.person.clone().into());
    attributes.insert("last_refresh_start".into(), iso(person.last_refresh_start));
    attributes.insert("last_refresh_end".into(), iso(person.last_refresh_end));
    attributes.insert("last_event_time".into(), iso(person.last_event_time));
    attributes.insert(
        "reason".into(),
        person
            .refresh_problem
            .map(|problem| Value::from(problem.to_string()))
            .unwrap_or(Value::Null),
    );
    attributes.insert(
        "stale_after_seconds".into(),
        ctx.stale_after
            .map(|interval| Value::from(interval.num_seconds()))
            .unwrap_or(Value::Null),
    );
    Value::Object(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::RefreshProblem;
    use chrono::{TimeDelta, Utc};

    #[test]
    fn test_refresh_problem_state() {
        let ctx = EntityContext {
            tz: chrono_tz::UTC,
            now: Utc::now(),
            stale_after: Some(TimeDelta::hours(26)),
        };
        let mut person = PersonState::new("ola", "Ola");
        assert_eq!(state(&person), "OFF");
        assert_eq!(attributes(&person, &ctx)["reason"], Value::Null);

        person.refresh_problem = Some(RefreshProblem::RefreshIncomplete);
        assert_eq!(state(&person), "ON");
        let attributes = attributes(&person, &ctx);
        assert_eq!(attributes["reason"], "refresh_incomplete");
        assert_eq!(attributes["stale_after_seconds"], 93_600);
    }
}
