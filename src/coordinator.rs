//! Per-person alarm state.
//!
//! The coordinator owns every person's latest reading and derives the next
//! alarm, the rollover point and the refresh status from it. It performs no
//! I/O and takes the current time as an argument; the bridge loop feeds it
//! events and timer ticks.

use crate::alarm::{
    self, AlarmMap, MAP_VERSION, NextAlarmComputation, Note, Schedule, build_weekday_maps,
    normalize_event,
};
use crate::config::AlarmConfig;
use crate::refresh::{RefreshInputs, RefreshPhase, RefreshPolicy, RefreshProblem};
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use chrono_tz::Tz;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// An event received from Home Assistant's event bus or the MQTT topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub event_type: String,
    pub origin: String,
    pub time_fired: DateTime<Utc>,
    #[serde(default)]
    pub context: Value,
    pub data: Value,
}

/// Record of the last event kept for the diagnostics sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_type: String,
    pub origin: String,
    pub time_fired: DateTime<Utc>,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub data: Value,
}

impl From<&InboundEvent> for RawEvent {
    fn from(event: &InboundEvent) -> Self {
        Self {
            event_type: event.event_type.clone(),
            origin: event.origin.clone(),
            time_fired: event.time_fired,
            context: event.context.clone(),
            data: event.data.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("event without person")]
    MissingPerson,

    #[error("event for {0} does not contain alarm dictionary")]
    MissingAlarms(String),

    #[error("refresh marker for {0} has invalid phase '{1}'")]
    InvalidPhase(String, String),
}

/// Runtime and persisted state for one person (one phone).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonState {
    #[serde(skip)]
    pub slug: String,
    pub person: String,
    #[serde(default)]
    pub normalized_alarms: AlarmMap,
    #[serde(default)]
    pub parse_errors: Vec<String>,
    #[serde(default)]
    pub map_errors: Vec<String>,
    #[serde(default)]
    pub map_locale: Option<String>,
    #[serde(default)]
    pub last_event_time: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub raw_event: Option<RawEvent>,
    #[serde(default)]
    pub next_alarm_key: Option<String>,
    #[serde(default)]
    pub next_alarm_time: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub note: Option<Note>,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default = "default_map_version")]
    pub map_version: u32,
    #[serde(default)]
    pub last_refresh_start: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub last_refresh_end: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub refresh_problem: Option<RefreshProblem>,
}

fn default_map_version() -> u32 {
    MAP_VERSION
}

impl PersonState {
    pub fn new(slug: impl Into<String>, person: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            person: person.into(),
            normalized_alarms: AlarmMap::new(),
            parse_errors: Vec::new(),
            map_errors: Vec::new(),
            map_locale: None,
            last_event_time: None,
            raw_event: None,
            next_alarm_key: None,
            next_alarm_time: None,
            note: Some(Note::Waiting),
            schedule: Schedule::new(),
            map_version: MAP_VERSION,
            last_refresh_start: None,
            last_refresh_end: None,
            refresh_problem: None,
        }
    }

    /// Alarm that rings next, if any.
    pub fn next_alarm(&self) -> Option<&alarm::NormalizedAlarm> {
        self.next_alarm_key
            .as_ref()
            .and_then(|key| self.normalized_alarms.get(key))
    }

    pub fn has_refresh_problem(&self) -> bool {
        self.refresh_problem.is_some()
    }

    fn apply(&mut self, computation: NextAlarmComputation) {
        self.next_alarm_key = computation.alarm.map(|alarm| alarm.key);
        self.next_alarm_time = computation.next_time;
        self.note = computation.note;
        self.schedule = computation.schedule;
    }

    fn refresh_inputs(&self) -> RefreshInputs {
        RefreshInputs {
            last_event_time: self.last_event_time,
            last_refresh_start: self.last_refresh_start,
            last_refresh_end: self.last_refresh_end,
        }
    }
}

/// Turn a person name into the identifier used in entity ids.
///
/// Runs of non-word characters become `_`, the result is trimmed of `_` and
/// lowercased; names made only of symbols fall back to the trimmed name.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_separator = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            if pending_separator {
                slug.push('_');
                pending_separator = false;
            }
            slug.extend(ch.to_lowercase());
        } else {
            pending_separator = true;
        }
    }
    let slug = slug.trim_matches('_').to_string();
    if slug.is_empty() {
        text.trim().to_lowercase()
    } else {
        slug
    }
}

/// What an accepted event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub slug: String,
    pub is_new: bool,
}

/// Owns every person's state.
pub struct Coordinator {
    options: AlarmConfig,
    tz: Tz,
    policy: RefreshPolicy,
    persons: BTreeMap<String, PersonState>,
}

impl Coordinator {
    pub fn new(options: AlarmConfig, policy: RefreshPolicy) -> Self {
        let tz = options.time_zone();
        Self {
            options,
            tz,
            policy,
            persons: BTreeMap::new(),
        }
    }

    pub fn time_zone(&self) -> Tz {
        self.tz
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    /// Known person slugs, in order.
    pub fn persons(&self) -> impl Iterator<Item = &str> {
        self.persons.keys().map(String::as_str)
    }

    pub fn person_states(&self) -> impl Iterator<Item = &PersonState> {
        self.persons.values()
    }

    pub fn get_person_state(&self, slug: &str) -> Option<&PersonState> {
        self.persons.get(slug)
    }

    /// Apply an alarm event. Last write wins.
    pub fn process_event(
        &mut self,
        event: &InboundEvent,
        now: DateTime<Utc>,
    ) -> Result<Processed, EventError> {
        let person_raw = person_name(&event.data).ok_or(EventError::MissingPerson)?;
        let Some(alarms) = event.data.get("alarms").and_then(Value::as_object) else {
            return Err(EventError::MissingAlarms(person_raw));
        };

        let (maps, map_errors) = build_weekday_maps(&self.options.weekday_custom_map);
        if !map_errors.is_empty() {
            warn!("Custom weekday map issues: \n{}", map_errors.join("\n"));
        }
        let normalized = normalize_event(
            alarms,
            &self.tz,
            &self.options.weekday_locale,
            &maps,
            &map_errors,
        );
        let computation = alarm::compute_next_alarm(&normalized.alarms, &now, &self.tz);

        let (state, is_new) = ensure_person(&mut self.persons, &person_raw);
        let fired = event.time_fired.with_timezone(&self.tz).fixed_offset();
        state.normalized_alarms = normalized.alarms;
        state.parse_errors = normalized.parse_errors;
        state.map_errors = normalized.map_errors;
        state.map_locale = Some(normalized.map_locale);
        state.last_event_time = Some(fired);
        state.last_refresh_end = Some(fired);
        state.map_version = MAP_VERSION;
        state.raw_event = Some(RawEvent::from(event));
        state.apply(computation);
        state.refresh_problem = self.policy.evaluate(&state.refresh_inputs(), now);

        debug!(
            "Processed NextAlarm event for {}; next alarm {:?}",
            state.person, state.next_alarm_time
        );
        Ok(Processed {
            slug: state.slug.clone(),
            is_new,
        })
    }

    /// Record a refresh start/end marker sent by the Shortcut.
    pub fn record_refresh(
        &mut self,
        event: &InboundEvent,
        now: DateTime<Utc>,
    ) -> Result<Processed, EventError> {
        let person_raw = person_name(&event.data).ok_or(EventError::MissingPerson)?;
        let phase: RefreshPhase = match event.data.get("phase") {
            None | Some(Value::Null) => RefreshPhase::Start,
            Some(Value::String(text)) => text
                .trim()
                .parse()
                .map_err(|_| EventError::InvalidPhase(person_raw.clone(), text.clone()))?,
            Some(other) => {
                return Err(EventError::InvalidPhase(person_raw, other.to_string()));
            }
        };

        let (state, is_new) = ensure_person(&mut self.persons, &person_raw);
        let fired = event.time_fired.with_timezone(&self.tz).fixed_offset();
        match phase {
            RefreshPhase::Start => state.last_refresh_start = Some(fired),
            RefreshPhase::End => state.last_refresh_end = Some(fired),
        }
        state.refresh_problem = self.policy.evaluate(&state.refresh_inputs(), now);
        debug!("Refresh {} recorded for {}", phase, state.person);
        Ok(Processed {
            slug: state.slug.clone(),
            is_new,
        })
    }

    /// Recompute a person's schedule when their next alarm has fired.
    ///
    /// Returns false for unknown persons.
    pub fn rollover(&mut self, slug: &str, trigger: DateTime<Utc>) -> bool {
        let tz = self.tz;
        let Some(state) = self.persons.get_mut(slug) else {
            return false;
        };
        refresh_schedule(state, trigger, &tz);
        debug!("Rollover executed for {}", state.person);
        true
    }

    /// Restore persisted persons.
    ///
    /// A stored next alarm that is still ahead is kept as is; otherwise the
    /// schedule is recomputed from `now`.
    pub fn restore(&mut self, persons: BTreeMap<String, PersonState>, now: DateTime<Utc>) {
        let tz = self.tz;
        for (slug, mut state) in persons {
            state.slug = slug.clone();
            match state.next_alarm_time {
                Some(next) if now <= next => {
                    let near_time = next - TimeDelta::seconds(1);
                    let computation =
                        alarm::compute_next_alarm(&state.normalized_alarms, &near_time, &tz);
                    state.apply(computation);
                }
                _ => refresh_schedule(&mut state, now, &tz),
            }
            state.refresh_problem = self.policy.evaluate(&state.refresh_inputs(), now);
            self.persons.insert(slug, state);
        }
    }

    /// Re-evaluate every person's refresh status.
    ///
    /// Returns the slugs whose status changed.
    pub fn evaluate_refresh(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut changed = Vec::new();
        for (slug, state) in &mut self.persons {
            let status = self.policy.evaluate(&state.refresh_inputs(), now);
            if status != state.refresh_problem {
                match status {
                    Some(problem) => warn!("Refresh problem for {}: {}", state.person, problem),
                    None => debug!("Refresh problem cleared for {}", state.person),
                }
                state.refresh_problem = status;
                changed.push(slug.clone());
            }
        }
        changed
    }
}

fn ensure_person<'a>(
    persons: &'a mut BTreeMap<String, PersonState>,
    person_raw: &str,
) -> (&'a mut PersonState, bool) {
    let slug = slugify(person_raw);
    let is_new = !persons.contains_key(&slug);
    let state = persons
        .entry(slug.clone())
        .or_insert_with(|| PersonState::new(slug, person_raw));
    state.person = person_raw.to_string();
    (state, is_new)
}

/// Person name of an event; falsy JSON values are treated as absent.
fn person_name(data: &Value) -> Option<String> {
    let person = match data.get("person")? {
        Value::String(text) => text.trim().to_string(),
        Value::Null | Value::Bool(false) => return None,
        Value::Number(number) if number.as_f64() == Some(0.0) => return None,
        Value::Array(items) if items.is_empty() => return None,
        Value::Object(fields) if fields.is_empty() => return None,
        other => other.to_string(),
    };
    (!person.is_empty()).then_some(person)
}

fn refresh_schedule(state: &mut PersonState, now: DateTime<Utc>, tz: &Tz) {
    if state.normalized_alarms.is_empty() {
        state.next_alarm_key = None;
        state.next_alarm_time = None;
        state.note = Some(if state.last_event_time.is_some() {
            Note::NoAlarms
        } else {
            Note::Waiting
        });
        state.schedule = Schedule::new();
        return;
    }
    let computation = alarm::compute_next_alarm(&state.normalized_alarms, &now, tz);
    state.apply(computation);
    state.map_version = MAP_VERSION;
}
