//! Home Assistant entities exposed for each person.
//!
//! Every person gets one device with three entities. Their states and
//! attributes are rendered from a [`PersonState`] snapshot and pushed over
//! MQTT by the [`publisher`].

pub mod diagnostics;
pub mod discovery;
pub mod next_alarm;
pub mod notifier;
pub mod publisher;
pub mod refresh_problem;

pub use discovery::{Discovery, TopicScheme};
pub use notifier::{PersonNotifier, PersonUpdate};
pub use publisher::{EntityPublisher, MqttStatePublisher, StatePublisher};

use crate::alarm::Note;
use crate::coordinator::PersonState;
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use strum::{Display, EnumIter};

/// MQTT payload Home Assistant reads as an unknown state.
pub const UNKNOWN_STATE: &str = "None";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    NextAlarm,
    Diagnostics,
    RefreshProblem,
}

impl EntityKind {
    pub fn component(self) -> &'static str {
        match self {
            EntityKind::RefreshProblem => "binary_sensor",
            _ => "sensor",
        }
    }

    /// Appended to the person slug to form the object id.
    pub fn object_suffix(self) -> &'static str {
        match self {
            EntityKind::NextAlarm => "next_alarm",
            EntityKind::Diagnostics => "next_alarm_diagnostics",
            EntityKind::RefreshProblem => "next_alarm_refresh_problem",
        }
    }

    pub fn unique_suffix(self) -> &'static str {
        match self {
            EntityKind::NextAlarm => "next",
            EntityKind::Diagnostics => "diagnostics",
            EntityKind::RefreshProblem => "refresh_problem",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::NextAlarm => "Next alarm",
            EntityKind::Diagnostics => "Next alarm diagnostics",
            EntityKind::RefreshProblem => "Refresh problem",
        }
    }

    pub fn device_class(self) -> Option<&'static str> {
        match self {
            EntityKind::NextAlarm => Some("timestamp"),
            EntityKind::Diagnostics => None,
            EntityKind::RefreshProblem => Some("problem"),
        }
    }

    pub fn entity_category(self) -> Option<&'static str> {
        match self {
            EntityKind::NextAlarm => None,
            EntityKind::Diagnostics | EntityKind::RefreshProblem => Some("diagnostic"),
        }
    }

    pub fn icon(self) -> Option<&'static str> {
        match self {
            EntityKind::NextAlarm => Some("mdi:alarm"),
            EntityKind::Diagnostics => Some("mdi:bug-outline"),
            EntityKind::RefreshProblem => None,
        }
    }

    /// Render state and attributes for a person.
    pub fn render(self, person: &PersonState, ctx: &EntityContext) -> EntityState {
        match self {
            EntityKind::NextAlarm => EntityState {
                state: next_alarm::state(person),
                attributes: next_alarm::attributes(person, ctx),
            },
            EntityKind::Diagnostics => EntityState {
                state: diagnostics::state(person),
                attributes: diagnostics::attributes(person, ctx),
            },
            EntityKind::RefreshProblem => EntityState {
                state: refresh_problem::state(person),
                attributes: refresh_problem::attributes(person, ctx),
            },
        }
    }
}

/// Values shared by every render pass.
#[derive(Debug, Clone, Copy)]
pub struct EntityContext {
    pub tz: Tz,
    pub now: DateTime<Utc>,
    pub stale_after: Option<TimeDelta>,
}

/// Rendered state payload and JSON attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub state: String,
    pub attributes: Value,
}

pub(crate) fn note_text(note: Option<Note>) -> Value {
    note.map(|note| Value::from(note.message()))
        .unwrap_or(Value::Null)
}

pub(crate) fn iso(time: Option<DateTime<FixedOffset>>) -> Value {
    time.map(|time| Value::from(time.to_rfc3339()))
        .unwrap_or(Value::Null)
}

/// Adds the `<prefix>_local`, date and clock time attributes for a time.
pub(crate) fn insert_local_time(
    attributes: &mut Map<String, Value>,
    prefix: &str,
    time: DateTime<FixedOffset>,
    tz: &Tz,
) {
    let local = time.with_timezone(tz);
    attributes.insert(format!("{prefix}_time_local"), local.to_rfc3339().into());
    attributes.insert(
        format!("{prefix}_date_local"),
        local.date_naive().to_string().into(),
    );
    attributes.insert(
        format!("{prefix}_clock_time_local"),
        local.format("%H:%M:%S").to_string().into(),
    );
}
