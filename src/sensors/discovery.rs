//! Home Assistant MQTT discovery payloads and topic layout.

use serde::Serialize;

use super::EntityKind;

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

/// Manufacturer shown on every person device.
pub const DEVICE_MANUFACTURER: &str = "Home Assistant Companion";
pub const DEVICE_MODEL: &str = "iOS NextAlarm";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discovery {
    pub name: String,
    pub object_id: String,
    pub unique_id: String,
    pub state_topic: String,
    pub json_attributes_topic: String,
    pub availability_topic: String,
    pub payload_available: String,
    pub payload_not_available: String,
    pub device: Device,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub name: String,
    pub identifiers: Vec<String>,
    pub manufacturer: String,
    pub model: String,
}

/// Topic naming for one bridge instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    pub discovery_prefix: String,
    pub base_topic: String,
    pub instance_id: String,
}

impl TopicScheme {
    pub fn new(
        discovery_prefix: impl Into<String>,
        base_topic: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            discovery_prefix: discovery_prefix.into(),
            base_topic: base_topic.into(),
            instance_id: instance_id.into(),
        }
    }

    pub fn object_id(&self, slug: &str, kind: EntityKind) -> String {
        format!("{slug}_{}", kind.object_suffix())
    }

    pub fn unique_id(&self, slug: &str, kind: EntityKind) -> String {
        format!("{}_{slug}_{}", self.instance_id, kind.unique_suffix())
    }

    pub fn config_topic(&self, slug: &str, kind: EntityKind) -> String {
        format!(
            "{}/{}/{}/{}/config",
            self.discovery_prefix,
            kind.component(),
            self.instance_id,
            self.object_id(slug, kind)
        )
    }

    pub fn state_topic(&self, slug: &str, kind: EntityKind) -> String {
        format!("{}/{slug}/{kind}/state", self.base_topic)
    }

    pub fn attributes_topic(&self, slug: &str, kind: EntityKind) -> String {
        format!("{}/{slug}/{kind}/attributes", self.base_topic)
    }

    /// Bridge availability, backed by the MQTT last will.
    pub fn availability_topic(&self) -> String {
        format!("{}/status", self.base_topic)
    }

    /// Inbound alarm payloads.
    pub fn event_topic(&self) -> String {
        format!("{}/event", self.base_topic)
    }

    /// Inbound refresh markers.
    pub fn refresh_topic(&self) -> String {
        format!("{}/refresh", self.base_topic)
    }

    /// Home Assistant's own birth/will topic.
    pub fn hass_status_topic(&self) -> String {
        format!("{}/status", self.discovery_prefix)
    }

    pub fn device(&self, slug: &str, person: &str) -> Device {
        Device {
            name: if person.is_empty() {
                slug.to_string()
            } else {
                person.to_string()
            },
            identifiers: vec![format!("{}_{slug}", self.instance_id)],
            manufacturer: DEVICE_MANUFACTURER.to_string(),
            model: DEVICE_MODEL.to_string(),
        }
    }

    /// Discovery payload for one entity of a person.
    pub fn discovery(&self, slug: &str, person: &str, kind: EntityKind) -> Discovery {
        let (payload_on, payload_off) = match kind {
            EntityKind::RefreshProblem => (Some("ON".to_string()), Some("OFF".to_string())),
            _ => (None, None),
        };
        Discovery {
            name: kind.name().to_string(),
            object_id: self.object_id(slug, kind),
            unique_id: self.unique_id(slug, kind),
            state_topic: self.state_topic(slug, kind),
            json_attributes_topic: self.attributes_topic(slug, kind),
            availability_topic: self.availability_topic(),
            payload_available: PAYLOAD_ONLINE.to_string(),
            payload_not_available: PAYLOAD_OFFLINE.to_string(),
            device: self.device(slug, person),
            device_class: kind.device_class().map(str::to_string),
            entity_category: kind.entity_category().map(str::to_string),
            icon: kind.icon().map(str::to_string),
            payload_on,
            payload_off,
        }
    }
}
