//! Home Assistant websocket API messages.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coordinator::InboundEvent;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(clippy::enum_variant_names)]
pub enum AuthServerMessage {
    AuthRequired {
        #[serde(default)]
        ha_version: String,
    },
    AuthOk {
        #[serde(default)]
        ha_version: String,
    },
    AuthInvalid {
        #[serde(default)]
        message: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthClientMessage {
    Auth { access_token: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Packet<T> {
    pub id: PacketId,
    #[serde(flatten)]
    pub payload: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PacketId(pub u32);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Result {
        success: bool,
        #[serde(default)]
        error: Option<ServerError>,
    },
    Event {
        event: HassEvent,
    },
}

#[derive(Debug, Deserialize)]
pub struct ServerError {
    pub code: String,
    pub message: String,
}

impl Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// An event from the Home Assistant event bus.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HassEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub origin: String,
    pub time_fired: DateTime<Utc>,
    #[serde(default)]
    pub context: Value,
}

impl From<HassEvent> for InboundEvent {
    fn from(event: HassEvent) -> Self {
        Self {
            event_type: event.event_type,
            origin: event.origin,
            time_fired: event.time_fired,
            context: event.context,
            data: event.data,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SubscribeEvents {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_type: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_packet() {
        let packet = Packet {
            id: PacketId(3),
            payload: ClientMessage::SubscribeEvents {
                event_type: Some("ha_ios_nextalarm".to_string()),
            },
        };
        assert_eq!(
            serde_json::to_value(&packet).unwrap(),
            json!({"id": 3, "type": "subscribe_events", "event_type": "ha_ios_nextalarm"})
        );
    }

    #[test]
    fn test_auth_messages() {
        let required: AuthServerMessage =
            serde_json::from_str(r#"{"type": "auth_required", "ha_version": "2025.9.1"}"#)
                .unwrap();
        assert!(matches!(required, AuthServerMessage::AuthRequired { .. }));

        let invalid: AuthServerMessage =
            serde_json::from_str(r#"{"type": "auth_invalid", "message": "Invalid password"}"#)
                .unwrap();
        assert!(
            matches!(invalid, AuthServerMessage::AuthInvalid { message } if message == "Invalid password")
        );

        let auth = AuthClientMessage::Auth {
            access_token: "token".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&auth).unwrap(),
            json!({"type": "auth", "access_token": "token"})
        );
    }

    #[test]
    fn test_event_packet() {
        let raw = json!({
            "id": 1,
            "type": "event",
            "event": {
                "event_type": "ha_ios_nextalarm",
                "data": {"person": "andrzej", "alarms": {}},
                "origin": "REMOTE",
                "time_fired": "2025-09-17T18:16:18.576523+00:00",
                "context": {"id": "ctx", "parent_id": null, "user_id": "user"}
            }
        });
        let packet: Packet<ServerMessage> = serde_json::from_value(raw).unwrap();
        assert_eq!(packet.id, PacketId(1));
        let ServerMessage::Event { event } = packet.payload else {
            panic!("expected event");
        };
        let inbound = InboundEvent::from(event);
        assert_eq!(inbound.event_type, "ha_ios_nextalarm");
        assert_eq!(inbound.origin, "REMOTE");
        assert_eq!(inbound.data["person"], "andrzej");
    }

    #[test]
    fn test_result_packet() {
        let raw = json!({
            "id": 2,
            "type": "result",
            "success": false,
            "error": {"code": "unauthorized", "message": "Unauthorized"}
        });
        let packet: Packet<ServerMessage> = serde_json::from_value(raw).unwrap();
        let ServerMessage::Result { success, error, .. } = packet.payload else {
            panic!("expected result");
        };
        assert!(!success);
        assert_eq!(error.unwrap().to_string(), "unauthorized: Unauthorized");
    }
}
