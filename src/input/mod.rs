//! Input sources that feed alarm events into the bridge.
//!
//! Current input sources:
//! - `hass`: Home Assistant websocket event subscription
//! - `mqtt`: alarm payloads and refresh markers forwarded over MQTT

pub mod hass;
pub mod mqtt;
