//! MQTT input source.
//!
//! Accepts alarm payloads and refresh markers forwarded through a broker and
//! listens for Home Assistant's birth message to re-announce discovery.

mod client;
mod integration;

pub use client::{MqttClient, MqttEvent, MqttMessage};
pub use integration::{MQTT_ORIGIN, MqttIntegration, TopicRouter};
