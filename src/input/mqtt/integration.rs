//! MQTT integration: inbound topics and the bridge's MQTT session.
//!
//! Owns the MQTT connection shared with the entity publisher. On every
//! (re)connect it subscribes to the inbound topics, marks the bridge online
//! and asks the bridge to republish, since retained discovery may have been
//! lost on the broker side.

use super::client::{MqttClient, MqttEvent, MqttMessage};
use crate::bridge::{BridgeCommand, BridgeHandle};
use crate::config::MqttConfig;
use crate::coordinator::InboundEvent;
use crate::sensors::TopicScheme;
use crate::sensors::discovery::PAYLOAD_ONLINE;
use chrono::Utc;
use log::{info, warn};
use std::time::Duration;
use rumqttc::{AsyncClient, QoS};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Origin recorded for events that arrive over MQTT.
pub const MQTT_ORIGIN: &str = "MQTT";

/// How long shutdown waits for queued publishes and the disconnect.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Maps MQTT topics to bridge commands.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    scheme: TopicScheme,
    event_type: String,
    refresh_event_type: String,
}

impl TopicRouter {
    pub fn new(
        scheme: TopicScheme,
        event_type: impl Into<String>,
        refresh_event_type: impl Into<String>,
    ) -> Self {
        Self {
            scheme,
            event_type: event_type.into(),
            refresh_event_type: refresh_event_type.into(),
        }
    }

    /// Topics the integration subscribes to.
    pub fn subscribe_topics(&self) -> Vec<String> {
        vec![
            self.scheme.event_topic(),
            self.scheme.refresh_topic(),
            self.scheme.hass_status_topic(),
        ]
    }

    /// Translate a message into a bridge command.
    ///
    /// Returns `None` for unrelated topics and unusable payloads.
    pub fn route(&self, msg: &MqttMessage) -> Option<BridgeCommand> {
        if msg.topic == self.scheme.hass_status_topic() {
            return (msg.payload.trim() == PAYLOAD_ONLINE).then_some(BridgeCommand::Republish);
        }

        let event_type = if msg.topic == self.scheme.event_topic() {
            &self.event_type
        } else if msg.topic == self.scheme.refresh_topic() {
            &self.refresh_event_type
        } else {
            return None;
        };

        let data = match serde_json::from_str::<Value>(&msg.payload) {
            Ok(data @ Value::Object(_)) => data,
            Ok(_) => {
                warn!("[MQTT] Payload on {} is not a JSON object", msg.topic);
                return None;
            }
            Err(e) => {
                warn!("[MQTT] Failed to parse payload on {}: {}", msg.topic, e);
                return None;
            }
        };
        let event = InboundEvent {
            event_type: event_type.clone(),
            origin: MQTT_ORIGIN.to_string(),
            time_fired: Utc::now(),
            context: Value::Null,
            data,
        };

        if msg.topic == self.scheme.event_topic() {
            Some(BridgeCommand::AlarmEvent(event))
        } else {
            Some(BridgeCommand::RefreshMarker(event))
        }
    }
}

/// MQTT Integration orchestrator.
pub struct MqttIntegration {
    config: MqttConfig,
    router: TopicRouter,
    scheme: TopicScheme,
}

impl MqttIntegration {
    pub fn new(config: MqttConfig, scheme: TopicScheme, router: TopicRouter) -> Self {
        Self {
            config,
            router,
            scheme,
        }
    }

    /// Start the MQTT integration.
    ///
    /// Returns the client for publishing and the task routing inbound
    /// messages to the bridge. After `cancel` the task flushes publishes
    /// still queued on the client, then disconnects; cancel it only once
    /// every other publisher is done.
    pub fn start(
        self,
        bridge: BridgeHandle,
        cancel: CancellationToken,
    ) -> (AsyncClient, JoinHandle<()>) {
        info!(
            "[MQTT] Connecting to {}:{}",
            self.config.broker_host, self.config.broker_port
        );
        let mqtt_client = MqttClient::new(&self.config, &self.scheme.availability_topic());
        let client = mqtt_client.client();
        let task_client = client.clone();

        let handle = tokio::spawn(async move {
            let (msg_tx, mut msg_rx) = mpsc::channel::<MqttEvent>(64);
            let mqtt_loop = tokio::spawn(mqtt_client.run(msg_tx));

            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = msg_rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                match event {
                    MqttEvent::Connected => self.on_connected(&task_client, &bridge).await,
                    MqttEvent::Message(msg) => {
                        if let Some(command) = self.router.route(&msg)
                            && bridge.send(command).await.is_err()
                        {
                            break;
                        }
                    }
                }
            }

            // Requests are sent in order, so the disconnect goes out last
            if let Err(e) = task_client.disconnect().await {
                warn!("[MQTT] Failed to request disconnect: {:?}", e);
            }
            let drain = async { while msg_rx.recv().await.is_some() {} };
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
                warn!("[MQTT] Disconnect did not complete in time");
            }
            mqtt_loop.abort();
            info!("[MQTT] Integration stopped");
        });

        (client, handle)
    }

    async fn on_connected(&self, client: &AsyncClient, bridge: &BridgeHandle) {
        for topic in self.router.subscribe_topics() {
            if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
                warn!("[MQTT] Failed to subscribe to {}: {:?}", topic, e);
            }
        }
        if let Err(e) = client
            .publish(
                self.scheme.availability_topic(),
                QoS::AtLeastOnce,
                true,
                PAYLOAD_ONLINE,
            )
            .await
        {
            warn!("[MQTT] Failed to publish availability: {:?}", e);
        }
        if bridge.send(BridgeCommand::Republish).await.is_err() {
            warn!("[MQTT] Bridge is not running");
        }
    }
}
