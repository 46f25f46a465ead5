//! Publishes person entities to Home Assistant over MQTT discovery.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use chrono_tz::Tz;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, QoS};
use strum::IntoEnumIterator;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::discovery::{PAYLOAD_OFFLINE, PAYLOAD_ONLINE, TopicScheme};
use super::notifier::PersonUpdate;
use super::{EntityContext, EntityKind};
use crate::coordinator::PersonState;
use crate::error::Result;

/// Destination for rendered entity messages.
#[async_trait]
pub trait StatePublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()>;
}

/// [`StatePublisher`] backed by the rumqttc client.
pub struct MqttStatePublisher {
    client: AsyncClient,
}

impl MqttStatePublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatePublisher for MqttStatePublisher {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
        debug!("[MQTT] Publishing to {}: {}", topic, payload);
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload.into_bytes())
            .await?;
        Ok(())
    }
}

/// Renders persons into discovery, state and attribute messages.
pub struct EntityPublisher {
    scheme: TopicScheme,
    tz: Tz,
    stale_after: Option<TimeDelta>,
    sink: Arc<dyn StatePublisher>,
    announced: Mutex<HashSet<String>>,
}

impl EntityPublisher {
    pub fn new(
        scheme: TopicScheme,
        tz: Tz,
        stale_after: Option<TimeDelta>,
        sink: Arc<dyn StatePublisher>,
    ) -> Self {
        Self {
            scheme,
            tz,
            stale_after,
            sink,
            announced: Mutex::new(HashSet::new()),
        }
    }

    /// Publish the discovery configs of a person's entities.
    pub async fn announce(&self, person: &PersonState) -> Result<()> {
        for kind in EntityKind::iter() {
            let discovery = self.scheme.discovery(&person.slug, &person.person, kind);
            let payload = serde_json::to_string(&discovery)?;
            self.sink
                .publish(&self.scheme.config_topic(&person.slug, kind), payload, true)
                .await?;
        }
        self.announced.lock().insert(person.slug.clone());
        info!("[MQTT] Announced entities for {}", person.person);
        Ok(())
    }

    /// Forget which persons were announced so the next publish re-announces.
    ///
    /// Used when Home Assistant comes back online and has lost its
    /// discovered entities.
    pub fn forget_announced(&self) {
        self.announced.lock().clear();
    }

    fn is_announced(&self, slug: &str) -> bool {
        self.announced.lock().contains(slug)
    }

    /// Publish state and attributes of every entity of a person.
    pub async fn publish_person(&self, person: &PersonState, is_new: bool) -> Result<()> {
        if is_new || !self.is_announced(&person.slug) {
            self.announce(person).await?;
        }
        let ctx = EntityContext {
            tz: self.tz,
            now: Utc::now(),
            stale_after: self.stale_after,
        };
        for kind in EntityKind::iter() {
            let rendered = kind.render(person, &ctx);
            self.sink
                .publish(
                    &self.scheme.state_topic(&person.slug, kind),
                    rendered.state,
                    true,
                )
                .await?;
            self.sink
                .publish(
                    &self.scheme.attributes_topic(&person.slug, kind),
                    serde_json::to_string(&rendered.attributes)?,
                    true,
                )
                .await?;
        }
        Ok(())
    }

    pub async fn publish_availability(&self, online: bool) -> Result<()> {
        let payload = if online { PAYLOAD_ONLINE } else { PAYLOAD_OFFLINE };
        self.sink
            .publish(&self.scheme.availability_topic(), payload.to_string(), true)
            .await
    }

    /// Publish every update received from the notifier until cancelled.
    pub fn run(
        self: Arc<Self>,
        mut updates: broadcast::Receiver<PersonUpdate>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let update = tokio::select! {
                    _ = cancel.cancelled() => break,
                    update = updates.recv() => update,
                };
                match update {
                    Ok(update) => {
                        if let Err(e) = self.publish_person(&update.state, update.is_new).await {
                            error!(
                                "[MQTT] Failed to publish entities for {}: {}",
                                update.state.person, e
                            );
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("[MQTT] Entity publisher lagged, skipped {} updates", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("[MQTT] Entity publisher stopped");
        })
    }
}

/// [`StatePublisher`] that records messages in memory.
#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<(String, String, bool)>>,
}

impl RecordingPublisher {
    /// All `(topic, payload, retain)` triples in publish order.
    pub fn messages(&self) -> Vec<(String, String, bool)> {
        self.messages.lock().clone()
    }

    /// Most recent payload published on `topic`.
    pub fn last_payload(&self, topic: &str) -> Option<String> {
        self.messages
            .lock()
            .iter()
            .rev()
            .find(|(t, _, _)| t == topic)
            .map(|(_, payload, _)| payload.clone())
    }

    pub fn count(&self, topic: &str) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|(t, _, _)| t == topic)
            .count()
    }
}

#[async_trait]
impl StatePublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
        self.messages
            .lock()
            .push((topic.to_string(), payload, retain));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher() -> (Arc<RecordingPublisher>, EntityPublisher) {
        let sink = Arc::new(RecordingPublisher::default());
        let scheme = TopicScheme::new("homeassistant", "ios_nextalarm", "ios_nextalarm");
        let publisher = EntityPublisher::new(scheme, chrono_tz::UTC, None, sink.clone());
        (sink, publisher)
    }

    #[tokio::test]
    async fn test_first_publish_announces() {
        let (sink, publisher) = publisher();
        let person = PersonState::new("ola", "Ola");
        publisher.publish_person(&person, false).await.unwrap();
        publisher.publish_person(&person, false).await.unwrap();

        let config = "homeassistant/sensor/ios_nextalarm/ola_next_alarm/config";
        assert_eq!(sink.count(config), 1);
        assert_eq!(
            sink.last_payload("ios_nextalarm/ola/next_alarm/state").as_deref(),
            Some("None")
        );
        assert_eq!(
            sink.last_payload("ios_nextalarm/ola/refresh_problem/state").as_deref(),
            Some("OFF")
        );
        assert!(sink.messages().iter().all(|(_, _, retain)| *retain));

        publisher.forget_announced();
        publisher.publish_person(&person, false).await.unwrap();
        assert_eq!(sink.count(config), 2);
    }

    #[tokio::test]
    async fn test_availability() {
        let (sink, publisher) = publisher();
        publisher.publish_availability(true).await.unwrap();
        publisher.publish_availability(false).await.unwrap();
        assert_eq!(
            sink.last_payload("ios_nextalarm/status").as_deref(),
            Some("offline")
        );
    }
}
