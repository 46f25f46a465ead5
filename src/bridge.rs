//! The bridge event loop.
//!
//! A single task owns the coordinator, the state store and the per-person
//! rollover timers. Inbound sources and timers talk to it through
//! [`BridgeCommand`]s; every accepted change is saved and broadcast to the
//! entity publisher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::coordinator::{Coordinator, EventError, InboundEvent, Processed};
use crate::error::{BridgeError, Result};
use crate::refresh::run_freshness_check;
use crate::sensors::{EntityPublisher, PersonNotifier};
use crate::storage::StateStore;

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCommand {
    /// Alarm list pushed by the Shortcut.
    AlarmEvent(InboundEvent),
    /// Refresh start/end marker.
    RefreshMarker(InboundEvent),
    /// A person's next alarm time has been reached.
    Rollover { slug: String, at: DateTime<Utc> },
    FreshnessCheck,
    /// Re-announce and republish every person.
    Republish,
}

/// Cloneable sender used by inbound sources.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<BridgeCommand>,
}

impl BridgeHandle {
    pub fn from_sender(tx: mpsc::Sender<BridgeCommand>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, command: BridgeCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| BridgeError::BridgeClosed)
    }
}

pub struct Bridge {
    coordinator: Coordinator,
    store: Arc<StateStore>,
    notifier: PersonNotifier,
    publisher: Option<Arc<EntityPublisher>>,
    clock: Clock,
    timers: HashMap<String, JoinHandle<()>>,
    tx: mpsc::Sender<BridgeCommand>,
    rx: mpsc::Receiver<BridgeCommand>,
    ticks: Option<(mpsc::Receiver<()>, JoinHandle<()>)>,
}

impl Bridge {
    pub fn new(
        coordinator: Coordinator,
        store: Arc<StateStore>,
        notifier: PersonNotifier,
    ) -> (Self, BridgeHandle) {
        let (tx, rx) = mpsc::channel(64);
        let bridge = Self {
            coordinator,
            store,
            notifier,
            publisher: None,
            clock: Arc::new(Utc::now),
            timers: HashMap::new(),
            tx: tx.clone(),
            rx,
            ticks: None,
        };
        (bridge, BridgeHandle { tx })
    }

    /// Publisher to re-announce on [`BridgeCommand::Republish`] and to mark
    /// offline on shutdown.
    pub fn with_publisher(mut self, publisher: Arc<EntityPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Evaluate refresh status every `period`.
    pub fn with_freshness_check(mut self, period: Duration) -> Self {
        let (tick_tx, tick_rx) = mpsc::channel(1);
        let handle = run_freshness_check(period, tick_tx);
        self.ticks = Some((tick_rx, handle));
        self
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Restore persisted persons, publish them and arm their timers.
    pub fn start(&mut self) {
        let now = self.now();
        let persons = self.store.persons();
        info!(
            "[Bridge] Restoring {} persons from {:?}",
            persons.len(),
            self.store.path()
        );
        self.coordinator.restore(persons, now);

        let slugs: Vec<String> = self.coordinator.persons().map(str::to_string).collect();
        for slug in &slugs {
            self.publish(slug, true);
            self.schedule_rollover(slug);
        }
        if !slugs.is_empty() {
            self.save();
        }
    }

    /// Handle one command.
    pub fn handle(&mut self, command: BridgeCommand) {
        let now = self.now();
        match command {
            BridgeCommand::AlarmEvent(event) => {
                let result = self.coordinator.process_event(&event, now);
                self.after_event(result);
            }
            BridgeCommand::RefreshMarker(event) => {
                let result = self.coordinator.record_refresh(&event, now);
                self.after_event(result);
            }
            BridgeCommand::Rollover { slug, at } => {
                if self.coordinator.rollover(&slug, at) {
                    self.save();
                    self.publish(&slug, false);
                    self.schedule_rollover(&slug);
                } else {
                    self.timers.remove(&slug);
                }
            }
            BridgeCommand::FreshnessCheck => {
                let changed = self.coordinator.evaluate_refresh(now);
                if !changed.is_empty() {
                    self.save();
                }
                self.publish_all();
            }
            BridgeCommand::Republish => {
                info!("[Bridge] Republishing all persons");
                if let Some(publisher) = &self.publisher {
                    publisher.forget_announced();
                }
                self.publish_all();
            }
        }
    }

    fn after_event(&mut self, result: std::result::Result<Processed, EventError>) {
        match result {
            Ok(processed) => {
                if processed.is_new {
                    info!("[Bridge] New person: {}", processed.slug);
                }
                self.save();
                self.publish(&processed.slug, processed.is_new);
                self.schedule_rollover(&processed.slug);
            }
            Err(e) => warn!("[Bridge] Ignoring event: {}", e),
        }
    }

    fn save(&self) {
        self.store.save_persons(self.coordinator.person_states());
    }

    fn publish(&self, slug: &str, is_new: bool) {
        if let Some(state) = self.coordinator.get_person_state(slug) {
            self.notifier.notify(state, is_new);
        }
    }

    fn publish_all(&self) {
        for state in self.coordinator.person_states() {
            self.notifier.notify(state, false);
        }
    }

    /// Arm a one-shot timer for the person's next alarm, replacing any
    /// previous one.
    fn schedule_rollover(&mut self, slug: &str) {
        if let Some(previous) = self.timers.remove(slug) {
            previous.abort();
        }
        let Some(next) = self
            .coordinator
            .get_person_state(slug)
            .and_then(|state| state.next_alarm_time)
        else {
            return;
        };

        let at = next.with_timezone(&Utc);
        let delay = (at - self.now()).to_std().unwrap_or(Duration::ZERO);
        debug!(
            "[Bridge] Rollover for {} scheduled at {} (in {}s)",
            slug,
            at,
            delay.as_secs()
        );
        let tx = self.tx.clone();
        let target = slug.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(BridgeCommand::Rollover { slug: target, at }).await;
        });
        self.timers.insert(slug.to_string(), handle);
    }

    /// Run until cancelled, then stop timers, save and mark the bridge
    /// offline.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.start();
        info!("[Bridge] Event loop running");

        let mut ticks = self.ticks.take();
        loop {
            let command = tokio::select! {
                _ = cancel.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
                Some(()) = next_tick(&mut ticks) => BridgeCommand::FreshnessCheck,
            };
            self.handle(command);
        }

        info!("[Bridge] Shutting down");
        if let Some((_, handle)) = ticks {
            handle.abort();
        }
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        self.save();
        if let Some(publisher) = &self.publisher
            && let Err(e) = publisher.publish_availability(false).await
        {
            error!("[Bridge] Failed to publish offline status: {}", e);
        }
    }
}

async fn next_tick(ticks: &mut Option<(mpsc::Receiver<()>, JoinHandle<()>)>) -> Option<()> {
    match ticks {
        Some((rx, _)) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlarmConfig;
    use crate::refresh::{RefreshPolicy, RefreshProblem};
    use chrono::TimeDelta;
    use serde_json::json;

    fn fixed_clock(text: &str) -> Clock {
        let now = DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc);
        Arc::new(move || now)
    }

    fn bridge(dir: &tempfile::TempDir, clock: &str) -> (Bridge, PersonNotifier) {
        let options = AlarmConfig {
            time_zone: "Europe/Warsaw".to_string(),
            ..Default::default()
        };
        let coordinator = Coordinator::new(options, RefreshPolicy::default());
        let store = Arc::new(StateStore::new(dir.path().join("state.json")));
        let notifier = PersonNotifier::new(16);
        let (bridge, _handle) = Bridge::new(coordinator, store, notifier.clone());
        (bridge.with_clock(fixed_clock(clock)), notifier)
    }

    fn alarm_event(fired: &str) -> InboundEvent {
        InboundEvent {
            event_type: "ha_ios_nextalarm".to_string(),
            origin: "REMOTE".to_string(),
            time_fired: DateTime::parse_from_rfc3339(fired).unwrap().with_timezone(&Utc),
            context: json!({}),
            data: json!({"person": "Ola", "alarms": {
                "1": {"Date": "18.09.2025 05:15", "Repeat": "on", "Repeat Days": "Monday\nThursday",
                      "Snooze": "on", "State": "on"}
            }}),
        }
    }

    #[tokio::test]
    async fn test_event_saves_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let (mut bridge, notifier) = bridge(&dir, "2025-09-17T18:00:00Z");
        let mut updates = notifier.subscribe();

        bridge.handle(BridgeCommand::AlarmEvent(alarm_event("2025-09-17T18:00:00Z")));

        let update = updates.recv().await.unwrap();
        assert!(update.is_new);
        assert_eq!(
            update.state.next_alarm_time.unwrap().to_rfc3339(),
            "2025-09-18T05:15:00+02:00"
        );
        assert!(bridge.timers.contains_key("ola"));
        let stored = StateStore::new(dir.path().join("state.json")).persons();
        assert!(stored.contains_key("ola"));
    }

    #[tokio::test]
    async fn test_invalid_event_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (mut bridge, notifier) = bridge(&dir, "2025-09-17T18:00:00Z");
        let mut updates = notifier.subscribe();
        let mut event = alarm_event("2025-09-17T18:00:00Z");
        event.data = json!({"alarms": {}});

        bridge.handle(BridgeCommand::AlarmEvent(event));
        assert!(updates.try_recv().is_err());
        assert_eq!(bridge.coordinator().persons().count(), 0);
    }

    #[tokio::test]
    async fn test_rollover_advances_to_following_alarm() {
        let dir = tempfile::tempdir().unwrap();
        let (mut bridge, notifier) = bridge(&dir, "2025-09-17T18:00:00Z");
        bridge.handle(BridgeCommand::AlarmEvent(alarm_event("2025-09-17T18:00:00Z")));
        let mut updates = notifier.subscribe();

        let at = DateTime::parse_from_rfc3339("2025-09-18T05:15:00+02:00")
            .unwrap()
            .with_timezone(&Utc);
        bridge.handle(BridgeCommand::Rollover {
            slug: "ola".to_string(),
            at,
        });

        let update = updates.recv().await.unwrap();
        assert_eq!(
            update.state.next_alarm_time.unwrap().to_rfc3339(),
            "2025-09-22T05:15:00+02:00"
        );
    }

    #[tokio::test]
    async fn test_freshness_check_flags_stale_person() {
        let dir = tempfile::tempdir().unwrap();
        let (mut bridge, notifier) = bridge(&dir, "2025-09-17T18:00:00Z");
        bridge.handle(BridgeCommand::AlarmEvent(alarm_event("2025-09-17T18:00:00Z")));

        let later = DateTime::parse_from_rfc3339("2025-09-17T18:00:00Z").unwrap()
            + TimeDelta::hours(27);
        bridge = bridge.with_clock(fixed_clock(&later.to_rfc3339()));
        let mut updates = notifier.subscribe();
        bridge.handle(BridgeCommand::FreshnessCheck);

        let update = updates.recv().await.unwrap();
        assert_eq!(update.state.refresh_problem, Some(RefreshProblem::Stale));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _notifier) = bridge(&dir, "2025-09-17T18:00:00Z");
        let cancel = CancellationToken::new();
        let task = tokio::spawn(bridge.run(cancel.clone()));
        cancel.cancel();
        task.await.unwrap();
    }
}
