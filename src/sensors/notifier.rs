//! Person change notifier.
//!
//! The bridge loop owns the coordinator; whenever a person's state changes it
//! sends a snapshot here. Subscribers (the entity publisher, tests) receive
//! their own copy, so publishing never blocks the loop.

use tokio::sync::broadcast;

use crate::coordinator::PersonState;

/// Snapshot of a person after a change.
#[derive(Debug, Clone)]
pub struct PersonUpdate {
    pub state: PersonState,
    /// First time this person was seen since startup.
    pub is_new: bool,
}

/// Fan-out of person updates.
#[derive(Debug, Clone)]
pub struct PersonNotifier {
    tx: broadcast::Sender<PersonUpdate>,
}

impl PersonNotifier {
    /// Create a notifier buffering up to `capacity` updates per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PersonUpdate> {
        self.tx.subscribe()
    }

    /// Notify that a person changed.
    ///
    /// Having no subscribers is not an error.
    pub fn notify(&self, state: &PersonState, is_new: bool) {
        let _ = self.tx.send(PersonUpdate {
            state: state.clone(),
            is_new,
        });
    }
}

impl Default for PersonNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_snapshots() {
        let notifier = PersonNotifier::new(4);
        let mut rx = notifier.subscribe();
        notifier.notify(&PersonState::new("ola", "Ola"), true);

        let update = rx.recv().await.unwrap();
        assert_eq!(update.state.slug, "ola");
        assert!(update.is_new);
    }

    #[test]
    fn test_notify_without_subscribers() {
        PersonNotifier::default().notify(&PersonState::new("ola", "Ola"), false);
    }
}
