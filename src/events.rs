use crate::state::PlaybackState;
use crate::tracking::Interaction;
use std::time::Duration;
use tokio::sync::broadcast;

/// User-visible message that the UI shows and dismisses on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: &'static str,
    pub message: String,
    pub dismiss_after: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NarrationEvent {
    StateChanged(PlaybackState),
    Notice(Notice),
    Interaction(Interaction),
}

/// Fan-out of narration events to any number of observers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NarrationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: NarrationEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NarrationEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
