//! Interaction events at the reader's fixed trigger points.
//!
//! Only the trigger points are modelled; what an analytics sink does with
//! the events is up to whoever subscribes to the [`EventBus`].

use crate::events::{EventBus, NarrationEvent};
use crate::storage::{get_parsed, KeyValueStore};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub const PLAYBACK_COUNT_KEY: &str = "audio_playback_count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionAction {
    SynthesisStart,
    SynthesisComplete,
    SynthesisError,
    PlaybackStart,
    PlaybackResume,
    PlaybackPause,
    PlaybackStop,
    PlaybackComplete,
    PlaybackError,
    Cleanup,
    StartReading,
    PageChange,
    PauseReading,
    ResumeReading,
    ReadingTime,
    EndReading,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interaction {
    pub action: InteractionAction,
    pub session_id: String,
    pub playback_count: u64,
    pub page: Option<usize>,
    /// Seconds read since the clock last started, on `reading_time` only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading_secs: Option<u64>,
    pub timestamp_ms: i64,
}

pub struct InteractionTracker {
    session_id: String,
    playback_count: AtomicU64,
    reading_started_ms: AtomicI64,
    store: Arc<dyn KeyValueStore>,
    bus: EventBus,
}

impl InteractionTracker {
    pub fn new(store: Arc<dyn KeyValueStore>, bus: EventBus) -> Self {
        let playback_count = get_parsed::<u64>(store.as_ref(), PLAYBACK_COUNT_KEY)
            .unwrap_or_else(|e| {
                tracing::warn!("Resetting playback counter: {}", e);
                None
            })
            .unwrap_or(0);

        let id = Uuid::new_v4().simple().to_string();
        Self {
            session_id: format!("tts_{}", &id[..9]),
            playback_count: AtomicU64::new(playback_count),
            reading_started_ms: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            store,
            bus,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn playback_count(&self) -> u64 {
        self.playback_count.load(Ordering::SeqCst)
    }

    /// Counts one more synthesized clip and persists the total.
    pub fn increment_playback(&self) -> u64 {
        let count = self.playback_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Err(e) = self.store.set(PLAYBACK_COUNT_KEY, &count.to_string()) {
            tracing::warn!("Failed to persist playback counter: {}", e);
        }
        count
    }

    pub fn record(&self, action: InteractionAction, page: Option<usize>) -> Interaction {
        self.publish(action, page, None)
    }

    /// Restarts the reading clock, e.g. when the reader becomes visible again.
    pub fn restart_reading_clock(&self) {
        self.reading_started_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    /// Records the seconds spent reading since the clock last started.
    pub fn record_reading_time(&self, page: Option<usize>) -> Interaction {
        let started = self.reading_started_ms.load(Ordering::SeqCst);
        let elapsed_ms = chrono::Utc::now().timestamp_millis().saturating_sub(started);
        let secs = u64::try_from((elapsed_ms + 500) / 1000).unwrap_or(0);
        self.publish(InteractionAction::ReadingTime, page, Some(secs))
    }

    fn publish(
        &self,
        action: InteractionAction,
        page: Option<usize>,
        reading_secs: Option<u64>,
    ) -> Interaction {
        let interaction = Interaction {
            action,
            session_id: self.session_id.clone(),
            playback_count: self.playback_count(),
            page,
            reading_secs,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };
        tracing::debug!(action = ?action, page = ?page, "interaction");
        self.bus.publish(NarrationEvent::Interaction(interaction.clone()));
        interaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_playback_count_persists_across_sessions() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let first = InteractionTracker::new(store.clone(), EventBus::default());
        first.increment_playback();
        first.increment_playback();

        let second = InteractionTracker::new(store, EventBus::default());
        assert_eq!(second.playback_count(), 2);
        assert_ne!(first.session_id(), second.session_id());
        assert!(second.session_id().starts_with("tts_"));
    }

    #[test]
    fn test_record_publishes() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let tracker = InteractionTracker::new(Arc::new(MemoryStore::new()), bus);

        tracker.record(InteractionAction::PageChange, Some(4));

        match rx.try_recv().unwrap() {
            NarrationEvent::Interaction(i) => {
                assert_eq!(i.action, InteractionAction::PageChange);
                assert_eq!(i.page, Some(4));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_reading_time() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let tracker = InteractionTracker::new(Arc::new(MemoryStore::new()), bus);

        tracker.restart_reading_clock();
        let interaction = tracker.record_reading_time(Some(2));
        assert_eq!(interaction.action, InteractionAction::ReadingTime);
        assert_eq!(interaction.reading_secs, Some(0));

        let json = serde_json::to_value(&interaction).unwrap();
        assert_eq!(json["action"], "reading_time");
        assert_eq!(json["reading_secs"], 0);
        assert!(matches!(rx.try_recv(), Ok(NarrationEvent::Interaction(_))));

        let plain = serde_json::to_value(tracker.record(InteractionAction::PauseReading, Some(2))).unwrap();
        assert!(plain.get("reading_secs").is_none());
    }

    #[test]
    fn test_action_names() {
        let json = serde_json::to_string(&InteractionAction::PlaybackComplete).unwrap();
        assert_eq!(json, "\"playback_complete\"");
    }
}
