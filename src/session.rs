//! Wiring of one reader session from [`Settings`].
//!
//! Anything that prevents narration (missing service account, unreadable
//! identity, no audio device) yields a session whose controller is disabled
//! with a user-visible reason. The reader itself always opens.

use crate::backends::google::GoogleSpeechBackend;
use crate::backends::Voice;
use crate::config_loader::Settings;
use crate::controller::{ControllerOptions, NarrationController};
use crate::credentials::{CredentialManager, ServiceIdentity};
use crate::engine::AudioEngine;
use crate::error::{NarrationError, NavigatorError};
use crate::events::EventBus;
use crate::media::{media_event_channel, MediaEventReceiver, MediaSink};
use crate::navigator::{PageNavigator, PageSource};
use crate::storage::{KeyValueStore, MemoryStore, SledStore};
use crate::tracking::InteractionTracker;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct ReaderSession {
    store: Arc<dyn KeyValueStore>,
    bus: EventBus,
    tracker: Arc<InteractionTracker>,
    controller: NarrationController,
    pump: Option<JoinHandle<()>>,
}

impl ReaderSession {
    /// Opens the durable store and the default audio device.
    pub fn open(settings: &Settings) -> Self {
        let store = open_store(&settings.storage_path);
        let (tx, rx) = media_event_channel();

        // Leave the audio device alone when narration cannot run anyway.
        let sink = match settings.narration_unavailable_reason() {
            Some(reason) => Err(NarrationError::Disabled(reason)),
            None => AudioEngine::new(tx, settings.playback_volume)
                .map(|engine| Arc::new(engine) as Arc<dyn MediaSink>)
                .map_err(NarrationError::from),
        };
        Self::assemble(settings, store, sink, rx)
    }

    /// Builds a session around an existing store and media sink.
    pub fn with_sink(
        settings: &Settings,
        store: Arc<dyn KeyValueStore>,
        sink: Arc<dyn MediaSink>,
        events: MediaEventReceiver,
    ) -> Self {
        Self::assemble(settings, store, Ok(sink), events)
    }

    fn assemble(
        settings: &Settings,
        store: Arc<dyn KeyValueStore>,
        sink: Result<Arc<dyn MediaSink>, NarrationError>,
        events: MediaEventReceiver,
    ) -> Self {
        let bus = EventBus::default();
        let tracker = Arc::new(InteractionTracker::new(store.clone(), bus.clone()));

        let (controller, pump) =
            match build_controller(settings, store.clone(), sink, tracker.clone(), bus.clone()) {
                Ok(controller) => {
                    let pump = controller.spawn_event_pump(events);
                    (controller, Some(pump))
                }
                Err(e) => {
                    let reason = match e {
                        NarrationError::Disabled(reason) => reason,
                        other => format!("Narration unavailable: {}", other),
                    };
                    (NarrationController::disabled(reason, tracker.clone(), bus.clone()), None)
                }
            };

        Self {
            store,
            bus,
            tracker,
            controller,
            pump,
        }
    }

    pub fn controller(&self) -> &NarrationController {
        &self.controller
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }

    pub fn navigator(
        &self,
        source: Box<dyn PageSource>,
        start: Option<usize>,
    ) -> Result<PageNavigator, NavigatorError> {
        PageNavigator::new(
            source,
            self.controller.clone(),
            self.store.clone(),
            self.tracker.clone(),
            start,
        )
    }
}

impl Drop for ReaderSession {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

fn open_store(path: &str) -> Arc<dyn KeyValueStore> {
    match SledStore::open(Path::new(path)) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!("Could not open state at {}, nothing will persist: {}", path, e);
            Arc::new(MemoryStore::new())
        }
    }
}

fn build_controller(
    settings: &Settings,
    store: Arc<dyn KeyValueStore>,
    sink: Result<Arc<dyn MediaSink>, NarrationError>,
    tracker: Arc<InteractionTracker>,
    bus: EventBus,
) -> Result<NarrationController, NarrationError> {
    if let Some(reason) = settings.narration_unavailable_reason() {
        return Err(NarrationError::Disabled(reason));
    }
    settings
        .validate()
        .map_err(|e| NarrationError::Disabled(format!("Invalid narration settings: {}", e)))?;
    let sink = sink?;

    let identity = ServiceIdentity::from_file(Path::new(&settings.service_account_path))?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.request_timeout_secs))
        .build()
        .map_err(|e| NarrationError::Disabled(format!("HTTP client unavailable: {}", e)))?;

    let credentials = CredentialManager::new(
        Some(identity),
        &settings.token_uri,
        &settings.token_scope,
        store,
        client.clone(),
    );
    let backend = GoogleSpeechBackend::new(
        client,
        &settings.tts_endpoint,
        Voice {
            language_code: settings.language_code.clone(),
            name: settings.voice_name.clone(),
            audio_encoding: settings.audio_encoding.clone(),
        },
    );
    let options = ControllerOptions {
        chunked: settings.chunked_narration,
        max_chunk_bytes: settings.max_chunk_bytes,
        notice_timeout: Duration::from_secs(settings.notice_timeout_secs),
    };

    Ok(NarrationController::new(
        Arc::new(credentials),
        Arc::new(backend),
        sink,
        tracker,
        bus,
        options,
    ))
}
