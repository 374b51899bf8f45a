//! Audio narration controller.
//!
//! Owns the playback state machine for one reader session. Every operation
//! runs its synchronous prefix under the state lock before its first await,
//! so a second `play()` issued while the first is still synthesizing sees
//! `Synthesizing` and does nothing.

use crate::backends::SpeechBackend;
use crate::credentials::CredentialProvider;
use crate::error::{NarrationError, PlaybackError};
use crate::events::{EventBus, NarrationEvent, Notice};
use crate::media::{ClipId, MediaEvent, MediaEventKind, MediaEventReceiver, MediaSink};
use crate::state::{ButtonAvailability, PlaybackState};
use crate::text_prep;
use crate::tracking::{InteractionAction, InteractionTracker};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Credential refreshes allowed after the backend rejects a credential.
const MAX_AUTH_RETRIES: usize = 1;

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Narrate long pages one sentence group at a time.
    pub chunked: bool,
    pub max_chunk_bytes: usize,
    pub notice_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            chunked: false,
            max_chunk_bytes: 4500,
            notice_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackStats {
    pub playback_count: u64,
    pub session_id: String,
    pub state: PlaybackState,
    pub enabled: bool,
}

#[derive(Debug)]
struct ChunkPlan {
    chunks: Vec<String>,
    index: usize,
}

impl ChunkPlan {
    fn current(&self) -> Option<&str> {
        self.chunks.get(self.index).map(String::as_str)
    }

    /// Moves to the next chunk; false when the last one was narrated.
    fn advance(&mut self) -> bool {
        if self.index + 1 < self.chunks.len() {
            self.index += 1;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct Playback {
    state: PlaybackState,
    clip: Option<ClipId>,
    next_clip: u64,
    pending_stop: bool,
    pending_pause: bool,
    plan: Option<ChunkPlan>,
}

struct Engine {
    credentials: Arc<dyn CredentialProvider>,
    backend: Arc<dyn SpeechBackend>,
    sink: Arc<dyn MediaSink>,
}

struct Inner {
    playback: Mutex<Playback>,
    engine: Option<Engine>,
    disabled_reason: Option<String>,
    tracker: Arc<InteractionTracker>,
    bus: EventBus,
    options: ControllerOptions,
}

#[derive(Clone)]
pub struct NarrationController {
    inner: Arc<Inner>,
}

impl NarrationController {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        backend: Arc<dyn SpeechBackend>,
        sink: Arc<dyn MediaSink>,
        tracker: Arc<InteractionTracker>,
        bus: EventBus,
        options: ControllerOptions,
    ) -> Self {
        tracing::info!("Narration enabled via {}", backend.id());
        Self::build(
            Some(Engine {
                credentials,
                backend,
                sink,
            }),
            None,
            tracker,
            bus,
            options,
        )
    }

    /// A controller whose controls stay disabled, labelled with `reason`.
    pub fn disabled(reason: impl Into<String>, tracker: Arc<InteractionTracker>, bus: EventBus) -> Self {
        let reason = reason.into();
        tracing::warn!("Narration disabled: {}", reason);
        Self::build(None, Some(reason), tracker, bus, ControllerOptions::default())
    }

    fn build(
        engine: Option<Engine>,
        disabled_reason: Option<String>,
        tracker: Arc<InteractionTracker>,
        bus: EventBus,
        options: ControllerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                playback: Mutex::new(Playback {
                    state: PlaybackState::Idle,
                    clip: None,
                    next_clip: 1,
                    pending_stop: false,
                    pending_pause: false,
                    plan: None,
                }),
                engine,
                disabled_reason,
                tracker,
                bus,
                options,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Playback> {
        self.inner
            .playback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn engine(&self) -> Result<&Engine, NarrationError> {
        match (&self.inner.engine, &self.inner.disabled_reason) {
            (Some(engine), _) => Ok(engine),
            (None, Some(reason)) => Err(NarrationError::Disabled(reason.clone())),
            (None, None) => Err(NarrationError::Disabled("Narration unavailable".to_string())),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.lock().state
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.engine.is_some()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<NarrationEvent> {
        self.inner.bus.subscribe()
    }

    pub fn button_availability(&self) -> ButtonAvailability {
        if let Some(reason) = &self.inner.disabled_reason {
            return ButtonAvailability::unavailable(reason.clone());
        }
        ButtonAvailability::for_state(self.state())
    }

    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            playback_count: self.inner.tracker.playback_count(),
            session_id: self.inner.tracker.session_id().to_string(),
            state: self.state(),
            enabled: self.is_enabled(),
        }
    }

    fn transition(&self, playback: &mut Playback, next: PlaybackState) {
        if playback.state == next {
            return;
        }
        debug_assert!(
            playback.state.can_transition_to(next),
            "illegal transition {} -> {}",
            playback.state,
            next
        );
        tracing::debug!("Narration {} -> {}", playback.state, next);
        playback.state = next;
        self.inner.bus.publish(NarrationEvent::StateChanged(next));
    }

    fn track(&self, action: InteractionAction) {
        self.inner.tracker.record(action, None);
    }

    /// Logs and publishes a failure once, handing it back to the caller.
    fn surface(&self, error: NarrationError) -> NarrationError {
        tracing::warn!(kind = error.kind(), "Narration failed: {}", error);
        self.inner.bus.publish(NarrationEvent::Notice(Notice {
            kind: error.kind(),
            message: error.to_string(),
            dismiss_after: self.inner.options.notice_timeout,
        }));
        error
    }

    /// Releases the live clip and forgets any chunk plan.
    fn halt(&self, playback: &mut Playback) {
        if let Some(clip) = playback.clip.take() {
            if let Some(engine) = &self.inner.engine {
                engine.sink.rewind(clip);
                engine.sink.release(clip);
            }
        }
        playback.plan = None;
        playback.pending_pause = false;
    }

    /// Narrates `text`, or resumes the paused clip.
    ///
    /// Returns once playback has started (or failed); completion is reported
    /// through media events.
    pub async fn play(&self, text: &str) -> Result<(), NarrationError> {
        if self.begin_play(text)? {
            self.finish_play().await?;
        }
        Ok(())
    }

    /// Synchronous half of [`play`](Self::play).
    ///
    /// Resumes a paused clip, or enters `Synthesizing` for `text` and returns
    /// true; the caller must then drive [`finish_play`](Self::finish_play).
    /// Once this returns, a page change or stop is guaranteed to cancel the
    /// pending narration.
    pub fn begin_play(&self, text: &str) -> Result<bool, NarrationError> {
        let engine = self.engine()?;
        if text.trim().is_empty() {
            tracing::debug!("Ignoring play request with empty text");
            return Ok(false);
        }

        let mut playback = self.lock();
        match (playback.state, playback.clip) {
            (PlaybackState::Speaking, _) | (PlaybackState::Synthesizing, _) => return Ok(false),
            (PlaybackState::Paused, Some(clip)) => {
                if let Err(e) = engine.sink.play(clip) {
                    self.halt(&mut playback);
                    self.transition(&mut playback, PlaybackState::Idle);
                    self.track(InteractionAction::PlaybackError);
                    return Err(self.surface(e.into()));
                }
                self.transition(&mut playback, PlaybackState::Speaking);
                self.track(InteractionAction::PlaybackResume);
                return Ok(false);
            }
            (PlaybackState::Paused, None) => {
                tracing::warn!("Paused without a clip, starting over");
                self.transition(&mut playback, PlaybackState::Idle);
            }
            (PlaybackState::Idle, _) => {}
        }

        let chunks = if self.inner.options.chunked {
            text_prep::chunk(text, self.inner.options.max_chunk_bytes)
        } else {
            vec![text_prep::normalize(text)]
        };
        if chunks.is_empty() {
            return Ok(false);
        }
        playback.plan = Some(ChunkPlan { chunks, index: 0 });
        playback.pending_stop = false;
        playback.pending_pause = false;
        self.transition(&mut playback, PlaybackState::Synthesizing);
        Ok(true)
    }

    /// Asynchronous half of [`play`](Self::play): synthesizes and starts the
    /// narration that [`begin_play`](Self::begin_play) set up.
    pub async fn finish_play(&self) -> Result<(), NarrationError> {
        let engine = self.engine()?;
        self.synthesize_current(engine).await
    }

    /// Applies a stop that arrived while synthesizing.
    fn settle_stop(&self, playback: &mut Playback) {
        playback.pending_stop = false;
        playback.pending_pause = false;
        playback.plan = None;
        self.transition(playback, PlaybackState::Idle);
        self.track(InteractionAction::PlaybackStop);
    }

    /// Synthesizes the current chunk and starts playing it.
    async fn synthesize_current(&self, engine: &Engine) -> Result<(), NarrationError> {
        let text = {
            let mut playback = self.lock();
            if playback.state != PlaybackState::Synthesizing {
                return Ok(());
            }
            if playback.pending_stop {
                tracing::debug!("Narration stopped before synthesis");
                self.settle_stop(&mut playback);
                return Ok(());
            }
            match playback.plan.as_ref().and_then(ChunkPlan::current) {
                Some(text) => text.to_string(),
                None => {
                    self.transition(&mut playback, PlaybackState::Idle);
                    return Ok(());
                }
            }
        };

        self.track(InteractionAction::SynthesisStart);
        let result = self.synthesize_with_retry(engine, &text).await;

        let mut playback = self.lock();
        if playback.pending_stop {
            // stop() arrived while the request was in flight
            tracing::debug!("Dropping synthesis result after stop");
            self.settle_stop(&mut playback);
            return Ok(());
        }

        let audio = match result {
            Ok(audio) => audio,
            Err(e) => {
                playback.plan = None;
                playback.pending_pause = false;
                self.transition(&mut playback, PlaybackState::Idle);
                self.track(InteractionAction::SynthesisError);
                return Err(self.surface(e));
            }
        };
        self.track(InteractionAction::SynthesisComplete);

        let clip = ClipId(playback.next_clip);
        playback.next_clip += 1;
        if let Some(previous) = playback.clip.take() {
            engine.sink.release(previous);
        }

        // A pause during a chunk advance keeps the clip loaded but silent.
        let paused = std::mem::take(&mut playback.pending_pause);
        let started = engine.sink.load(clip, audio).and_then(|_| {
            if paused {
                Ok(())
            } else {
                engine.sink.play(clip)
            }
        });
        if let Err(e) = started {
            engine.sink.release(clip);
            playback.plan = None;
            self.transition(&mut playback, PlaybackState::Idle);
            self.track(InteractionAction::PlaybackError);
            return Err(self.surface(e.into()));
        }

        playback.clip = Some(clip);
        self.transition(&mut playback, PlaybackState::Speaking);
        self.inner.tracker.increment_playback();
        if paused {
            self.transition(&mut playback, PlaybackState::Paused);
            self.track(InteractionAction::PlaybackPause);
            tracing::info!("Loaded {} paused", clip);
        } else {
            self.track(InteractionAction::PlaybackStart);
            tracing::info!("Narrating {}", clip);
        }
        Ok(())
    }

    /// Calls the backend, refreshing the credential at most
    /// `MAX_AUTH_RETRIES` times when it is rejected.
    async fn synthesize_with_retry(&self, engine: &Engine, text: &str) -> Result<Vec<u8>, NarrationError> {
        let mut attempt = 0;
        loop {
            let credential = engine.credentials.ensure_valid().await?;
            match engine.backend.synthesize(&credential.access_token, text).await {
                Ok(audio) => return Ok(audio),
                Err(e) if e.is_auth() && attempt < MAX_AUTH_RETRIES => {
                    tracing::warn!("Speech service rejected credential, refreshing: {}", e);
                    engine.credentials.invalidate()?;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Pauses the speaking clip. During a chunk advance the pause is held
    /// and applied to the next chunk as soon as it is synthesized.
    pub fn pause(&self) {
        let mut playback = self.lock();
        match playback.state {
            PlaybackState::Speaking => {
                if let (Some(clip), Some(engine)) = (playback.clip, &self.inner.engine) {
                    engine.sink.pause(clip);
                }
                self.transition(&mut playback, PlaybackState::Paused);
                self.track(InteractionAction::PlaybackPause);
            }
            PlaybackState::Synthesizing if playback.plan.as_ref().is_some_and(|p| p.index > 0) => {
                tracing::debug!("Pause requested between chunks");
                playback.pending_pause = true;
            }
            _ => {}
        }
    }

    pub fn stop(&self) {
        let mut playback = self.lock();
        self.stop_locked(&mut playback);
    }

    fn stop_locked(&self, playback: &mut Playback) {
        match playback.state {
            PlaybackState::Idle => {}
            PlaybackState::Synthesizing => {
                tracing::debug!("Stop requested during synthesis");
                playback.pending_stop = true;
            }
            PlaybackState::Speaking | PlaybackState::Paused => {
                self.halt(playback);
                self.transition(playback, PlaybackState::Idle);
                self.track(InteractionAction::PlaybackStop);
            }
        }
    }

    /// Must run before the navigator shows another page. Clips never
    /// outlive the page they were synthesized for.
    pub fn on_page_changed(&self) {
        let mut playback = self.lock();
        self.stop_locked(&mut playback);
        playback.plan = None;
    }

    /// Releases everything at the end of the reader session.
    pub fn cleanup(&self) {
        let mut playback = self.lock();
        self.stop_locked(&mut playback);
        self.halt(&mut playback);
        self.track(InteractionAction::Cleanup);
    }

    /// Observer for the media subsystem's events.
    pub async fn handle_media_event(&self, event: MediaEvent) {
        let Some(engine) = &self.inner.engine else {
            return;
        };

        let next_chunk = {
            let mut playback = self.lock();
            if playback.clip != Some(event.clip) {
                tracing::trace!("Ignoring {:?} for released {}", event.kind, event.clip);
                return;
            }

            match event.kind {
                MediaEventKind::Playing | MediaEventKind::Paused => {
                    tracing::trace!("{} reported {:?}", event.clip, event.kind);
                    return;
                }
                MediaEventKind::Failed(message) => {
                    self.halt(&mut playback);
                    self.transition(&mut playback, PlaybackState::Idle);
                    self.track(InteractionAction::PlaybackError);
                    self.surface(PlaybackError::Output(message).into());
                    return;
                }
                MediaEventKind::Ended => {
                    engine.sink.release(event.clip);
                    playback.clip = None;

                    let more = playback.plan.as_mut().is_some_and(ChunkPlan::advance);
                    if more && playback.state == PlaybackState::Speaking {
                        self.transition(&mut playback, PlaybackState::Synthesizing);
                        true
                    } else {
                        playback.plan = None;
                        self.transition(&mut playback, PlaybackState::Idle);
                        self.track(InteractionAction::PlaybackComplete);
                        false
                    }
                }
            }
        };

        if next_chunk {
            // Failures were already surfaced.
            let _ = self.synthesize_current(engine).await;
        }
    }

    /// Feeds media events into [`handle_media_event`](Self::handle_media_event)
    /// until the sender side is dropped.
    pub fn spawn_event_pump(&self, mut events: MediaEventReceiver) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                controller.handle_media_event(event).await;
            }
        })
    }
}
