use crate::error::PlaybackError;
use crate::media::{ClipId, MediaEvent, MediaEventKind, MediaEventSender, MediaSink};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

// How often the audio thread checks whether the active clip drained.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

enum Command {
    Load(ClipId, Vec<u8>),
    Play(ClipId),
    Pause(ClipId),
    Rewind(ClipId),
    Release(ClipId),
    Shutdown,
}

/// rodio-backed [`MediaSink`].
///
/// The output stream is not `Send`, so it lives on a dedicated thread that
/// receives commands over a channel and reports events back.
pub struct AudioEngine {
    tx: Sender<Command>,
}

impl AudioEngine {
    pub fn new(events: MediaEventSender, volume: f32) -> Result<Self, PlaybackError> {
        let (tx, rx) = channel::<Command>();
        let (ready_tx, ready_rx) = channel::<Result<(), PlaybackError>>();

        thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                // Audio stream must live on this thread
                let (_stream, stream_handle) = match OutputStream::try_default() {
                    Ok(pair) => {
                        let _ = ready_tx.send(Ok(()));
                        pair
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(PlaybackError::Output(e.to_string())));
                        return;
                    }
                };

                let mut player = Player::new(stream_handle, events, volume);
                loop {
                    match rx.recv_timeout(POLL_INTERVAL) {
                        Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                        Ok(command) => player.apply(command),
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    player.check_drained();
                }
                tracing::debug!("Audio thread exiting");
            })
            .map_err(|e| PlaybackError::Output(e.to_string()))?;

        ready_rx.recv().map_err(|_| PlaybackError::Disconnected)??;
        tracing::info!("Audio output initialized on default device");
        Ok(Self { tx })
    }

    fn send(&self, command: Command) -> Result<(), PlaybackError> {
        self.tx.send(command).map_err(|_| PlaybackError::Disconnected)
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

impl MediaSink for AudioEngine {
    fn load(&self, clip: ClipId, audio: Vec<u8>) -> Result<(), PlaybackError> {
        // Probe here so decode errors reach the caller synchronously.
        Decoder::new(Cursor::new(audio.clone())).map_err(|e| PlaybackError::Decode(e.to_string()))?;
        self.send(Command::Load(clip, audio))
    }

    fn play(&self, clip: ClipId) -> Result<(), PlaybackError> {
        self.send(Command::Play(clip))
    }

    fn pause(&self, clip: ClipId) {
        let _ = self.send(Command::Pause(clip));
    }

    fn rewind(&self, clip: ClipId) {
        let _ = self.send(Command::Rewind(clip));
    }

    fn release(&self, clip: ClipId) {
        let _ = self.send(Command::Release(clip));
    }
}

/// Starts decoded playback of one clip on an output device.
trait Output {
    type Track: Track;

    fn start(&self, audio: Vec<u8>, volume: f32) -> Result<Self::Track, String>;
}

/// A clip that is playing or paused on the device.
trait Track {
    fn resume(&self);
    fn pause(&self);
    fn stop(&self);
    fn is_paused(&self) -> bool;
    fn is_drained(&self) -> bool;
}

impl Output for OutputStreamHandle {
    type Track = Sink;

    fn start(&self, audio: Vec<u8>, volume: f32) -> Result<Sink, String> {
        let sink = Sink::try_new(self).map_err(|e| format!("Failed to create sink: {}", e))?;
        let source = Decoder::new(Cursor::new(audio)).map_err(|e| format!("Failed to decode: {}", e))?;
        sink.append(source.convert_samples::<f32>());
        sink.set_volume(volume);
        sink.play();
        Ok(sink)
    }
}

impl Track for Sink {
    fn resume(&self) {
        Sink::play(self)
    }

    fn pause(&self) {
        Sink::pause(self)
    }

    fn stop(&self) {
        Sink::stop(self)
    }

    fn is_paused(&self) -> bool {
        Sink::is_paused(self)
    }

    fn is_drained(&self) -> bool {
        Sink::empty(self)
    }
}

struct Player<O: Output> {
    output: O,
    events: MediaEventSender,
    volume: f32,
    clips: HashMap<ClipId, Vec<u8>>,
    active: Option<(ClipId, O::Track)>,
}

impl<O: Output> Player<O> {
    fn new(output: O, events: MediaEventSender, volume: f32) -> Self {
        Self {
            output,
            events,
            volume,
            clips: HashMap::new(),
            active: None,
        }
    }

    fn emit(&self, clip: ClipId, kind: MediaEventKind) {
        let _ = self.events.send(MediaEvent::new(clip, kind));
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Load(clip, audio) => {
                self.clips.insert(clip, audio);
            }
            Command::Play(clip) => self.play(clip),
            Command::Pause(clip) => {
                if let Some((_, track)) = self.active.as_ref().filter(|(id, _)| *id == clip) {
                    track.pause();
                    self.emit(clip, MediaEventKind::Paused);
                }
            }
            Command::Rewind(clip) => self.halt(clip),
            Command::Release(clip) => {
                self.halt(clip);
                self.clips.remove(&clip);
            }
            Command::Shutdown => {}
        }
    }

    fn play(&mut self, clip: ClipId) {
        if let Some((_, track)) = self.active.as_ref().filter(|(id, _)| *id == clip) {
            track.resume();
            self.emit(clip, MediaEventKind::Playing);
            return;
        }

        let Some(audio) = self.clips.get(&clip).cloned() else {
            self.emit(clip, MediaEventKind::Failed(format!("{} was not loaded", clip)));
            return;
        };

        let track = match self.output.start(audio, self.volume) {
            Ok(track) => track,
            Err(message) => {
                self.emit(clip, MediaEventKind::Failed(message));
                return;
            }
        };

        // A previous clip still playing would overlap.
        if let Some((old, old_track)) = self.active.take() {
            old_track.stop();
            tracing::debug!("Stopped {} to start {}", old, clip);
        }
        self.active = Some((clip, track));
        self.emit(clip, MediaEventKind::Playing);
    }

    /// Stops `clip`; the next play starts from the beginning.
    fn halt(&mut self, clip: ClipId) {
        if self.active.as_ref().is_some_and(|(id, _)| *id == clip) {
            if let Some((_, track)) = self.active.take() {
                track.stop();
            }
        }
    }

    fn check_drained(&mut self) {
        let drained = match &self.active {
            Some((_, track)) => !track.is_paused() && track.is_drained(),
            None => false,
        };
        if drained {
            if let Some((clip, _)) = self.active.take() {
                self.emit(clip, MediaEventKind::Ended);
            }
        }
    }
}
