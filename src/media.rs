//! Playable-media contract between the narration controller and an audio
//! output.
//!
//! The controller only issues commands; whatever plays the audio reports
//! back through [`MediaEvent`]s tagged with the clip they concern.

use crate::error::PlaybackError;
use std::fmt;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Handle of one synthesized clip inside the media subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClipId(pub u64);

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEventKind {
    Playing,
    Paused,
    /// Playback reached the end of the clip.
    Ended,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEvent {
    pub clip: ClipId,
    pub kind: MediaEventKind,
}

impl MediaEvent {
    pub fn new(clip: ClipId, kind: MediaEventKind) -> Self {
        Self { clip, kind }
    }
}

pub type MediaEventSender = UnboundedSender<MediaEvent>;
pub type MediaEventReceiver = UnboundedReceiver<MediaEvent>;

pub fn media_event_channel() -> (MediaEventSender, MediaEventReceiver) {
    unbounded_channel()
}

/// Audio output driven by the controller.
///
/// Commands must not block; completion and failures are reported as events.
#[cfg_attr(test, mockall::automock)]
pub trait MediaSink: Send + Sync {
    /// Creates a playable handle for `audio`. Any previous handle stays
    /// valid until released.
    fn load(&self, clip: ClipId, audio: Vec<u8>) -> Result<(), PlaybackError>;

    /// Starts or resumes playback of `clip`.
    fn play(&self, clip: ClipId) -> Result<(), PlaybackError>;

    fn pause(&self, clip: ClipId);

    /// Halts playback and moves the position back to the start.
    fn rewind(&self, clip: ClipId);

    /// Frees the handle. Later events for `clip` are meaningless.
    fn release(&self, clip: ClipId);
}
