use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Synthesizing,
    Speaking,
    Paused,
}

impl PlaybackState {
    /// Whether the controller may move from `self` to `next`.
    pub fn can_transition_to(self, next: PlaybackState) -> bool {
        use PlaybackState::*;
        matches!(
            (self, next),
            (Idle, Synthesizing)
                | (Synthesizing, Speaking)
                | (Synthesizing, Idle)
                | (Speaking, Paused)
                | (Paused, Speaking)
                | (Speaking, Idle)
                | (Paused, Idle)
                // chunked narration: next chunk after natural end
                | (Speaking, Synthesizing)
        )
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Synthesizing => "synthesizing",
            PlaybackState::Speaking => "speaking",
            PlaybackState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Which playback controls the UI should enable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ButtonAvailability {
    pub play_enabled: bool,
    pub pause_enabled: bool,
    pub stop_enabled: bool,
    /// Explanation shown when narration is unavailable.
    pub label: Option<String>,
}

impl ButtonAvailability {
    pub fn for_state(state: PlaybackState) -> Self {
        Self {
            play_enabled: matches!(state, PlaybackState::Idle | PlaybackState::Paused),
            pause_enabled: state == PlaybackState::Speaking,
            stop_enabled: matches!(state, PlaybackState::Speaking | PlaybackState::Paused),
            label: None,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            play_enabled: false,
            pause_enabled: false,
            stop_enabled: false,
            label: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buttons_follow_state() {
        let idle = ButtonAvailability::for_state(PlaybackState::Idle);
        assert!(idle.play_enabled && !idle.pause_enabled && !idle.stop_enabled);

        let synth = ButtonAvailability::for_state(PlaybackState::Synthesizing);
        assert!(!synth.play_enabled && !synth.pause_enabled && !synth.stop_enabled);

        let speaking = ButtonAvailability::for_state(PlaybackState::Speaking);
        assert!(!speaking.play_enabled && speaking.pause_enabled && speaking.stop_enabled);

        let paused = ButtonAvailability::for_state(PlaybackState::Paused);
        assert!(paused.play_enabled && !paused.pause_enabled && paused.stop_enabled);
    }

    #[test]
    fn test_no_shortcuts() {
        assert!(!PlaybackState::Idle.can_transition_to(PlaybackState::Speaking));
        assert!(!PlaybackState::Idle.can_transition_to(PlaybackState::Paused));
        assert!(!PlaybackState::Paused.can_transition_to(PlaybackState::Synthesizing));
        assert!(!PlaybackState::Synthesizing.can_transition_to(PlaybackState::Paused));
    }
}
