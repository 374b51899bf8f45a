pub mod google;

use crate::error::SynthesisError;
use async_trait::async_trait;

/// Fixed voice selection sent with every synthesis request
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Voice {
    pub language_code: String,
    pub name: String,
    pub audio_encoding: String,
}

/// Trait that speech synthesis backends implement.
/// The controller only depends on this, so backends can be swapped or faked.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Synthesizes `text` using the bearer `access_token`, returning playable bytes.
    async fn synthesize(&self, access_token: &str, text: &str) -> Result<Vec<u8>, SynthesisError>;

    /// Returns the unique ID of the backend (e.g., "google-cloud-tts")
    fn id(&self) -> &'static str;
}
