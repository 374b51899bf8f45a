use config::{Config, File};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::sync::RwLock;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    // Service identity used for the signed-assertion exchange.
    // Empty means "not configured" and disables narration.
    pub service_account_path: String,
    pub token_uri: String,
    pub token_scope: String,
    // Synthesis backend
    pub tts_endpoint: String,
    pub language_code: String,
    pub voice_name: String,
    pub audio_encoding: String, // "MP3", "LINEAR16" or "OGG_OPUS"
    pub request_timeout_secs: u64,
    // Durable state (cached credential, reading position, counters)
    pub storage_path: String,
    // Playback
    pub enable_audio: bool,
    pub playback_volume: f32, // 0.0 - 1.0
    pub chunked_narration: bool,
    pub max_chunk_bytes: usize,
    // UI
    pub notice_timeout_secs: u64,
}

fn default_storage_path() -> String {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("pdf-narrator")
        .join("state")
        .to_string_lossy()
        .into_owned()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_account_path: String::new(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            token_scope: "https://www.googleapis.com/auth/cloud-platform".to_string(),
            tts_endpoint: "https://texttospeech.googleapis.com/v1/text:synthesize".to_string(),
            language_code: "en-US".to_string(),
            voice_name: "en-US-Neural2-F".to_string(),
            audio_encoding: "MP3".to_string(),
            request_timeout_secs: 30,
            storage_path: default_storage_path(),
            enable_audio: true,
            playback_volume: 1.0,
            chunked_narration: false,
            max_chunk_bytes: 4500,
            notice_timeout_secs: 5,
        }
    }
}

lazy_static! {
    pub static ref SETTINGS: RwLock<Settings> = RwLock::new(Settings::new().unwrap_or_else(|e| {
        tracing::error!("Failed to load settings, using defaults: {}", e);
        Settings::default()
    }));
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let defaults = Settings::default();
        let builder = Config::builder()
            // Identity
            .set_default("service_account_path", defaults.service_account_path)?
            .set_default("token_uri", defaults.token_uri)?
            .set_default("token_scope", defaults.token_scope)?
            // Synthesis
            .set_default("tts_endpoint", defaults.tts_endpoint)?
            .set_default("language_code", defaults.language_code)?
            .set_default("voice_name", defaults.voice_name)?
            .set_default("audio_encoding", defaults.audio_encoding)?
            .set_default("request_timeout_secs", defaults.request_timeout_secs)?
            // Storage
            .set_default("storage_path", defaults.storage_path)?
            // Playback
            .set_default("enable_audio", defaults.enable_audio)?
            .set_default("playback_volume", defaults.playback_volume as f64)?
            .set_default("chunked_narration", defaults.chunked_narration)?
            .set_default("max_chunk_bytes", defaults.max_chunk_bytes as u64)?
            .set_default("notice_timeout_secs", defaults.notice_timeout_secs)?
            // Merge with local config file (if exists)
            .add_source(File::with_name("Narrator").required(false))
            .add_source(
                File::with_name(&format!(
                    "{}/.config/pdf-narrator/Narrator",
                    std::env::var("HOME").unwrap_or_default()
                ))
                .required(false),
            )
            // Merge with environment variables (e.g. NARRATOR_VOICE_NAME)
            .add_source(config::Environment::with_prefix("NARRATOR"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.playback_volume < 0.0 || self.playback_volume > 1.0 {
            return Err(config::ConfigError::Message(format!(
                "Invalid playback_volume: {}. Must be between 0.0 and 1.0",
                self.playback_volume
            )));
        }
        if self.max_chunk_bytes == 0 {
            return Err(config::ConfigError::Message(
                "max_chunk_bytes must be greater than 0".to_string(),
            ));
        }
        if !matches!(
            self.audio_encoding.as_str(),
            "MP3" | "LINEAR16" | "OGG_OPUS"
        ) {
            return Err(config::ConfigError::Message(format!(
                "Unsupported audio_encoding: {}",
                self.audio_encoding
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the reason narration cannot run with these settings, if any.
    pub fn narration_unavailable_reason(&self) -> Option<String> {
        if !self.enable_audio {
            return Some("Narration is turned off".to_string());
        }
        if self.service_account_path.trim().is_empty() {
            return Some("Narration unavailable: no speech service account configured".to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_load() {
        let settings = Settings::new().expect("Failed to load settings");
        assert!(settings.max_chunk_bytes > 0);
        assert!(settings.request_timeout_secs > 0);
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("NARRATOR_VOICE_NAME", "en-GB-Neural2-A");
        let settings = Settings::new();
        std::env::remove_var("NARRATOR_VOICE_NAME");
        assert_eq!(settings.unwrap().voice_name, "en-GB-Neural2-A");
    }

    #[test]
    fn test_validate_rejects_bad_volume() {
        let settings = Settings {
            playback_volume: 1.5,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_encoding() {
        let settings = Settings {
            audio_encoding: "FLAC".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_service_account_disables_narration() {
        let settings = Settings::default();
        assert!(settings.narration_unavailable_reason().is_some());

        let configured = Settings {
            service_account_path: "/etc/narrator/sa.json".to_string(),
            ..Settings::default()
        };
        assert!(configured.narration_unavailable_reason().is_none());
    }
}
