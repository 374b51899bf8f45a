//! Error taxonomy for narration.
//!
//! Every failure is converted into one of these kinds at the controller
//! boundary. None of them is fatal to the reading session.

/// Failures while obtaining a bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No service identity was configured.
    #[error("No speech service identity configured")]
    MissingIdentity,

    /// The service identity file could not be read or parsed.
    #[error("Invalid service identity: {0}")]
    InvalidIdentity(String),

    /// The signed assertion could not be produced.
    #[error("Failed to sign token assertion: {0}")]
    Signing(String),

    /// The token endpoint could not be reached.
    #[error("Token exchange failed: {0}")]
    Network(String),

    /// The token endpoint answered with a non-success status.
    #[error("Token exchange rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The token endpoint answered with an unusable body.
    #[error("Malformed token response: {0}")]
    MalformedResponse(String),

    /// The credential cache could not be read or written.
    #[error("Credential storage error: {0}")]
    Storage(String),
}

/// Failures of the synthesis call itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    /// The backend rejected the bearer credential (HTTP 401/403).
    #[error("Speech service rejected credentials (HTTP {status})")]
    Auth { status: u16 },

    /// Any other non-success status.
    #[error("Speech service error (HTTP {status}): {message}")]
    Backend { status: u16, message: String },

    /// The request never got a response.
    #[error("Speech service unreachable: {0}")]
    Network(String),

    /// Success status but no usable audio in the body.
    #[error("Malformed speech service response: {0}")]
    MalformedPayload(String),
}

impl SynthesisError {
    pub fn is_auth(&self) -> bool {
        matches!(self, SynthesisError::Auth { .. })
    }
}

/// Failures of the playable-media subsystem.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Audio output error: {0}")]
    Output(String),

    #[error("Audio thread is not running")]
    Disconnected,
}

/// Failures of the durable key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("Stored value for '{key}' is not valid: {value}")]
    Corrupt { key: String, value: String },
}

/// Failures surfaced by the narration controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NarrationError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    /// Narration was disabled at startup by a configuration problem.
    #[error("{0}")]
    Disabled(String),
}

impl NarrationError {
    /// Short machine-readable kind, used for notices and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            NarrationError::Auth(_) => "auth",
            NarrationError::Synthesis(SynthesisError::Auth { .. }) => "synthesis_auth",
            NarrationError::Synthesis(_) => "synthesis_backend",
            NarrationError::Playback(_) => "playback",
            NarrationError::Disabled(_) => "disabled",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NavigatorError {
    #[error("Document has no pages")]
    EmptyDocument,

    #[error("Page {page} is outside 1..={count}")]
    OutOfRange { page: usize, count: usize },

    #[error("Failed to read document: {0}")]
    Io(#[from] std::io::Error),
}
