//! Error types for xvatts.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TtsError {
    // Voice resolution errors (fatal to a session)
    #[error("Voice not found: {voice}")]
    VoiceNotFound { voice: String },

    #[error("Failed to load voice model '{voice}': {message}")]
    ModelLoad { voice: String, message: String },

    #[error("Compute device unavailable: {device}")]
    DeviceUnavailable { device: String },

    // Per-utterance synthesis errors
    #[error("Synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("Device fault during synthesis: {message}")]
    Device { message: String },

    // Input errors
    #[error("Could not segment input text: {message}")]
    Segmentation { message: String },

    // Synthesis server transport errors
    #[error("Synthesis server request failed: {message}")]
    Backend { message: String },

    // Playback errors
    #[error("Audio player not found: {player}")]
    PlayerNotFound { player: String },

    #[error("Playback failed: {message}")]
    Playback { message: String },

    #[error("Audio format error: {message}")]
    AudioFormat { message: String },

    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // IPC errors
    #[error("IPC socket error: {message}")]
    IpcSocket { message: String },

    #[error("IPC protocol error: {message}")]
    IpcProtocol { message: String },

    #[error("IPC connection failed: {message}")]
    IpcConnection { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl TtsError {
    /// Whether this error ends the whole session rather than a single utterance.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(
            self,
            TtsError::Synthesis { .. } | TtsError::Playback { .. } | TtsError::AudioFormat { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, TtsError>;
