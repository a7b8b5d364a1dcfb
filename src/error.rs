//! Error types for voxpipe.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    Playback { message: String },

    #[error("ALSA error: {0}")]
    Alsa(#[from] alsa::Error),

    // Inference backend errors
    #[error("STT backend error: {message}")]
    SttBackend { message: String },

    #[error("LLM backend error: {message}")]
    LlmBackend { message: String },

    #[error("TTS backend error: {message}")]
    TtsBackend { message: String },

    // Pipeline coordination errors
    #[error("Pipeline error: {message}")]
    Pipeline { message: String },

    // Socket errors
    #[error("Socket error: {message}")]
    Socket { message: String },

    // Shared memory errors
    #[error("Shared memory error: {message}")]
    SharedMemory { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxError>;
