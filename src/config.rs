//! JSON configuration for models and pipeline settings.
//!
//! The on-disk format is a `models.json` with two sections: `models`
//! (which backend to use per stage and where its weights live) and
//! `settings` (audio, pipeline and TTS tuning). Every field is optional;
//! missing fields fall back to the defaults in [`crate::defaults`].

use crate::defaults;
use crate::error::{Result, VoxError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub models: ModelsConfig,
    pub settings: Settings,
}

/// Backend selection per pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ModelsConfig {
    pub stt: ModelEntry,
    pub llm: ModelEntry,
    pub tts: ModelEntry,
}

/// A single backend selection: implementation kind plus model location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelEntry {
    /// Backend implementation name ("dev" is the built-in no-inference backend).
    pub kind: String,
    /// Path to the model weights, if the backend needs one.
    pub path: Option<PathBuf>,
}

/// Tuning settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Settings {
    pub audio: AudioSettings,
    pub pipeline: PipelineSettings,
    pub tts: TtsSettings,
}

/// Audio capture and VAD settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioSettings {
    /// Capture device name; `None` picks the best available input.
    pub device: Option<String>,
    pub sample_rate: u32,
    /// Rolling capture buffer length in milliseconds.
    pub buffer_ms: u32,
    pub vad_threshold: f32,
    /// Audio handed to the STT backend per detected utterance, in ms.
    pub vad_capture_ms: u32,
}

/// Queue and timeout settings for the pipeline supervisor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub text_queue_size: usize,
    pub response_queue_size: usize,
    /// Timeout for `process_text_input` to receive a response, in ms.
    pub response_timeout_ms: u64,
    /// Open a sideband text in/out queue pair for headless clients.
    pub enable_alt_text: bool,
}

/// Synthesis-side settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsSettings {
    /// Unix socket path for the face-control listener.
    pub face_socket: PathBuf,
    /// Shared-memory segment name for the phoneme-timing ring.
    pub phoneme_shm: String,
}

impl Default for ModelEntry {
    fn default() -> Self {
        Self {
            kind: "dev".to_string(),
            path: None,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            buffer_ms: defaults::MIC_BUFFER_MS,
            vad_threshold: defaults::VAD_THRESHOLD,
            vad_capture_ms: defaults::VAD_CAPTURE_MS,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            text_queue_size: defaults::TEXT_QUEUE_CAPACITY,
            response_queue_size: defaults::RESPONSE_QUEUE_CAPACITY,
            response_timeout_ms: defaults::RESPONSE_TIMEOUT_MS,
            enable_alt_text: false,
        }
    }
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            face_socket: PathBuf::from(defaults::FACE_CONTROL_SOCKET),
            phoneme_shm: defaults::PHONEME_SHM_NAME.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// Returns an error if the file is missing or contains invalid JSON.
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VoxError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                VoxError::Io(e)
            }
        })?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file, or return defaults if it is missing
    ///
    /// Only a missing file falls back to defaults; invalid JSON is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(VoxError::ConfigFileNotFound { path }) => {
                log::info!("no config at {path}, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXPIPE_AUDIO_DEVICE -> settings.audio.device
    /// - VOXPIPE_VAD_THRESHOLD -> settings.audio.vad_threshold
    /// - VOXPIPE_LLM_MODEL -> models.llm.path
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("VOXPIPE_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.settings.audio.device = Some(device);
        }

        if let Ok(threshold) = std::env::var("VOXPIPE_VAD_THRESHOLD")
            && let Ok(value) = threshold.parse::<f32>()
        {
            self.settings.audio.vad_threshold = value;
        }

        if let Ok(model) = std::env::var("VOXPIPE_LLM_MODEL")
            && !model.is_empty()
        {
            self.models.llm.path = Some(PathBuf::from(model));
        }

        self
    }
}
