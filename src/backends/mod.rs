//! Inference backend interfaces.
//!
//! The pipeline talks to speech recognition, language models and speech
//! synthesis only through these traits. Model paths are injected at
//! construction; `init` acquires resources and may fail, aborting worker
//! start.

pub mod dev;

use crate::error::Result;
use crate::pipeline::messages::AudioChunk;

/// One phoneme produced during synthesis, for face animation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Phoneme {
    /// Backend-defined phoneme identifier.
    pub id: i64,
    /// Duration of the phoneme in seconds.
    pub duration_secs: f32,
}

/// Speech-to-text backend.
pub trait SttBackend: Send {
    /// Load the model and acquire resources.
    fn init(&mut self) -> Result<()>;

    /// Transcribe a mono f32 PCM buffer. An empty string means nothing was
    /// recognized.
    fn transcribe(&mut self, pcm: &[f32]) -> Result<String>;

    /// Release any resources held by the backend.
    fn shutdown(&mut self) {}
}

/// Language-model backend.
pub trait LlmBackend: Send {
    /// Load the model and acquire resources.
    fn init(&mut self) -> Result<()>;

    /// Generate a complete response.
    fn generate(&mut self, prompt: &str) -> Result<String>;

    /// Generate a response, invoking `on_fragment` once per produced token
    /// fragment. The callback returns false to halt generation early (stop
    /// string matched). Returns the full accumulated response.
    fn generate_stream(
        &mut self,
        prompt: &str,
        on_fragment: &mut dyn FnMut(&str) -> bool,
    ) -> Result<String>;

    /// Stop strings: when the model emits one, the response is complete
    /// and the string is stripped from it.
    fn antiprompts(&self) -> &[String] {
        &[]
    }

    /// Release any resources held by the backend.
    fn shutdown(&mut self) {}
}

/// Text-to-speech backend.
pub trait TtsBackend: Send {
    /// Load the voice and acquire resources.
    fn init(&mut self) -> Result<()>;

    /// Synthesize one chunk of text.
    fn speak(&mut self, text: &str) -> Result<AudioChunk>;

    /// Synthesize with per-phoneme timing for face animation. The default
    /// delegates to `speak` with no timings.
    fn speak_with_timings(&mut self, text: &str) -> Result<(AudioChunk, Vec<Phoneme>)> {
        Ok((self.speak(text)?, Vec::new()))
    }

    /// Release any resources held by the backend.
    fn shutdown(&mut self) {}
}
