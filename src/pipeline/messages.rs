//! Message types passed between pipeline stages.

use std::time::{Duration, Instant};

/// A UTF-8 text message: an utterance from STT or a response chunk from
/// the LLM.
#[derive(Debug, Clone)]
pub struct TextMessage {
    /// The message text.
    pub text: String,
    /// Timestamp when this message was created.
    pub created_at: Instant,
}

impl TextMessage {
    /// Creates a new text message stamped with the current time.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            created_at: Instant::now(),
        }
    }

    /// Time elapsed since this message was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// A chunk of synthesized audio ready for playback.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono signed 16-bit PCM samples.
    pub samples: Vec<i16>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Creates a new audio chunk.
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of this chunk in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000 / self.sample_rate as u64) as u32
    }
}
