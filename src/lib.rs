//! voxpipe - local voice assistant runtime.
//!
//! Couples speech-to-text, language-model generation and speech synthesis
//! into a streaming, interruptible pipeline of worker threads joined by
//! bounded channels.

pub mod audio;
pub mod backends;
pub mod config;
pub mod defaults;
pub mod error;
pub mod face_control;
pub mod phoneme_ring;
pub mod pipeline;
pub mod server;
