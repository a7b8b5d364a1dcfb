//! Audio capture, playback and voice-activity detection.

pub mod capture;
pub mod playback;
pub mod vad;
