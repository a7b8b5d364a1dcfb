//! Voice Activity Detection (VAD).
//!
//! An energy predicate over a PCM window: the snapshot is high-pass
//! filtered, then the mean energy of the trailing warmup window is compared
//! against the mean energy of the whole snapshot. Speech followed by
//! trailing silence reads as "utterance finished, capture now".

use crate::defaults;

/// Configuration for the VAD predicate.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Energy ratio below which the trailing window counts as silence.
    pub energy_threshold: f32,
    /// Length of the trailing window examined, in milliseconds.
    pub warmup_ms: u32,
    /// High-pass cutoff applied before measuring energy, in Hz.
    pub freq_cutoff_hz: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: defaults::VAD_THRESHOLD,
            warmup_ms: defaults::VAD_WARMUP_MS,
            freq_cutoff_hz: defaults::VAD_FREQ_CUTOFF_HZ,
        }
    }
}

/// Single-pole high-pass filter, in place.
pub fn high_pass_filter(samples: &mut [f32], cutoff_hz: f32, sample_rate: u32) {
    if samples.is_empty() || sample_rate == 0 {
        return;
    }
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
    let dt = 1.0 / sample_rate as f32;
    let alpha = rc / (rc + dt);

    let mut prev_input = samples[0];
    let mut prev_output = samples[0];
    for sample in samples.iter_mut() {
        let input = *sample;
        let output = alpha * (prev_output + input - prev_input);
        prev_input = input;
        prev_output = output;
        *sample = output;
    }
}

/// Returns true when the snapshot contains speech followed by trailing
/// silence: the mean energy over the last `warmup_ms` is at most
/// `energy_threshold` times the mean energy over the whole snapshot.
pub fn voice_detected(samples: &[f32], sample_rate: u32, config: &VadConfig) -> bool {
    let n_samples = samples.len();
    let n_trailing = (sample_rate as u64 * config.warmup_ms as u64 / 1000) as usize;

    if n_trailing >= n_samples {
        return false;
    }

    let mut filtered = samples.to_vec();
    high_pass_filter(&mut filtered, config.freq_cutoff_hz, sample_rate);

    let energy_all: f32 =
        filtered.iter().map(|s| s.abs()).sum::<f32>() / n_samples as f32;
    let energy_trailing: f32 = filtered[n_samples - n_trailing..]
        .iter()
        .map(|s| s.abs())
        .sum::<f32>()
        / n_trailing as f32;

    if energy_all == 0.0 {
        return false;
    }

    energy_trailing <= config.energy_threshold * energy_all
}
