//! Speaker playback through ALSA.
//!
//! The playback device is written in period-sized slices so an interrupt
//! issued from another thread (barge-in) takes effect within one period.
//! Underruns are recovered in place; shutdown drains instead of dropping so
//! residual audio plays out.

use crate::defaults;
use crate::error::{Result, VoxError};
use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// How a play call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The whole chunk was written to the device.
    Completed,
    /// An interrupt arrived mid-chunk; the remainder was abandoned.
    Interrupted,
}

/// Trait for playback devices.
///
/// `interrupt` is the one operation callable from outside the playback
/// worker's thread; every implementation must keep it safe against a
/// concurrent in-progress `play`.
pub trait PlaybackSink: Send + Sync {
    /// (Re)open the device for mono S16LE at `sample_rate`.
    fn configure(&self, sample_rate: u32) -> Result<()>;

    /// Write one chunk, blocking until played or interrupted.
    fn play(&self, samples: &[i16]) -> Result<PlayOutcome>;

    /// Stop playback immediately: drop buffered device audio and prepare
    /// for the next write.
    fn interrupt(&self);

    /// Let any buffered audio play out.
    fn drain(&self);

    /// Release the device.
    fn close(&self);
}

/// ALSA playback device.
pub struct AlsaSink {
    device: String,
    pcm: Mutex<Option<PCM>>,
    interrupt_gen: AtomicU64,
}

impl AlsaSink {
    /// Creates an unopened sink for the given ALSA device name.
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            pcm: Mutex::new(None),
            interrupt_gen: AtomicU64::new(0),
        }
    }

    fn open_device(&self, sample_rate: u32) -> Result<PCM> {
        let pcm = PCM::new(&self.device, Direction::Playback, false)?;
        {
            let hwp = HwParams::any(&pcm)?;
            hwp.set_access(Access::RWInterleaved)?;
            hwp.set_format(Format::s16())?;
            hwp.set_channels(1)?;
            hwp.set_rate(sample_rate, ValueOr::Nearest)?;
            hwp.set_period_size_near(defaults::ALSA_PERIOD_FRAMES as i64, ValueOr::Nearest)?;
            hwp.set_buffer_size_near(
                (defaults::ALSA_PERIOD_FRAMES * defaults::ALSA_PERIODS) as i64,
            )?;
            pcm.hw_params(&hwp)?;
        }
        pcm.prepare()?;
        log::info!("ALSA playback open on '{}' at {sample_rate} Hz", self.device);
        Ok(pcm)
    }
}

impl PlaybackSink for AlsaSink {
    fn configure(&self, sample_rate: u32) -> Result<()> {
        let pcm = self.open_device(sample_rate)?;
        let mut guard = self.pcm.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(pcm);
        Ok(())
    }

    fn play(&self, samples: &[i16]) -> Result<PlayOutcome> {
        let generation = self.interrupt_gen.load(Ordering::Acquire);
        let mut offset = 0;
        let mut consecutive_errors = 0u32;

        while offset < samples.len() {
            if self.interrupt_gen.load(Ordering::Acquire) != generation {
                return Ok(PlayOutcome::Interrupted);
            }

            // Lock per slice so interrupt() is never blocked for longer
            // than one period write.
            let guard = self.pcm.lock().unwrap_or_else(|e| e.into_inner());
            let Some(pcm) = guard.as_ref() else {
                return Err(VoxError::Playback {
                    message: "device not configured".to_string(),
                });
            };

            let end = (offset + defaults::ALSA_PERIOD_FRAMES).min(samples.len());
            let io = pcm.io_i16()?;
            match io.writei(&samples[offset..end]) {
                Ok(frames) => {
                    offset += frames;
                    consecutive_errors = 0;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors > 5 {
                        return Err(VoxError::Playback {
                            message: format!("device not recovering: {e}"),
                        });
                    }
                    log::warn!("ALSA write error, recovering: {e}");
                    if pcm.try_recover(e, true).is_err() {
                        pcm.prepare()?;
                    }
                }
            }
        }
        Ok(PlayOutcome::Completed)
    }

    fn interrupt(&self) {
        self.interrupt_gen.fetch_add(1, Ordering::AcqRel);
        let guard = self.pcm.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pcm) = guard.as_ref() {
            let _ = pcm.drop();
            let _ = pcm.prepare();
            log::info!("playback stopped immediately");
        }
    }

    fn drain(&self) {
        let guard = self.pcm.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pcm) = guard.as_ref()
            && let Err(e) = pcm.drain()
        {
            log::warn!("ALSA drain failed: {e}");
        }
    }

    fn close(&self) {
        let mut guard = self.pcm.lock().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }
}

/// Shared state handle for inspecting a [`MockSink`].
#[derive(Clone, Default)]
pub struct MockSinkHandle {
    state: Arc<Mutex<MockSinkState>>,
}

#[derive(Default)]
struct MockSinkState {
    configured_rates: Vec<u32>,
    played: Vec<Vec<i16>>,
    interrupts: u32,
    drained: bool,
    closed: bool,
    play_delay_ms: u64,
    fail_configure: bool,
}

impl MockSinkHandle {
    /// Chunks played so far.
    pub fn played(&self) -> Vec<Vec<i16>> {
        self.state.lock().unwrap().played.clone()
    }

    /// Sample rates passed to `configure`, in order.
    pub fn configured_rates(&self) -> Vec<u32> {
        self.state.lock().unwrap().configured_rates.clone()
    }

    /// Number of immediate interrupts issued.
    pub fn interrupts(&self) -> u32 {
        self.state.lock().unwrap().interrupts
    }

    /// Whether the device was drained.
    pub fn drained(&self) -> bool {
        self.state.lock().unwrap().drained
    }

    /// Whether the device was closed.
    pub fn closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

/// Mock playback sink for testing.
#[derive(Default)]
pub struct MockSink {
    handle: MockSinkHandle,
}

impl MockSink {
    /// Creates a mock sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long per play call, simulating real-time output.
    pub fn with_play_delay_ms(self, ms: u64) -> Self {
        self.handle.state.lock().unwrap().play_delay_ms = ms;
        self
    }

    /// Configure the mock to fail on `configure`.
    pub fn with_configure_failure(self) -> Self {
        self.handle.state.lock().unwrap().fail_configure = true;
        self
    }

    /// Shared handle for inspection.
    pub fn handle(&self) -> MockSinkHandle {
        self.handle.clone()
    }
}

impl PlaybackSink for MockSink {
    fn configure(&self, sample_rate: u32) -> Result<()> {
        let mut state = self.handle.state.lock().unwrap();
        if state.fail_configure {
            return Err(VoxError::Playback {
                message: "mock configure failure".to_string(),
            });
        }
        state.configured_rates.push(sample_rate);
        Ok(())
    }

    fn play(&self, samples: &[i16]) -> Result<PlayOutcome> {
        let delay = {
            let mut state = self.handle.state.lock().unwrap();
            state.played.push(samples.to_vec());
            state.play_delay_ms
        };
        if delay > 0 {
            std::thread::sleep(std::time::Duration::from_millis(delay));
        }
        Ok(PlayOutcome::Completed)
    }

    fn interrupt(&self) {
        self.handle.state.lock().unwrap().interrupts += 1;
    }

    fn drain(&self) {
        self.handle.state.lock().unwrap().drained = true;
    }

    fn close(&self) {
        self.handle.state.lock().unwrap().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_plays() {
        let sink = MockSink::new();
        let handle = sink.handle();

        sink.configure(22050).unwrap();
        sink.play(&[1, 2, 3]).unwrap();
        sink.play(&[4, 5]).unwrap();

        assert_eq!(handle.configured_rates(), vec![22050]);
        assert_eq!(handle.played(), vec![vec![1, 2, 3], vec![4, 5]]);
    }

    #[test]
    fn test_mock_interrupt_and_drain() {
        let sink = MockSink::new();
        let handle = sink.handle();

        sink.interrupt();
        sink.interrupt();
        sink.drain();
        sink.close();

        assert_eq!(handle.interrupts(), 2);
        assert!(handle.drained());
        assert!(handle.closed());
    }

    #[test]
    fn test_mock_configure_failure() {
        let sink = MockSink::new().with_configure_failure();
        assert!(sink.configure(22050).is_err());
    }

    #[test]
    fn test_alsa_sink_play_unconfigured_fails() {
        let sink = AlsaSink::new("default");
        let result = sink.play(&[0i16; 16]);
        assert!(matches!(result, Err(VoxError::Playback { .. })));
    }

    #[test]
    fn test_alsa_sink_interrupt_without_device_is_safe() {
        let sink = AlsaSink::new("default");
        sink.interrupt();
        sink.drain();
        sink.close();
    }
}
