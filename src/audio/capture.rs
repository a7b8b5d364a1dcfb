//! Microphone capture with a rolling sample buffer, using CPAL.
//!
//! The capture callback appends into a bounded rolling buffer; the STT
//! worker snapshots the most recent window for VAD and clears the buffer
//! after each transcription.

use crate::config::AudioSettings;
use crate::defaults;
use crate::error::{Result, VoxError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Trait for microphone devices.
///
/// This trait allows swapping implementations (real capture device vs mock).
pub trait Microphone: Send {
    /// Start capturing into the rolling buffer.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing.
    fn stop(&mut self) -> Result<()>;

    /// Snapshot of the most recent `ms` milliseconds of audio as f32
    /// samples in [-1, 1]. Empty if nothing has been captured yet.
    fn snapshot_ms(&self, ms: u32) -> Vec<f32>;

    /// Discard everything captured so far.
    fn clear(&self);

    /// Capture sample rate in Hz.
    fn sample_rate(&self) -> u32;
}

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// Suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers when
/// probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2.
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Preferred device names, tried in order when no device is configured.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Find an input device: explicit name, then preferred list, then default.
fn find_device(requested: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if let Some(name) = requested {
            let devices = host
                .input_devices()
                .map_err(|e| VoxError::AudioCapture {
                    message: format!("failed to enumerate devices: {e}"),
                })?;
            for device in devices {
                if let Ok(dev_name) = device.name()
                    && dev_name == name
                {
                    return Ok(device);
                }
            }
            return Err(VoxError::AudioDeviceNotFound {
                device: name.to_string(),
            });
        }

        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name()
                    && is_preferred_device(&name)
                {
                    return Ok(device);
                }
            }
        }

        host.default_input_device()
            .ok_or_else(|| VoxError::AudioDeviceNotFound {
                device: "default".to_string(),
            })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched from the owning worker thread; CPAL
/// streams are not Sync but the Mutex-free single-owner usage here never
/// shares one across threads.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Rolling capture buffer shared with the stream callback.
struct RollingBuffer {
    samples: VecDeque<f32>,
    max_samples: usize,
}

impl RollingBuffer {
    fn push(&mut self, data: &[f32]) {
        for &sample in data {
            if self.samples.len() == self.max_samples {
                self.samples.pop_front();
            }
            self.samples.push_back(sample);
        }
    }
}

/// Real microphone capture via CPAL.
///
/// Captures mono f32 at the configured rate, falling back to the device's
/// native config with channel averaging and linear resampling for devices
/// that reject the preferred format.
pub struct CpalMicrophone {
    device_name: Option<String>,
    sample_rate: u32,
    buffer: Arc<Mutex<RollingBuffer>>,
    stream: Option<SendableStream>,
}

impl CpalMicrophone {
    /// Creates an unstarted microphone. Device discovery happens in
    /// `start`, so construction never fails.
    pub fn new(settings: &AudioSettings) -> Self {
        let max_samples =
            (settings.sample_rate as u64 * settings.buffer_ms as u64 / 1000) as usize;
        Self {
            device_name: settings.device.clone(),
            sample_rate: settings.sample_rate,
            buffer: Arc::new(Mutex::new(RollingBuffer {
                samples: VecDeque::with_capacity(max_samples),
                max_samples,
            })),
            stream: None,
        }
    }

    fn build_stream(&self, device: &cpal::Device) -> Result<cpal::Stream> {
        let err_callback = |err| {
            log::error!("audio input stream error: {err}");
        };

        let preferred = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // Preferred path: mono f32 at the configured rate. PipeWire and
        // PulseAudio convert transparently.
        let buffer = Arc::clone(&self.buffer);
        if let Ok(stream) = device.build_input_stream(
            &preferred,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mut buf = buffer.lock().unwrap_or_else(|e| e.into_inner());
                buf.push(data);
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        // Fallback: device default config with software conversion.
        let default_config = device
            .default_input_config()
            .map_err(|e| VoxError::AudioCapture {
                message: format!("no default input config: {e}"),
            })?;
        let native_rate = default_config.sample_rate().0;
        let channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;

        let buffer = Arc::clone(&self.buffer);
        device
            .build_input_stream(
                &default_config.into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = mix_to_mono(data, channels);
                    let resampled = resample_linear(&mono, native_rate, target_rate);
                    let mut buf = buffer.lock().unwrap_or_else(|e| e.into_inner());
                    buf.push(&resampled);
                },
                err_callback,
                None,
            )
            .map_err(|e| VoxError::AudioCapture {
                message: format!("failed to build input stream: {e}"),
            })
    }
}

impl Microphone for CpalMicrophone {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let device = find_device(self.device_name.as_deref())?;
        if let Ok(name) = device.name() {
            log::info!("using input device: {name}");
        }
        let stream = self.build_stream(&device)?;
        stream.play().map_err(|e| VoxError::AudioCapture {
            message: format!("failed to start input stream: {e}"),
        })?;
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.0.pause();
        }
        Ok(())
    }

    fn snapshot_ms(&self, ms: u32) -> Vec<f32> {
        let wanted = (self.sample_rate as u64 * ms as u64 / 1000) as usize;
        let buf = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        let available = buf.samples.len();
        let skip = available.saturating_sub(wanted);
        buf.samples.iter().skip(skip).copied().collect()
    }

    fn clear(&self) {
        let mut buf = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buf.samples.clear();
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn mix_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = ((samples.len() as f64 / ratio).max(1.0)) as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;
        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else {
            samples[samples.len() - 1]
        };
        output.push(sample);
    }
    output
}

/// Shared state handle for inspecting a [`MockMicrophone`] after it has
/// been moved into a worker.
#[derive(Clone, Default)]
pub struct MockMicrophoneHandle {
    state: Arc<Mutex<MockMicState>>,
}

#[derive(Default)]
struct MockMicState {
    samples: Vec<f32>,
    started: bool,
    stopped: bool,
    clear_count: u32,
    fail_start: bool,
}

impl MockMicrophoneHandle {
    /// Replace the audio the mock will snapshot.
    pub fn set_samples(&self, samples: Vec<f32>) {
        self.state.lock().unwrap().samples = samples;
    }

    /// Whether `start` has been called.
    pub fn started(&self) -> bool {
        self.state.lock().unwrap().started
    }

    /// Whether `stop` has been called.
    pub fn stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    /// How many times the rolling buffer was cleared.
    pub fn clear_count(&self) -> u32 {
        self.state.lock().unwrap().clear_count
    }
}

/// Mock microphone for testing.
pub struct MockMicrophone {
    handle: MockMicrophoneHandle,
    sample_rate: u32,
}

impl MockMicrophone {
    /// Creates a mock at the default capture rate with no audio.
    pub fn new() -> Self {
        Self {
            handle: MockMicrophoneHandle::default(),
            sample_rate: defaults::SAMPLE_RATE,
        }
    }

    /// Configure the mock to serve specific samples.
    pub fn with_samples(self, samples: Vec<f32>) -> Self {
        self.handle.set_samples(samples);
        self
    }

    /// Configure the mock to fail on start.
    pub fn with_start_failure(self) -> Self {
        self.handle.state.lock().unwrap().fail_start = true;
        self
    }

    /// Shared handle for inspection after the mock is moved into a worker.
    pub fn handle(&self) -> MockMicrophoneHandle {
        self.handle.clone()
    }
}

impl Microphone for MockMicrophone {
    fn start(&mut self) -> Result<()> {
        let mut state = self.handle.state.lock().unwrap();
        if state.fail_start {
            return Err(VoxError::AudioCapture {
                message: "mock start failure".to_string(),
            });
        }
        state.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.handle.state.lock().unwrap().stopped = true;
        Ok(())
    }

    fn snapshot_ms(&self, ms: u32) -> Vec<f32> {
        let state = self.handle.state.lock().unwrap();
        let wanted = (self.sample_rate as u64 * ms as u64 / 1000) as usize;
        let skip = state.samples.len().saturating_sub(wanted);
        state.samples[skip..].to_vec()
    }

    fn clear(&self) {
        let mut state = self.handle.state.lock().unwrap();
        state.samples.clear();
        state.clear_count += 1;
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_buffer_bounded() {
        let mut buf = RollingBuffer {
            samples: VecDeque::new(),
            max_samples: 4,
        };
        buf.push(&[1.0, 2.0, 3.0]);
        assert_eq!(buf.samples.len(), 3);
        buf.push(&[4.0, 5.0, 6.0]);
        assert_eq!(buf.samples.len(), 4);
        let contents: Vec<f32> = buf.samples.iter().copied().collect();
        assert_eq!(contents, vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_mix_to_mono_stereo() {
        let stereo = [1.0, 3.0, 5.0, 7.0];
        assert_eq!(mix_to_mono(&stereo, 2), vec![2.0, 6.0]);
    }

    #[test]
    fn test_mix_to_mono_passthrough() {
        let mono = [1.0, 2.0];
        assert_eq!(mix_to_mono(&mono, 1), vec![1.0, 2.0]);
    }

    #[test]
    fn test_resample_passthrough() {
        let samples = [0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&samples, 16000, 16000), samples.to_vec());
    }

    #[test]
    fn test_resample_halves_length() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let out = resample_linear(&samples, 32000, 16000);
        assert_eq!(out.len(), 50);
        // Linear interpolation preserves the ramp.
        assert!((out[10] - 20.0).abs() < 1.0);
    }

    #[test]
    fn test_mock_snapshot_returns_tail() {
        let mic = MockMicrophone::new().with_samples((0..32000).map(|i| i as f32).collect());
        // 1000ms at 16kHz = the last 16000 samples.
        let snap = mic.snapshot_ms(1000);
        assert_eq!(snap.len(), 16000);
        assert_eq!(snap[0], 16000.0);
    }

    #[test]
    fn test_mock_start_failure() {
        let mut mic = MockMicrophone::new().with_start_failure();
        assert!(mic.start().is_err());
    }

    #[test]
    fn test_mock_clear_counts() {
        let mic = MockMicrophone::new().with_samples(vec![1.0; 100]);
        let handle = mic.handle();
        mic.clear();
        assert_eq!(handle.clear_count(), 1);
        assert!(mic.snapshot_ms(1000).is_empty());
    }
}
