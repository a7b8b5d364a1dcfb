//! Default configuration constants for voxpipe.
//!
//! Every tuned number in the pipeline lives here so that the code paths
//! reference one named constant instead of scattering magic values.

/// Default capture sample rate in Hz.
///
/// 16kHz is the standard for speech recognition and provides a good balance
/// between quality and computational efficiency for voice applications.
pub const SAMPLE_RATE: u32 = 16000;

/// Default synthesis sample rate in Hz, used until the first audio chunk
/// declares its own rate.
pub const TTS_SAMPLE_RATE: u32 = 22050;

/// Duration of microphone audio kept in the rolling capture buffer.
pub const MIC_BUFFER_MS: u32 = 30000;

/// Default voice-activity energy threshold.
///
/// The trailing warmup window counts as silence when its mean energy falls
/// below this fraction of the whole snapshot's mean energy.
pub const VAD_THRESHOLD: f32 = 0.6;

/// Length of audio handed to the STT backend once speech is detected.
pub const VAD_CAPTURE_MS: u32 = 10000;

/// Warmup window examined by the VAD predicate.
pub const VAD_WARMUP_MS: u32 = 1250;

/// High-pass cutoff applied before energy measurement, in Hz.
pub const VAD_FREQ_CUTOFF_HZ: f32 = 100.0;

/// Audio inspected per VAD pass (most recent window of the rolling buffer).
pub const VAD_PRE_WINDOW_MS: u32 = 2000;

/// Settling time granted after an utterance before the next VAD pass.
pub const VAD_POST_WINDOW_MS: u32 = 2000;

/// Microphone initialization attempts before giving up.
pub const MIC_INIT_ATTEMPTS: u32 = 8;

/// Backoff between microphone initialization attempts, in milliseconds.
pub const MIC_INIT_BACKOFF_MS: u64 = 500;

/// Capacity of the STT -> LLM text queue.
pub const TEXT_QUEUE_CAPACITY: usize = 20;

/// Capacity of the LLM -> TTS response queue.
pub const RESPONSE_QUEUE_CAPACITY: usize = 20;

/// Capacity of the TTS-internal audio chunk queue.
pub const AUDIO_QUEUE_CAPACITY: usize = 50;

/// Timeout for pushing a text request into the pipeline, in milliseconds.
pub const TEXT_PUSH_TIMEOUT_MS: u64 = 500;

/// Timeout for awaiting a text-mode response, in milliseconds.
pub const RESPONSE_TIMEOUT_MS: u64 = 30000;

/// Completed words that trigger a chunk flush in the LLM output chunker.
pub const WORD_FLUSH_THRESHOLD: u32 = 4;

/// Byte-length safety valve for the chunker: a buffer this long is flushed
/// even mid-word so downstream synthesis latency stays bounded.
pub const MAX_CHUNK_BYTES: usize = 96;

/// Duration of the fade applied to the tail of every synthesized chunk,
/// in milliseconds. Softens the seam between consecutive chunks.
pub const FADE_MS: u32 = 325;

/// Strength of the tail fade. The fade gain is `(1 - t)^e` with
/// `e = 1 + FADE_STRENGTH / 25`.
pub const FADE_STRENGTH: f32 = 120.0;

/// Slot count of the phoneme-timing ring. One slot is always kept open to
/// distinguish full from empty, so 1023 events can be unread at once.
pub const PHONEME_RING_CAPACITY: usize = 1024;

/// POSIX shared-memory segment name for the phoneme-timing ring.
pub const PHONEME_SHM_NAME: &str = "/tts_phoneme_queue";

/// Unix socket path for the face-control listener.
pub const FACE_CONTROL_SOCKET: &str = "/tmp/tts_face_control.sock";

/// Default path of the model/settings configuration file.
pub const CONFIG_PATH: &str = "/usr/share/voxpipe/config/models.json";

/// Default Unix socket path for the text-request server.
pub const SERVER_SOCKET_PATH: &str = "/run/voxpipe.sock";

/// Sleep after a worker processing error, to avoid tight error loops.
pub const ERROR_BACKOFF_MS: u64 = 100;

/// Idle sleep for workers polling an empty input, in milliseconds. Doubles
/// as the interruptible-sleep bound, so control signals are observed at
/// least this often.
pub const IDLE_SLEEP_MS: u64 = 50;

/// Interval at which blocking channel operations re-check the external
/// interrupt flag and shutdown state, in milliseconds.
pub const CHANNEL_POLL_MS: u64 = 100;

/// ALSA period size in frames. Small periods keep interruption latency low.
pub const ALSA_PERIOD_FRAMES: usize = 1024;

/// ALSA buffer size in periods.
pub const ALSA_PERIODS: usize = 4;

/// Interval between statistics log lines when stats logging is enabled.
pub const STATS_INTERVAL_SECS: u64 = 10;
