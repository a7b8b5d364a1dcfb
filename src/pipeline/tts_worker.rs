//! TTS worker: consumes response chunks, synthesizes audio and hands it to
//! the internal playback worker.
//!
//! The worker exclusively owns its audio-chunk queue, the playback worker,
//! the phoneme-timing ring and the face-control listener; none of them are
//! addressable from outside.

use crate::audio::playback::PlaybackSink;
use crate::backends::TtsBackend;
use crate::defaults;
use crate::error::Result;
use crate::face_control::FaceControlListener;
use crate::phoneme_ring::{PhonemeEvent, PhonemeRing, now_timestamp_us};
use crate::pipeline::audio_worker::{AudioInterrupt, PlaybackWorker};
use crate::pipeline::channel::{BoundedChannel, Pop, PushResult};
use crate::pipeline::control::{ControlMessage, ControlSignal};
use crate::pipeline::messages::{AudioChunk, TextMessage};
use crate::pipeline::worker::{
    ErrorReporter, Step, Worker, WorkerContext, WorkerHandle, default_control, spawn_worker,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Construction options for the TTS worker.
#[derive(Debug, Clone)]
pub struct TtsWorkerOptions {
    /// Capacity of the internal audio-chunk queue.
    pub audio_queue_capacity: usize,
    /// Tail fade length in milliseconds.
    pub fade_ms: u32,
    /// Tail fade strength; the gain curve is `(1 - t)^(1 + strength/25)`.
    pub fade_strength: f32,
    /// Face-control socket path; `None` disables the listener.
    pub face_socket: Option<PathBuf>,
    /// Shared-memory name for the phoneme ring; `None` keeps the ring
    /// in-process (tests).
    pub phoneme_shm: Option<String>,
}

impl Default for TtsWorkerOptions {
    fn default() -> Self {
        Self {
            audio_queue_capacity: defaults::AUDIO_QUEUE_CAPACITY,
            fade_ms: defaults::FADE_MS,
            fade_strength: defaults::FADE_STRENGTH,
            face_socket: Some(PathBuf::from(defaults::FACE_CONTROL_SOCKET)),
            phoneme_shm: Some(defaults::PHONEME_SHM_NAME.to_string()),
        }
    }
}

/// Fades out the last `fade_ms` of a chunk so consecutive chunks join
/// without clicks. The final sample lands on exactly zero; samples before
/// the fade window are untouched.
pub fn apply_tail_fade(samples: &mut [i16], sample_rate: u32, fade_ms: u32, strength: f32) {
    let fade_len = (sample_rate as u64 * fade_ms as u64 / 1000) as usize;
    let n = fade_len.min(samples.len());
    if n == 0 {
        return;
    }
    let exponent = 1.0 + strength / 25.0;
    let start = samples.len() - n;
    for i in 0..n {
        let gain = (1.0 - (i as f32 + 1.0) / n as f32).powf(exponent);
        samples[start + i] = (samples[start + i] as f32 * gain) as i16;
    }
}

/// Worker that synthesizes response chunks and feeds the speaker.
pub struct TtsWorker {
    backend: Box<dyn TtsBackend>,
    input: Arc<BoundedChannel<TextMessage>>,
    sink: Arc<dyn PlaybackSink>,
    options: TtsWorkerOptions,
    reporter: Arc<dyn ErrorReporter>,
    face_flag: Arc<AtomicBool>,
    // Owned resources, live between initialize and cleanup.
    audio_queue: Option<Arc<BoundedChannel<AudioChunk>>>,
    audio_handle: Option<WorkerHandle>,
    interrupter: Option<AudioInterrupt>,
    ring: Option<PhonemeRing>,
    face_listener: Option<FaceControlListener>,
}

impl TtsWorker {
    /// Creates a TTS worker. Nothing is opened until `initialize`.
    pub fn new(
        backend: Box<dyn TtsBackend>,
        input: Arc<BoundedChannel<TextMessage>>,
        sink: Arc<dyn PlaybackSink>,
        options: TtsWorkerOptions,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            backend,
            input,
            sink,
            options,
            reporter,
            face_flag: Arc::new(AtomicBool::new(false)),
            audio_queue: None,
            audio_handle: None,
            interrupter: None,
            ring: None,
            face_listener: None,
        }
    }

    /// The shared face-display flag (readable and writable by any thread).
    pub fn face_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.face_flag)
    }

    fn interrupt_current_speech(&self) {
        if let Some(interrupter) = &self.interrupter {
            interrupter.interrupt_audio_immediately();
        }
    }

    fn handle_control(&mut self, msg: &ControlMessage) -> Step {
        match msg.signal {
            ControlSignal::Interrupt | ControlSignal::FlushQueues => {
                let flushed = self.input.flush();
                if flushed > 0 {
                    log::info!("[tts] interrupted, flushed {flushed} pending messages");
                }
                self.interrupt_current_speech();
                Step::Continue
            }
            _ => default_control(msg),
        }
    }

    fn emit_phonemes(&self, phonemes: &[crate::backends::Phoneme]) {
        let Some(ring) = &self.ring else {
            return;
        };
        for phoneme in phonemes {
            let event = PhonemeEvent {
                phoneme_id: phoneme.id,
                duration_secs: phoneme.duration_secs,
                timestamp_us: now_timestamp_us(),
            };
            if !ring.push(event) {
                log::debug!("[tts] phoneme ring full, event dropped");
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(mut listener) = self.face_listener.take() {
            listener.stop();
        }
        // Dropping the ring unmaps and unlinks the shm segment.
        self.ring.take();
        if let Some(queue) = &self.audio_queue {
            queue.shutdown();
        }
        if let Some(mut handle) = self.audio_handle.take() {
            handle.stop();
        }
        self.interrupter = None;
        self.audio_queue = None;
    }

    #[cfg(test)]
    fn ring_unread(&self) -> usize {
        self.ring.as_ref().map_or(0, |r| r.unread())
    }

    #[cfg(test)]
    fn audio_queue_for_tests(&self) -> Arc<BoundedChannel<AudioChunk>> {
        Arc::clone(self.audio_queue.as_ref().unwrap())
    }
}

impl Worker for TtsWorker {
    fn name(&self) -> &'static str {
        "tts"
    }

    fn initialize(&mut self) -> Result<()> {
        self.backend.init()?;

        let queue = Arc::new(BoundedChannel::new(self.options.audio_queue_capacity));
        let playback = PlaybackWorker::new(Arc::clone(&queue), Arc::clone(&self.sink));
        let interrupter = playback.interrupter();
        let handle = spawn_worker(playback, Arc::clone(&self.reporter))?;

        self.audio_queue = Some(queue);
        self.audio_handle = Some(handle);
        self.interrupter = Some(interrupter);

        let ring = match &self.options.phoneme_shm {
            Some(name) => PhonemeRing::create_shared(name),
            None => Ok(PhonemeRing::create_in_memory()),
        };
        self.ring = match ring {
            Ok(ring) => Some(ring),
            Err(e) => {
                self.teardown();
                return Err(e);
            }
        };

        if let Some(path) = self.options.face_socket.clone() {
            match FaceControlListener::start(path, Arc::clone(&self.face_flag)) {
                Ok(listener) => self.face_listener = Some(listener),
                Err(e) => {
                    self.teardown();
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    fn process(&mut self, ctx: &WorkerContext) -> Result<Step> {
        let msg = match self
            .input
            .pop_timeout(Duration::from_millis(defaults::IDLE_SLEEP_MS))
        {
            Pop::Item(msg) => msg,
            Pop::Shutdown => return Ok(Step::Shutdown),
            Pop::Timeout | Pop::Empty | Pop::Interrupted => return Ok(Step::Continue),
        };

        let text = msg.text.trim();
        if text.is_empty() {
            return Ok(Step::Continue);
        }

        log::info!("[tts] speaking: {text}");
        let mut chunk = if self.face_flag.load(Ordering::Acquire) {
            let (chunk, phonemes) = self.backend.speak_with_timings(text)?;
            self.emit_phonemes(&phonemes);
            chunk
        } else {
            self.backend.speak(text)?
        };

        if chunk.samples.is_empty() {
            log::warn!("[tts] synthesis produced no audio for: {text}");
            return Ok(Step::Continue);
        }

        apply_tail_fade(
            &mut chunk.samples,
            chunk.sample_rate,
            self.options.fade_ms,
            self.options.fade_strength,
        );

        let Some(queue) = self.audio_queue.as_ref() else {
            return Err(crate::error::VoxError::Pipeline {
                message: "audio queue missing before process".to_string(),
            });
        };
        match queue.push_blocking(chunk) {
            PushResult::Pushed => {
                ctx.record_processed();
                Ok(Step::Continue)
            }
            PushResult::Shutdown => Ok(Step::Shutdown),
            PushResult::Timeout => unreachable!("blocking push cannot time out"),
        }
    }

    fn on_control(&mut self, msg: &ControlMessage) -> Step {
        self.handle_control(msg)
    }

    fn cleanup(&mut self) {
        self.teardown();
        self.backend.shutdown();
    }
}
