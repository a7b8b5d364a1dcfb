//! Pipeline supervisor: owns the channels and workers, runs the lifecycle.
//!
//! Workers start downstream-first (TTS, LLM, STT) so producers never
//! enqueue before their consumer exists, and stop upstream-first after the
//! channels are shut down so nothing stays blocked on a dead queue.

use crate::audio::capture::{CpalMicrophone, Microphone};
use crate::audio::playback::{AlsaSink, PlaybackSink};
use crate::backends::{LlmBackend, SttBackend, TtsBackend};
use crate::config::{AudioSettings, Config};
use crate::defaults;
use crate::error::{Result, VoxError};
use crate::pipeline::channel::{BoundedChannel, Pop, PushResult};
use crate::pipeline::control::ControlSignal;
use crate::pipeline::llm_worker::LlmWorker;
use crate::pipeline::messages::TextMessage;
use crate::pipeline::stt_worker::{SttWorker, SttWorkerConfig};
use crate::pipeline::tts_worker::{TtsWorker, TtsWorkerOptions};
use crate::pipeline::worker::{ErrorReporter, LogReporter, WorkerHandle, spawn_worker};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Which stages a pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Full chain: mic -> STT -> LLM -> TTS -> speaker.
    VoiceAssistant,
    /// LLM only: text in, text out.
    TextOnly,
    /// STT only: mic in, transcripts out.
    Transcription,
    /// TTS only: text in, audio out.
    Synthesis,
    /// Full chain plus the sideband text queue pair for headless clients.
    VoiceAssistantWithText,
}

impl PipelineMode {
    /// Stage enable flags for this mode:
    /// `(enable_stt, enable_llm, enable_tts, enable_alt_text)`.
    pub fn flags(&self) -> (bool, bool, bool, bool) {
        match self {
            PipelineMode::VoiceAssistant => (true, true, true, false),
            PipelineMode::TextOnly => (false, true, false, false),
            PipelineMode::Transcription => (true, false, false, false),
            PipelineMode::Synthesis => (false, false, true, false),
            PipelineMode::VoiceAssistantWithText => (true, true, true, true),
        }
    }
}

/// Configuration for the pipeline supervisor.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub text_queue_size: usize,
    pub response_queue_size: usize,
    /// Timeout for pushing a text request in `process_text_input`.
    pub text_push_timeout: Duration,
    /// Timeout for awaiting a response in `process_text_input`.
    pub response_timeout: Duration,
    pub enable_stt: bool,
    pub enable_llm: bool,
    pub enable_tts: bool,
    pub enable_alt_text: bool,
    pub enable_stats_logging: bool,
    pub stats_interval: Duration,
    pub audio: AudioSettings,
    pub tts: TtsWorkerOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            text_queue_size: defaults::TEXT_QUEUE_CAPACITY,
            response_queue_size: defaults::RESPONSE_QUEUE_CAPACITY,
            text_push_timeout: Duration::from_millis(defaults::TEXT_PUSH_TIMEOUT_MS),
            response_timeout: Duration::from_millis(defaults::RESPONSE_TIMEOUT_MS),
            enable_stt: true,
            enable_llm: true,
            enable_tts: true,
            enable_alt_text: false,
            enable_stats_logging: false,
            stats_interval: Duration::from_secs(defaults::STATS_INTERVAL_SECS),
            audio: AudioSettings::default(),
            tts: TtsWorkerOptions::default(),
        }
    }
}

impl PipelineConfig {
    /// Default configuration with the given mode's stage flags.
    pub fn for_mode(mode: PipelineMode) -> Self {
        let (enable_stt, enable_llm, enable_tts, enable_alt_text) = mode.flags();
        Self {
            enable_stt,
            enable_llm,
            enable_tts,
            enable_alt_text,
            ..Self::default()
        }
    }

    /// Builds a pipeline configuration from the loaded config file.
    pub fn from_config(config: &Config, mode: PipelineMode) -> Self {
        let mut pc = Self::for_mode(mode);
        pc.text_queue_size = config.settings.pipeline.text_queue_size;
        pc.response_queue_size = config.settings.pipeline.response_queue_size;
        pc.response_timeout =
            Duration::from_millis(config.settings.pipeline.response_timeout_ms);
        pc.enable_alt_text |= config.settings.pipeline.enable_alt_text;
        pc.audio = config.settings.audio.clone();
        pc.tts.face_socket = Some(config.settings.tts.face_socket.clone());
        pc.tts.phoneme_shm = Some(config.settings.tts.phoneme_shm.clone());
        pc
    }
}

/// Point-in-time pipeline statistics.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub stt_processed: u64,
    pub llm_processed: u64,
    pub tts_processed: u64,
    pub text_queue_len: usize,
    pub response_queue_len: usize,
}

#[derive(Default)]
struct PendingWorkers {
    stt: Option<SttWorker>,
    llm: Option<LlmWorker>,
    tts: Option<TtsWorker>,
}

#[derive(Default)]
struct Handles {
    stt: Option<WorkerHandle>,
    llm: Option<WorkerHandle>,
    tts: Option<WorkerHandle>,
}

struct StatsThread {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// The pipeline supervisor.
pub struct Pipeline {
    config: PipelineConfig,
    reporter: Arc<dyn ErrorReporter>,
    running: AtomicBool,
    interrupt_flag: Option<Arc<AtomicBool>>,
    // Injected devices; real ones are constructed at initialize if absent.
    // Mutex-held so the supervisor stays shareable across server threads.
    microphone: Mutex<Option<Box<dyn Microphone>>>,
    playback: Mutex<Option<Arc<dyn PlaybackSink>>>,
    text_queue: Option<Arc<BoundedChannel<TextMessage>>>,
    response_queue: Option<Arc<BoundedChannel<TextMessage>>>,
    alt_input: Option<Arc<BoundedChannel<TextMessage>>>,
    alt_output: Option<Arc<BoundedChannel<TextMessage>>>,
    pending: Mutex<PendingWorkers>,
    handles: Mutex<Handles>,
    stats_thread: Mutex<Option<StatsThread>>,
}

impl Pipeline {
    /// Creates an uninitialized pipeline.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            reporter: Arc::new(LogReporter),
            running: AtomicBool::new(false),
            interrupt_flag: None,
            microphone: Mutex::new(None),
            playback: Mutex::new(None),
            text_queue: None,
            response_queue: None,
            alt_input: None,
            alt_output: None,
            pending: Mutex::new(PendingWorkers::default()),
            handles: Mutex::new(Handles::default()),
            stats_thread: Mutex::new(None),
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Injects a microphone (for tests or custom capture stacks).
    pub fn with_microphone(self, mic: Box<dyn Microphone>) -> Self {
        *self.microphone.lock().unwrap_or_else(|e| e.into_inner()) = Some(mic);
        self
    }

    /// Injects a playback sink (for tests or custom output stacks).
    pub fn with_playback_sink(self, sink: Arc<dyn PlaybackSink>) -> Self {
        *self.playback.lock().unwrap_or_else(|e| e.into_inner()) = Some(sink);
        self
    }

    /// Installs a process-wide interrupt source observed by every
    /// channel's pop operations. Must be called before `initialize`.
    pub fn set_interrupt_flag(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt_flag = Some(flag);
    }

    fn make_channel(&self, capacity: usize) -> Arc<BoundedChannel<TextMessage>> {
        Arc::new(match &self.interrupt_flag {
            Some(flag) => BoundedChannel::with_interrupt(capacity, Arc::clone(flag)),
            None => BoundedChannel::new(capacity),
        })
    }

    /// Creates the channels and workers for the enabled stages.
    ///
    /// Backends for disabled stages may be `None`.
    pub fn initialize(
        &mut self,
        stt_backend: Option<Box<dyn SttBackend>>,
        llm_backend: Option<Box<dyn LlmBackend>>,
        tts_backend: Option<Box<dyn TtsBackend>>,
    ) -> Result<()> {
        if self.is_running() {
            return Err(VoxError::Pipeline {
                message: "cannot initialize while running".to_string(),
            });
        }

        let text_queue = self.make_channel(self.config.text_queue_size);
        let response_queue = self.make_channel(self.config.response_queue_size);
        self.text_queue = Some(Arc::clone(&text_queue));
        self.response_queue = Some(Arc::clone(&response_queue));

        if self.config.enable_alt_text {
            self.alt_input = Some(self.make_channel(self.config.text_queue_size));
            self.alt_output = Some(self.make_channel(self.config.response_queue_size));
        }

        let mut pending = PendingWorkers::default();

        if self.config.enable_tts
            && let Some(backend) = tts_backend
        {
            let sink: Arc<dyn PlaybackSink> = self
                .playback
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
                .unwrap_or_else(|| Arc::new(AlsaSink::new("default")));
            pending.tts = Some(TtsWorker::new(
                backend,
                Arc::clone(&response_queue),
                sink,
                self.config.tts.clone(),
                Arc::clone(&self.reporter),
            ));
        }

        if self.config.enable_llm
            && let Some(backend) = llm_backend
        {
            let mut worker = LlmWorker::new(
                backend,
                Arc::clone(&text_queue),
                Arc::clone(&response_queue),
            );
            if let (Some(alt_in), Some(alt_out)) = (&self.alt_input, &self.alt_output) {
                worker = worker.with_alt_queues(Arc::clone(alt_in), Arc::clone(alt_out));
            }
            pending.llm = Some(worker);
        }

        if self.config.enable_stt
            && let Some(backend) = stt_backend
        {
            let mic = self
                .microphone
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
                .unwrap_or_else(|| Box::new(CpalMicrophone::new(&self.config.audio)));
            pending.stt = Some(SttWorker::new(
                backend,
                mic,
                Arc::clone(&text_queue),
                SttWorkerConfig::from(&self.config.audio),
            ));
        }

        if pending.stt.is_none() && pending.llm.is_none() && pending.tts.is_none() {
            return Err(VoxError::Pipeline {
                message: "no stages enabled".to_string(),
            });
        }

        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = pending;
        log::info!("pipeline initialized");
        Ok(())
    }

    /// Starts the enabled workers, downstream-first. A failed start rolls
    /// back the workers already running.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(VoxError::Pipeline {
                message: "pipeline already running".to_string(),
            });
        }

        let pending = {
            let mut guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        if pending.stt.is_none() && pending.llm.is_none() && pending.tts.is_none() {
            return Err(VoxError::Pipeline {
                message: "pipeline not initialized".to_string(),
            });
        }

        let mut handles = Handles::default();
        let result = (|| -> Result<()> {
            if let Some(worker) = pending.tts {
                handles.tts = Some(spawn_worker(worker, Arc::clone(&self.reporter))?);
            }
            if let Some(worker) = pending.llm {
                handles.llm = Some(spawn_worker(worker, Arc::clone(&self.reporter))?);
            }
            if let Some(worker) = pending.stt {
                handles.stt = Some(spawn_worker(worker, Arc::clone(&self.reporter))?);
            }
            Ok(())
        })();

        if let Err(e) = result {
            log::error!("pipeline start failed: {e}");
            // Roll back in upstream order; channels are still live so the
            // started workers are idle, not blocked.
            for handle in [&mut handles.stt, &mut handles.llm, &mut handles.tts]
                .into_iter()
                .flatten()
            {
                handle.stop();
            }
            return Err(e);
        }

        *self.handles.lock().unwrap_or_else(|e| e.into_inner()) = handles;
        self.running.store(true, Ordering::Release);

        if self.config.enable_stats_logging {
            self.start_stats_thread();
        }

        log::info!("pipeline started");
        Ok(())
    }

    /// Stops the pipeline: channels shut down first to wake blocked
    /// workers, then workers join upstream-first. No-op when not running.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        log::info!("stopping pipeline");

        if let Some(stats) = self
            .stats_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            stats.stop.store(true, Ordering::Release);
            let _ = stats.thread.join();
        }

        for queue in [
            &self.text_queue,
            &self.response_queue,
            &self.alt_input,
            &self.alt_output,
        ]
        .into_iter()
        .flatten()
        {
            queue.shutdown();
        }

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        let handles = &mut *handles;
        for handle in [&mut handles.stt, &mut handles.llm, &mut handles.tts]
            .into_iter()
            .flatten()
        {
            handle.stop();
        }
        *handles = Handles::default();

        log::info!("pipeline stopped");
    }

    /// Whether the pipeline is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Broadcasts a control signal to every running worker's mailbox.
    pub fn signal_all(&self, signal: ControlSignal) {
        let handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for handle in [&handles.stt, &handles.llm, &handles.tts]
            .into_iter()
            .flatten()
        {
            handle.signal(signal);
        }
    }

    /// Barge-in: interrupts every worker, flushing stale data and stopping
    /// playback immediately.
    pub fn interrupt(&self) {
        self.signal_all(ControlSignal::Interrupt);
    }

    /// Text-mode request: pushes a prompt and waits for one response
    /// message. Uses the sideband queues when enabled so voice traffic is
    /// untouched.
    pub fn process_text_input(&self, text: &str) -> Result<String> {
        if !self.is_running() {
            return Err(VoxError::Pipeline {
                message: "pipeline not running".to_string(),
            });
        }
        let has_llm = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .llm
            .is_some();
        if !has_llm {
            return Err(VoxError::Pipeline {
                message: "no LLM stage".to_string(),
            });
        }

        let (input, output) = if self.config.enable_alt_text {
            (self.alt_input.as_ref(), self.alt_output.as_ref())
        } else {
            (self.text_queue.as_ref(), self.response_queue.as_ref())
        };
        let (Some(input), Some(output)) = (input, output) else {
            return Err(VoxError::Pipeline {
                message: "pipeline not initialized".to_string(),
            });
        };

        match input.push_timeout(TextMessage::new(text), self.config.text_push_timeout) {
            PushResult::Pushed => {}
            PushResult::Timeout => {
                return Err(VoxError::Pipeline {
                    message: "text queue full".to_string(),
                });
            }
            PushResult::Shutdown => {
                return Err(VoxError::Pipeline {
                    message: "pipeline shutting down".to_string(),
                });
            }
        }

        match output.pop_timeout(self.config.response_timeout) {
            Pop::Item(msg) => Ok(msg.text),
            Pop::Timeout => Err(VoxError::Pipeline {
                message: "response timed out".to_string(),
            }),
            _ => Err(VoxError::Pipeline {
                message: "pipeline shutting down".to_string(),
            }),
        }
    }

    /// Synthesis-mode entry point: queues text directly for TTS.
    pub fn submit_text(&self, text: &str) -> Result<()> {
        let Some(queue) = &self.response_queue else {
            return Err(VoxError::Pipeline {
                message: "pipeline not initialized".to_string(),
            });
        };
        match queue.push_timeout(TextMessage::new(text), self.config.text_push_timeout) {
            PushResult::Pushed => Ok(()),
            PushResult::Timeout => Err(VoxError::Pipeline {
                message: "synthesis queue full".to_string(),
            }),
            PushResult::Shutdown => Err(VoxError::Pipeline {
                message: "pipeline shutting down".to_string(),
            }),
        }
    }

    /// Transcription-mode exit point: takes the next recognized utterance.
    pub fn pop_transcript(&self, timeout: Duration) -> Option<String> {
        let queue = self.text_queue.as_ref()?;
        match queue.pop_timeout(timeout) {
            Pop::Item(msg) => Some(msg.text),
            _ => None,
        }
    }

    /// Discards everything pending in the outward-facing queues.
    pub fn clear_queues(&self) {
        for queue in [
            &self.text_queue,
            &self.response_queue,
            &self.alt_input,
            &self.alt_output,
        ]
        .into_iter()
        .flatten()
        {
            queue.clear();
        }
    }

    /// Snapshot of per-worker counters and queue depths.
    pub fn stats(&self) -> PipelineStats {
        let handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        PipelineStats {
            stt_processed: handles.stt.as_ref().map_or(0, |h| h.processed()),
            llm_processed: handles.llm.as_ref().map_or(0, |h| h.processed()),
            tts_processed: handles.tts.as_ref().map_or(0, |h| h.processed()),
            text_queue_len: self.text_queue.as_ref().map_or(0, |q| q.len()),
            response_queue_len: self.response_queue.as_ref().map_or(0, |q| q.len()),
        }
    }

    fn start_stats_thread(&self) {
        let counters: Vec<(&'static str, Arc<AtomicU64>)> = {
            let handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            [&handles.stt, &handles.llm, &handles.tts]
                .into_iter()
                .flatten()
                .map(|h| (h.name(), h.processed_counter()))
                .collect()
        };
        let queues = [
            ("text", self.text_queue.clone()),
            ("response", self.response_queue.clone()),
        ];
        let interval = self.config.stats_interval;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("stats".to_string())
            .spawn(move || {
                // Sleep in short ticks so stop() never waits a full
                // interval, log once per interval.
                let tick = Duration::from_millis(200);
                let mut since_log = Duration::ZERO;
                while !thread_stop.load(Ordering::Acquire) {
                    thread::sleep(tick);
                    since_log += tick;
                    if since_log < interval {
                        continue;
                    }
                    since_log = Duration::ZERO;

                    let worker_stats: Vec<String> = counters
                        .iter()
                        .map(|(name, counter)| {
                            format!("{name}: {}", counter.load(Ordering::Relaxed))
                        })
                        .collect();
                    let queue_stats: Vec<String> = queues
                        .iter()
                        .filter_map(|(name, queue)| {
                            queue.as_ref().map(|q| format!("{name}: {}", q.len()))
                        })
                        .collect();
                    log::info!(
                        "[stats] processed {{ {} }} queues {{ {} }}",
                        worker_stats.join(", "),
                        queue_stats.join(", ")
                    );
                }
            });

        match thread {
            Ok(thread) => {
                *self.stats_thread.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(StatsThread { stop, thread });
            }
            Err(e) => log::warn!("failed to spawn stats thread: {e}"),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
