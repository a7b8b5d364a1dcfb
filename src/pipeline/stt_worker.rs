//! STT worker: microphone -> VAD -> transcription -> text queue.

use crate::audio::capture::Microphone;
use crate::audio::vad::{VadConfig, voice_detected};
use crate::backends::SttBackend;
use crate::config::AudioSettings;
use crate::defaults;
use crate::error::{Result, VoxError};
use crate::pipeline::channel::{BoundedChannel, PushResult};
use crate::pipeline::control::{ControlMessage, ControlSignal};
use crate::pipeline::messages::TextMessage;
use crate::pipeline::worker::{Step, Worker, WorkerContext, default_control};
use std::sync::Arc;
use std::time::Duration;

/// Audio window inspected per VAD pass.
const PRE_WINDOW_MS: u32 = defaults::VAD_PRE_WINDOW_MS;

/// Config values cached at worker init.
#[derive(Debug, Clone)]
pub struct SttWorkerConfig {
    pub sample_rate: u32,
    pub vad_threshold: f32,
    pub capture_ms: u32,
}

impl From<&AudioSettings> for SttWorkerConfig {
    fn from(settings: &AudioSettings) -> Self {
        Self {
            sample_rate: settings.sample_rate,
            vad_threshold: settings.vad_threshold,
            capture_ms: settings.vad_capture_ms,
        }
    }
}

/// Worker that listens on the microphone and emits recognized utterances.
pub struct SttWorker {
    backend: Box<dyn SttBackend>,
    mic: Box<dyn Microphone>,
    output: Arc<BoundedChannel<TextMessage>>,
    config: SttWorkerConfig,
    vad: VadConfig,
}

impl SttWorker {
    /// Creates an STT worker. Nothing is opened until `initialize`.
    pub fn new(
        backend: Box<dyn SttBackend>,
        mic: Box<dyn Microphone>,
        output: Arc<BoundedChannel<TextMessage>>,
        config: SttWorkerConfig,
    ) -> Self {
        let vad = VadConfig {
            energy_threshold: config.vad_threshold,
            ..VadConfig::default()
        };
        Self {
            backend,
            mic,
            output,
            config,
            vad,
        }
    }

    fn flush_output(&self) {
        let flushed = self.output.flush();
        if flushed > 0 {
            log::info!("[stt] flushed {flushed} pending text messages");
        }
    }

    fn handle_control(&mut self, msg: &ControlMessage) -> Step {
        match msg.signal {
            // Stale utterances must not reach the LLM after a barge-in.
            ControlSignal::Interrupt | ControlSignal::FlushQueues => {
                self.flush_output();
                Step::Continue
            }
            _ => default_control(msg),
        }
    }
}

impl Worker for SttWorker {
    fn name(&self) -> &'static str {
        "stt"
    }

    fn initialize(&mut self) -> Result<()> {
        self.backend.init()?;

        let mut started = false;
        for attempt in 1..=defaults::MIC_INIT_ATTEMPTS {
            match self.mic.start() {
                Ok(()) => {
                    log::info!("[stt] microphone ready on attempt {attempt}");
                    started = true;
                    break;
                }
                Err(e) => {
                    log::warn!(
                        "[stt] microphone init attempt {attempt}/{} failed: {e}",
                        defaults::MIC_INIT_ATTEMPTS
                    );
                    std::thread::sleep(Duration::from_millis(defaults::MIC_INIT_BACKOFF_MS));
                }
            }
        }
        if !started {
            return Err(VoxError::AudioCapture {
                message: format!(
                    "microphone failed after {} attempts",
                    defaults::MIC_INIT_ATTEMPTS
                ),
            });
        }
        Ok(())
    }

    fn process(&mut self, ctx: &WorkerContext) -> Result<Step> {
        let snapshot = self.mic.snapshot_ms(PRE_WINDOW_MS);
        if snapshot.is_empty() {
            if let Some(msg) = ctx
                .mailbox()
                .recv_timeout(Duration::from_millis(defaults::IDLE_SLEEP_MS))
            {
                return Ok(self.handle_control(&msg));
            }
            return Ok(Step::Continue);
        }

        if !voice_detected(&snapshot, self.config.sample_rate, &self.vad) {
            if let Some(msg) = ctx
                .mailbox()
                .recv_timeout(Duration::from_millis(defaults::IDLE_SLEEP_MS))
            {
                return Ok(self.handle_control(&msg));
            }
            return Ok(Step::Continue);
        }

        let audio = self.mic.snapshot_ms(self.config.capture_ms);
        if audio.is_empty() {
            return Ok(Step::Continue);
        }

        let text = self.backend.transcribe(&audio)?;
        if !text.trim().is_empty() {
            log::info!("[stt] -> {text}");
            match self.output.push_blocking(TextMessage::new(text)) {
                PushResult::Pushed => ctx.record_processed(),
                PushResult::Shutdown => return Ok(Step::Shutdown),
                PushResult::Timeout => unreachable!("blocking push cannot time out"),
            }
        }
        self.mic.clear();

        Ok(Step::Continue)
    }

    fn on_control(&mut self, msg: &ControlMessage) -> Step {
        self.handle_control(msg)
    }

    fn cleanup(&mut self) {
        if let Err(e) = self.mic.stop() {
            log::warn!("[stt] microphone stop failed: {e}");
        }
        self.backend.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::MockMicrophone;
    use crate::backends::dev::DevStt;
    use crate::pipeline::channel::Pop;

    fn speech_then_silence(rate: u32) -> Vec<f32> {
        // 750ms of tone then 1250ms of silence. The VAD inspects the last
        // 2000ms, so the quiet trailing warmup window reads as a finished
        // utterance.
        let mut samples: Vec<f32> = (0..rate as usize * 3 / 4)
            .map(|i| 0.5 * (i as f32 * 0.3).sin())
            .collect();
        samples.extend(std::iter::repeat_n(0.0f32, rate as usize * 5 / 4));
        samples
    }

    fn test_config() -> SttWorkerConfig {
        SttWorkerConfig {
            sample_rate: 16000,
            vad_threshold: defaults::VAD_THRESHOLD,
            capture_ms: 4000,
        }
    }

    fn test_ctx() -> (WorkerContext, Arc<crate::pipeline::control::Mailbox>) {
        WorkerContext::new_for_tests()
    }

    #[test]
    fn test_transcribes_detected_speech() {
        let output = Arc::new(BoundedChannel::new(8));
        let mic = MockMicrophone::new().with_samples(speech_then_silence(16000));
        let mic_handle = mic.handle();

        let mut worker = SttWorker::new(
            Box::new(DevStt::new().with_transcript("hello world")),
            Box::new(mic),
            Arc::clone(&output),
            test_config(),
        );
        worker.initialize().unwrap();

        let (ctx, _mailbox) = test_ctx();
        assert_eq!(worker.process(&ctx).unwrap(), Step::Continue);

        let msg = output.try_pop();
        match msg {
            Pop::Item(m) => assert_eq!(m.text, "hello world"),
            other => panic!("expected transcript, got {other:?}"),
        }
        // Rolling buffer cleared after the utterance.
        assert_eq!(mic_handle.clear_count(), 1);
    }

    #[test]
    fn test_empty_transcription_not_pushed() {
        let output = Arc::new(BoundedChannel::new(8));
        let mic = MockMicrophone::new().with_samples(speech_then_silence(16000));
        let mic_handle = mic.handle();

        let mut worker = SttWorker::new(
            Box::new(DevStt::new()),
            Box::new(mic),
            Arc::clone(&output),
            test_config(),
        );
        worker.initialize().unwrap();

        let (ctx, _mailbox) = test_ctx();
        worker.process(&ctx).unwrap();

        assert!(output.is_empty());
        // Buffer still cleared so the same audio is not re-analyzed.
        assert_eq!(mic_handle.clear_count(), 1);
    }

    #[test]
    fn test_silence_produces_nothing() {
        let output = Arc::new(BoundedChannel::new(8));
        let mic = MockMicrophone::new().with_samples(vec![0.0; 64000]);

        let mut worker = SttWorker::new(
            Box::new(DevStt::new().with_transcript("should not appear")),
            Box::new(mic),
            Arc::clone(&output),
            test_config(),
        );
        worker.initialize().unwrap();

        let (ctx, _mailbox) = test_ctx();
        worker.process(&ctx).unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn test_interrupt_flushes_output() {
        let output = Arc::new(BoundedChannel::new(8));
        output.push_blocking(TextMessage::new("stale"));

        let mic = MockMicrophone::new();
        let mut worker = SttWorker::new(
            Box::new(DevStt::new()),
            Box::new(mic),
            Arc::clone(&output),
            test_config(),
        );

        let msg = ControlMessage {
            signal: ControlSignal::Interrupt,
            sent_at: std::time::Instant::now(),
        };
        assert_eq!(worker.on_control(&msg), Step::Continue);
        assert!(output.is_empty());
    }

    #[test]
    fn test_mic_failure_aborts_initialize() {
        let output = Arc::new(BoundedChannel::new(8));
        let mic = MockMicrophone::new().with_start_failure();

        let mut worker = SttWorker::new(
            Box::new(DevStt::new()),
            Box::new(mic),
            output,
            test_config(),
        );
        assert!(worker.initialize().is_err());
    }
}
