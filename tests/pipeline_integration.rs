//! End-to-end pipeline tests with mock devices and scripted backends.

use std::sync::Arc;
use std::time::{Duration, Instant};
use voxpipe::audio::capture::MockMicrophone;
use voxpipe::audio::playback::{MockSink, MockSinkHandle};
use voxpipe::backends::dev::{DevStt, ScriptedLlm, ScriptedTts};
use voxpipe::pipeline::{Pipeline, PipelineConfig, PipelineMode, TtsWorkerOptions};

fn quiet_tts_options() -> TtsWorkerOptions {
    // No face socket, in-process phoneme ring: nothing global touched.
    TtsWorkerOptions {
        face_socket: None,
        phoneme_shm: None,
        ..TtsWorkerOptions::default()
    }
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn voice_pipeline(
    llm: ScriptedLlm,
    tts: ScriptedTts,
    sink: MockSink,
) -> (Pipeline, MockSinkHandle) {
    let handle = sink.handle();
    let mut pipeline = Pipeline::new(PipelineConfig {
        tts: quiet_tts_options(),
        response_timeout: Duration::from_secs(2),
        ..PipelineConfig::for_mode(PipelineMode::VoiceAssistant)
    })
    .with_microphone(Box::new(MockMicrophone::new()))
    .with_playback_sink(Arc::new(sink));

    pipeline
        .initialize(
            Some(Box::new(DevStt::new())),
            Some(Box::new(llm)),
            Some(Box::new(tts)),
        )
        .unwrap();
    (pipeline, handle)
}

#[test]
fn text_round_trip_in_text_only_mode() {
    let mut pipeline = Pipeline::new(PipelineConfig {
        response_timeout: Duration::from_secs(2),
        ..PipelineConfig::for_mode(PipelineMode::TextOnly)
    });
    pipeline
        .initialize(
            None,
            Some(Box::new(
                ScriptedLlm::new().with_response("hello", &["Hi ", "there."]),
            )),
            None,
        )
        .unwrap();
    pipeline.start().unwrap();

    // Two callback fragments, one chunk, flushed on the '.'.
    assert_eq!(pipeline.process_text_input("hello").unwrap(), "Hi there.");

    pipeline.stop();
}

#[test]
fn synthesis_mode_plays_submitted_text() {
    let sink = MockSink::new();
    let handle = sink.handle();

    let mut pipeline = Pipeline::new(PipelineConfig {
        tts: quiet_tts_options(),
        ..PipelineConfig::for_mode(PipelineMode::Synthesis)
    })
    .with_playback_sink(Arc::new(sink));
    pipeline
        .initialize(None, None, Some(Box::new(ScriptedTts::new())))
        .unwrap();
    pipeline.start().unwrap();

    pipeline.submit_text("speak this aloud").unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || !handle.played().is_empty()),
        "submitted text never reached the speaker"
    );

    pipeline.stop();
    assert!(handle.drained(), "shutdown must drain, not drop");
}

#[test]
fn transcription_mode_emits_utterances() {
    // 750ms of tone then 1250ms of silence: the trailing quiet warmup
    // window inside the 2000ms VAD snapshot reads as a finished utterance.
    let rate = 16000usize;
    let mut samples: Vec<f32> = (0..rate * 3 / 4)
        .map(|i| 0.5 * (i as f32 * 0.3).sin())
        .collect();
    samples.extend(std::iter::repeat_n(0.0f32, rate * 5 / 4));

    let mut pipeline = Pipeline::new(PipelineConfig::for_mode(PipelineMode::Transcription))
        .with_microphone(Box::new(MockMicrophone::new().with_samples(samples)));
    pipeline
        .initialize(
            Some(Box::new(DevStt::new().with_transcript("turn on the lights"))),
            None,
            None,
        )
        .unwrap();
    pipeline.start().unwrap();

    let transcript = pipeline.pop_transcript(Duration::from_secs(2));
    assert_eq!(transcript.as_deref(), Some("turn on the lights"));

    pipeline.stop();
}

#[test]
fn barge_in_stops_playback_and_flushes() {
    // Large chunks and slow playback keep the device busy mid-utterance.
    let sink = MockSink::new().with_play_delay_ms(150);
    let tts = ScriptedTts::new().with_samples_per_chunk(40_000);
    let llm = ScriptedLlm::new();
    let (mut pipeline, sink_handle) = voice_pipeline(llm, tts, sink);
    pipeline.start().unwrap();

    for text in ["first reply.", "second reply.", "third reply.", "fourth reply."] {
        pipeline.submit_text(text).unwrap();
    }

    // Wait until the device is actually playing.
    assert!(
        wait_until(Duration::from_secs(2), || !sink_handle.played().is_empty()),
        "playback never started"
    );

    pipeline.interrupt();

    assert!(
        wait_until(Duration::from_secs(1), || sink_handle.interrupts() >= 1),
        "device was never dropped-and-prepared"
    );
    let plays_at_interrupt = sink_handle.played().len();

    // Stale queued speech is gone: no flood of further chunks plays.
    std::thread::sleep(Duration::from_millis(400));
    assert!(
        sink_handle.played().len() <= plays_at_interrupt + 1,
        "flushed chunks still reached the device"
    );

    pipeline.stop();
}

#[test]
fn shutdown_is_deadlock_free_with_blocked_workers() {
    // All workers idle-blocked on their input channels.
    let (mut pipeline, _sink) =
        voice_pipeline(ScriptedLlm::new(), ScriptedTts::new(), MockSink::new());
    pipeline.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    pipeline.stop();
    let elapsed = start.elapsed();

    assert!(
        elapsed < Duration::from_secs(1),
        "stop took {elapsed:?}, workers likely deadlocked"
    );
}

#[test]
fn restart_after_stop_works() {
    let mut pipeline = Pipeline::new(PipelineConfig {
        response_timeout: Duration::from_secs(2),
        ..PipelineConfig::for_mode(PipelineMode::TextOnly)
    });
    pipeline
        .initialize(
            None,
            Some(Box::new(ScriptedLlm::new().with_response("a", &["One."]))),
            None,
        )
        .unwrap();
    pipeline.start().unwrap();
    assert_eq!(pipeline.process_text_input("a").unwrap(), "One.");
    pipeline.stop();

    // A stopped pipeline can be re-initialized and started again.
    pipeline
        .initialize(
            None,
            Some(Box::new(ScriptedLlm::new().with_response("b", &["Two."]))),
            None,
        )
        .unwrap();
    pipeline.start().unwrap();
    assert_eq!(pipeline.process_text_input("b").unwrap(), "Two.");
    pipeline.stop();
}

#[test]
fn interrupt_while_idle_is_harmless() {
    let (mut pipeline, sink_handle) =
        voice_pipeline(ScriptedLlm::new(), ScriptedTts::new(), MockSink::new());
    pipeline.start().unwrap();

    pipeline.interrupt();
    pipeline.interrupt();
    std::thread::sleep(Duration::from_millis(200));

    assert!(pipeline.is_running());
    assert!(sink_handle.interrupts() >= 1);

    pipeline.stop();
}
