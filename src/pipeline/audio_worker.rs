//! Playback worker: consumes audio chunks and plays them on the speaker.
//!
//! Owned entirely by the TTS worker; the only operation reachable from
//! outside its thread is [`AudioInterrupt::interrupt_audio_immediately`].

use crate::defaults;
use crate::error::Result;
use crate::pipeline::channel::{BoundedChannel, Pop};
use crate::pipeline::messages::AudioChunk;
use crate::pipeline::worker::{Step, Worker, WorkerContext};
use crate::audio::playback::PlaybackSink;
use std::sync::Arc;
use std::time::Duration;

/// Worker that drains the audio-chunk queue into the playback device.
pub struct PlaybackWorker {
    input: Arc<BoundedChannel<AudioChunk>>,
    sink: Arc<dyn PlaybackSink>,
    sample_rate: u32,
}

impl PlaybackWorker {
    /// Creates a playback worker at the default synthesis rate.
    pub fn new(input: Arc<BoundedChannel<AudioChunk>>, sink: Arc<dyn PlaybackSink>) -> Self {
        Self {
            input,
            sink,
            sample_rate: defaults::TTS_SAMPLE_RATE,
        }
    }

    /// Handle for interrupting playback from another thread.
    pub fn interrupter(&self) -> AudioInterrupt {
        AudioInterrupt {
            queue: Arc::clone(&self.input),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl Worker for PlaybackWorker {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn initialize(&mut self) -> Result<()> {
        self.sink.configure(self.sample_rate)
    }

    fn process(&mut self, ctx: &WorkerContext) -> Result<Step> {
        match self
            .input
            .pop_timeout(Duration::from_millis(defaults::CHANNEL_POLL_MS))
        {
            Pop::Item(chunk) => {
                if chunk.samples.is_empty() {
                    return Ok(Step::Continue);
                }
                if chunk.sample_rate != self.sample_rate {
                    self.sample_rate = chunk.sample_rate;
                    self.sink.configure(self.sample_rate)?;
                }
                self.sink.play(&chunk.samples)?;
                ctx.record_processed();
                Ok(Step::Continue)
            }
            Pop::Shutdown => Ok(Step::Shutdown),
            // Timeout: give the runner a chance to drain control signals.
            // Interrupted: queued chunks were already flushed by the
            // interrupt path; nothing to do here.
            Pop::Timeout | Pop::Empty | Pop::Interrupted => Ok(Step::Continue),
        }
    }

    fn cleanup(&mut self) {
        // Drain, not drop: residual in-flight audio plays out.
        self.sink.drain();
        self.sink.close();
    }
}

/// The one externally callable mutator on the playback worker.
pub struct AudioInterrupt {
    queue: Arc<BoundedChannel<AudioChunk>>,
    sink: Arc<dyn PlaybackSink>,
}

impl AudioInterrupt {
    /// Flushes queued audio and drops the device buffer so playback stops
    /// now. Safe against a concurrent in-progress play.
    pub fn interrupt_audio_immediately(&self) {
        let flushed = self.queue.flush();
        if flushed > 0 {
            log::info!("[audio] flushed {flushed} queued audio chunks");
        }
        self.sink.interrupt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::MockSink;

    #[test]
    fn test_plays_chunks_in_order() {
        let queue = Arc::new(BoundedChannel::new(8));
        let sink = Arc::new(MockSink::new());
        let handle = sink.handle();

        let mut worker = PlaybackWorker::new(Arc::clone(&queue), sink);
        worker.initialize().unwrap();

        queue.push_blocking(AudioChunk::new(vec![1, 2], defaults::TTS_SAMPLE_RATE));
        queue.push_blocking(AudioChunk::new(vec![3, 4], defaults::TTS_SAMPLE_RATE));

        let (ctx, _mailbox) = WorkerContext::new_for_tests();
        worker.process(&ctx).unwrap();
        worker.process(&ctx).unwrap();

        assert_eq!(handle.played(), vec![vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn test_reconfigures_on_rate_change() {
        let queue = Arc::new(BoundedChannel::new(8));
        let sink = Arc::new(MockSink::new());
        let handle = sink.handle();

        let mut worker = PlaybackWorker::new(Arc::clone(&queue), sink);
        worker.initialize().unwrap();

        queue.push_blocking(AudioChunk::new(vec![1], 16000));
        let (ctx, _mailbox) = WorkerContext::new_for_tests();
        worker.process(&ctx).unwrap();

        assert_eq!(handle.configured_rates(), vec![defaults::TTS_SAMPLE_RATE, 16000]);
    }

    #[test]
    fn test_empty_chunk_skipped() {
        let queue = Arc::new(BoundedChannel::new(8));
        let sink = Arc::new(MockSink::new());
        let handle = sink.handle();

        let mut worker = PlaybackWorker::new(Arc::clone(&queue), sink);
        worker.initialize().unwrap();

        queue.push_blocking(AudioChunk::new(Vec::new(), defaults::TTS_SAMPLE_RATE));
        let (ctx, _mailbox) = WorkerContext::new_for_tests();
        worker.process(&ctx).unwrap();

        assert!(handle.played().is_empty());
    }

    #[test]
    fn test_shutdown_pop_ends_loop_and_drains() {
        let queue: Arc<BoundedChannel<AudioChunk>> = Arc::new(BoundedChannel::new(8));
        let sink = Arc::new(MockSink::new());
        let handle = sink.handle();

        let mut worker = PlaybackWorker::new(Arc::clone(&queue), sink);
        queue.shutdown();

        let (ctx, _mailbox) = WorkerContext::new_for_tests();
        assert_eq!(worker.process(&ctx).unwrap(), Step::Shutdown);

        worker.cleanup();
        assert!(handle.drained());
        assert!(handle.closed());
    }

    #[test]
    fn test_interrupt_flushes_and_drops_device() {
        let queue = Arc::new(BoundedChannel::new(8));
        let sink = Arc::new(MockSink::new());
        let handle = sink.handle();

        let worker = PlaybackWorker::new(Arc::clone(&queue), sink);
        let interrupt = worker.interrupter();

        queue.push_blocking(AudioChunk::new(vec![1], 22050));
        queue.push_blocking(AudioChunk::new(vec![2], 22050));
        queue.push_blocking(AudioChunk::new(vec![3], 22050));

        interrupt.interrupt_audio_immediately();

        assert!(queue.is_empty());
        assert_eq!(handle.interrupts(), 1);
    }
}
