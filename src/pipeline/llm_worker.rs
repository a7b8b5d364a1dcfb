//! LLM worker: consumes utterances, streams generated text through the
//! chunker onto the response queue.
//!
//! An optional alternate input/output queue pair serves headless text
//! clients: requests arriving on the alternate input still produce
//! speakable chunks on the main output, and additionally the complete
//! response on the alternate output.

use crate::backends::LlmBackend;
use crate::defaults;
use crate::error::Result;
use crate::pipeline::channel::{BoundedChannel, Pop, PushResult};
use crate::pipeline::chunker::Chunker;
use crate::pipeline::control::{ControlMessage, ControlSignal};
use crate::pipeline::messages::TextMessage;
use crate::pipeline::worker::{Step, Worker, WorkerContext, default_control};
use std::sync::Arc;
use std::time::Duration;

/// Bytes of recent output searched for antiprompts.
const ANTIPROMPT_TAIL_BYTES: usize = 128;

/// Timeout for pushing a response chunk downstream.
const CHUNK_PUSH_TIMEOUT: Duration = Duration::from_millis(1000);

/// Worker that turns text requests into streamed response chunks.
pub struct LlmWorker {
    backend: Box<dyn LlmBackend>,
    input: Arc<BoundedChannel<TextMessage>>,
    output: Arc<BoundedChannel<TextMessage>>,
    alt_input: Option<Arc<BoundedChannel<TextMessage>>>,
    alt_output: Option<Arc<BoundedChannel<TextMessage>>>,
}

impl LlmWorker {
    /// Creates an LLM worker without the alternate queue pair.
    pub fn new(
        backend: Box<dyn LlmBackend>,
        input: Arc<BoundedChannel<TextMessage>>,
        output: Arc<BoundedChannel<TextMessage>>,
    ) -> Self {
        Self {
            backend,
            input,
            output,
            alt_input: None,
            alt_output: None,
        }
    }

    /// Attaches the sideband queue pair for headless text clients.
    pub fn with_alt_queues(
        mut self,
        alt_input: Arc<BoundedChannel<TextMessage>>,
        alt_output: Arc<BoundedChannel<TextMessage>>,
    ) -> Self {
        self.alt_input = Some(alt_input);
        self.alt_output = Some(alt_output);
        self
    }

    fn flush_queues(&self) {
        let input_flushed = self.input.flush();
        let output_flushed = self.output.flush();
        let alt_flushed = self.alt_input.as_ref().map_or(0, |q| q.flush())
            + self.alt_output.as_ref().map_or(0, |q| q.flush());
        if input_flushed + output_flushed + alt_flushed > 0 {
            log::info!(
                "[llm] flushed {input_flushed} input, {output_flushed} output, \
                 {alt_flushed} sideband messages"
            );
        }
    }

    fn handle_control(&mut self, msg: &ControlMessage) -> Step {
        match msg.signal {
            ControlSignal::Interrupt | ControlSignal::FlushQueues => {
                self.flush_queues();
                Step::Continue
            }
            _ => default_control(msg),
        }
    }

    /// Drives one generation, emitting chunks as they form. Returns the
    /// complete response with any matched antiprompt stripped.
    fn run_generation(&mut self, prompt: &str) -> Result<String> {
        let output = Arc::clone(&self.output);
        let antiprompts = self.backend.antiprompts().to_vec();

        let mut chunker = Chunker::new();
        let mut tail = String::new();
        let mut matched: Option<String> = None;
        let mut output_down = false;

        let mut response = self.backend.generate_stream(prompt, &mut |fragment| {
            tail.push_str(fragment);
            trim_to_tail(&mut tail, ANTIPROMPT_TAIL_BYTES);

            for stop in &antiprompts {
                if !stop.is_empty() && tail.contains(stop.as_str()) {
                    matched = Some(stop.clone());
                    return false;
                }
            }

            if let Some(chunk) = chunker.feed(fragment) {
                match output.push_timeout(TextMessage::new(chunk), CHUNK_PUSH_TIMEOUT) {
                    PushResult::Pushed => {}
                    PushResult::Timeout => {
                        log::warn!("[llm] response queue full, dropped a chunk");
                    }
                    PushResult::Shutdown => {
                        output_down = true;
                        return false;
                    }
                }
            }
            true
        })?;

        if let Some(stop) = &matched {
            chunker.strip_pending(stop);
            if let Some(pos) = response.rfind(stop.as_str()) {
                response.replace_range(pos..pos + stop.len(), "");
            }
        }

        if !output_down
            && let Some(chunk) = chunker.finish()
        {
            match self
                .output
                .push_timeout(TextMessage::new(chunk), CHUNK_PUSH_TIMEOUT)
            {
                PushResult::Pushed => {}
                PushResult::Timeout => {
                    log::warn!("[llm] response queue full, dropped final chunk");
                }
                PushResult::Shutdown => {}
            }
        }

        Ok(response)
    }
}

/// Keeps only the last `max_bytes` of `tail`, respecting char boundaries.
fn trim_to_tail(tail: &mut String, max_bytes: usize) {
    if tail.len() <= max_bytes {
        return;
    }
    let mut cut = tail.len() - max_bytes;
    while !tail.is_char_boundary(cut) {
        cut += 1;
    }
    tail.drain(..cut);
}

impl Worker for LlmWorker {
    fn name(&self) -> &'static str {
        "llm"
    }

    fn initialize(&mut self) -> Result<()> {
        self.backend.init()
    }

    fn process(&mut self, ctx: &WorkerContext) -> Result<Step> {
        let (request, from_alt) = match self.input.try_pop() {
            Pop::Item(msg) => (msg, false),
            Pop::Shutdown => return Ok(Step::Shutdown),
            _ => match self.alt_input.as_ref().map(|q| q.try_pop()) {
                Some(Pop::Item(msg)) => (msg, true),
                Some(Pop::Shutdown) => return Ok(Step::Shutdown),
                _ => {
                    if let Some(msg) = ctx
                        .mailbox()
                        .recv_timeout(Duration::from_millis(defaults::IDLE_SLEEP_MS))
                    {
                        return Ok(self.handle_control(&msg));
                    }
                    return Ok(Step::Continue);
                }
            },
        };

        if request.text.trim().is_empty() {
            return Ok(Step::Continue);
        }

        log::info!("[llm] processing: {}", request.text);
        let response = self.run_generation(&request.text)?;

        if from_alt
            && let Some(alt_output) = &self.alt_output
        {
            match alt_output.push_timeout(TextMessage::new(response), CHUNK_PUSH_TIMEOUT) {
                PushResult::Pushed => {}
                PushResult::Timeout => {
                    log::warn!("[llm] sideband output full, dropped a response");
                }
                PushResult::Shutdown => return Ok(Step::Shutdown),
            }
        }

        ctx.record_processed();
        Ok(Step::Continue)
    }

    fn on_control(&mut self, msg: &ControlMessage) -> Step {
        self.handle_control(msg)
    }

    fn cleanup(&mut self) {
        self.backend.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::dev::ScriptedLlm;

    fn queues() -> (
        Arc<BoundedChannel<TextMessage>>,
        Arc<BoundedChannel<TextMessage>>,
    ) {
        (
            Arc::new(BoundedChannel::new(20)),
            Arc::new(BoundedChannel::new(20)),
        )
    }

    fn drain(queue: &BoundedChannel<TextMessage>) -> Vec<String> {
        let mut out = Vec::new();
        while let Pop::Item(msg) = queue.try_pop() {
            out.push(msg.text);
        }
        out
    }

    #[test]
    fn test_hello_round_trip_single_chunk() {
        let (input, output) = queues();
        let backend = ScriptedLlm::new().with_response("hello", &["Hi ", "there."]);
        let mut worker = LlmWorker::new(Box::new(backend), Arc::clone(&input), Arc::clone(&output));
        worker.initialize().unwrap();

        input.push_blocking(TextMessage::new("hello"));
        let (ctx, _mailbox) = WorkerContext::new_for_tests();
        assert_eq!(worker.process(&ctx).unwrap(), Step::Continue);

        // Flushed on the '.' - exactly one chunk.
        assert_eq!(drain(&output), vec!["Hi there."]);
    }

    #[test]
    fn test_streams_multiple_chunks() {
        let (input, output) = queues();
        let backend = ScriptedLlm::new().with_response(
            "tell",
            &["The", " quick", " brown", " fox", " jumps.", " And", " then"],
        );
        let mut worker = LlmWorker::new(Box::new(backend), Arc::clone(&input), Arc::clone(&output));
        worker.initialize().unwrap();

        input.push_blocking(TextMessage::new("tell"));
        let (ctx, _mailbox) = WorkerContext::new_for_tests();
        worker.process(&ctx).unwrap();

        assert_eq!(
            drain(&output),
            vec!["The quick brown fox jumps.", " And then"]
        );
    }

    #[test]
    fn test_antiprompt_halts_and_strips() {
        let (input, output) = queues();
        let backend = ScriptedLlm::new()
            .with_response("q", &["Sure ", "thing ", "Finn:", " ignored"])
            .with_antiprompt("Finn:");
        let mut worker = LlmWorker::new(Box::new(backend), Arc::clone(&input), Arc::clone(&output));
        worker.initialize().unwrap();

        input.push_blocking(TextMessage::new("q"));
        let (ctx, _mailbox) = WorkerContext::new_for_tests();
        worker.process(&ctx).unwrap();

        let chunks = drain(&output);
        let combined = chunks.concat();
        assert!(!combined.contains("Finn:"), "stop string leaked: {combined:?}");
        assert!(!combined.contains("ignored"), "generation not halted");
        assert_eq!(combined, "Sure thing ");
    }

    #[test]
    fn test_alt_request_feeds_both_outputs() {
        let (input, output) = queues();
        let (alt_input, alt_output) = queues();
        let backend = ScriptedLlm::new().with_response("ping", &["Pong ", "indeed."]);
        let mut worker = LlmWorker::new(Box::new(backend), Arc::clone(&input), Arc::clone(&output))
            .with_alt_queues(Arc::clone(&alt_input), Arc::clone(&alt_output));
        worker.initialize().unwrap();

        alt_input.push_blocking(TextMessage::new("ping"));
        let (ctx, _mailbox) = WorkerContext::new_for_tests();
        worker.process(&ctx).unwrap();

        // Spoken chunks on the main output, whole reply on the sideband.
        assert_eq!(drain(&output), vec!["Pong indeed."]);
        assert_eq!(drain(&alt_output), vec!["Pong indeed."]);
    }

    #[test]
    fn test_main_request_skips_alt_output() {
        let (input, output) = queues();
        let (alt_input, alt_output) = queues();
        let backend = ScriptedLlm::new().with_response("hi", &["Hello."]);
        let mut worker = LlmWorker::new(Box::new(backend), Arc::clone(&input), Arc::clone(&output))
            .with_alt_queues(Arc::clone(&alt_input), Arc::clone(&alt_output));
        worker.initialize().unwrap();

        input.push_blocking(TextMessage::new("hi"));
        let (ctx, _mailbox) = WorkerContext::new_for_tests();
        worker.process(&ctx).unwrap();

        assert_eq!(drain(&output), vec!["Hello."]);
        assert!(alt_output.is_empty());
    }

    #[test]
    fn test_empty_request_dropped() {
        let (input, output) = queues();
        let backend = ScriptedLlm::new();
        let mut worker = LlmWorker::new(Box::new(backend), Arc::clone(&input), Arc::clone(&output));
        worker.initialize().unwrap();

        input.push_blocking(TextMessage::new("   "));
        let (ctx, _mailbox) = WorkerContext::new_for_tests();
        worker.process(&ctx).unwrap();

        assert!(output.is_empty());
    }

    #[test]
    fn test_interrupt_flushes_all_queues() {
        let (input, output) = queues();
        let (alt_input, alt_output) = queues();
        input.push_blocking(TextMessage::new("a"));
        output.push_blocking(TextMessage::new("b"));
        alt_input.push_blocking(TextMessage::new("c"));
        alt_output.push_blocking(TextMessage::new("d"));

        let mut worker = LlmWorker::new(
            Box::new(ScriptedLlm::new()),
            Arc::clone(&input),
            Arc::clone(&output),
        )
        .with_alt_queues(Arc::clone(&alt_input), Arc::clone(&alt_output));

        let msg = ControlMessage {
            signal: ControlSignal::FlushQueues,
            sent_at: std::time::Instant::now(),
        };
        assert_eq!(worker.on_control(&msg), Step::Continue);

        assert!(input.is_empty());
        assert!(output.is_empty());
        assert!(alt_input.is_empty());
        assert!(alt_output.is_empty());
    }

    #[test]
    fn test_init_failure_propagates() {
        let (input, output) = queues();
        let backend = ScriptedLlm::new().with_init_failure();
        let mut worker = LlmWorker::new(Box::new(backend), input, output);
        assert!(worker.initialize().is_err());
    }

    #[test]
    fn test_trim_to_tail_respects_char_boundaries() {
        let mut tail = "ééééééééé".to_string();
        trim_to_tail(&mut tail, 5);
        assert!(tail.len() <= 6);
        assert!(tail.chars().all(|c| c == 'é'));
    }
}
