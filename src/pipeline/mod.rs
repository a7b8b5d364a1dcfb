//! Streaming voice pipeline.
//!
//! Implements a multi-worker pipeline where each stage runs in its own
//! thread, connected by bounded blocking channels for backpressure.
//! Control signals (interrupt, flush, pause, resume, shutdown) are
//! delivered out-of-band to per-worker mailboxes so barge-in can overtake
//! data already queued.

pub mod audio_worker;
pub mod channel;
pub mod chunker;
pub mod control;
pub mod llm_worker;
pub mod messages;
pub mod stt_worker;
pub mod supervisor;
pub mod tts_worker;
pub mod worker;

pub use audio_worker::{AudioInterrupt, PlaybackWorker};
pub use channel::{BoundedChannel, Pop, PushResult};
pub use chunker::Chunker;
pub use control::{ControlMessage, ControlSignal, Mailbox};
pub use llm_worker::LlmWorker;
pub use messages::{AudioChunk, TextMessage};
pub use stt_worker::{SttWorker, SttWorkerConfig};
pub use supervisor::{Pipeline, PipelineConfig, PipelineMode, PipelineStats};
pub use tts_worker::{TtsWorker, TtsWorkerOptions};
pub use worker::{
    ErrorReporter, LogReporter, Step, Worker, WorkerContext, WorkerHandle, spawn_worker,
};
