//! Worker framework: one long-running thread per pipeline stage.
//!
//! A worker implements `initialize` / `process` / `cleanup`; the runner
//! owns the thread loop, drains the control mailbox between iterations and
//! applies default control semantics (`Shutdown` ends the loop, everything
//! else is a no-op unless the worker overrides `on_control`).

use crate::defaults;
use crate::error::{Result, VoxError};
use crate::pipeline::control::{ControlMessage, ControlSignal, Mailbox};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What the worker loop should do after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep iterating.
    Continue,
    /// Exit the loop and run cleanup.
    Shutdown,
}

/// Trait for reporting worker-boundary errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a worker.
    fn report(&self, worker: &str, error: &VoxError);
}

/// Default reporter that routes to the log facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, worker: &str, error: &VoxError) {
        log::error!("[{worker}] {error}");
    }
}

/// Shared handles a worker can reach from inside `process`.
pub struct WorkerContext {
    mailbox: Arc<Mailbox>,
    processed: Arc<AtomicU64>,
}

impl WorkerContext {
    /// The worker's control mailbox. `recv_timeout` on it is the
    /// interruptible sleep.
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Counts one processed message for stats logging.
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Standalone context for driving a worker's `process` in unit tests.
    #[cfg(test)]
    pub(crate) fn new_for_tests() -> (WorkerContext, Arc<Mailbox>) {
        let mailbox = Arc::new(Mailbox::new());
        let ctx = WorkerContext {
            mailbox: Arc::clone(&mailbox),
            processed: Arc::new(AtomicU64::new(0)),
        };
        (ctx, mailbox)
    }
}

/// A pipeline stage. The runner calls `initialize` once before the loop,
/// `process` per iteration, and `cleanup` on every exit path.
pub trait Worker: Send + 'static {
    /// Short name used in thread names and log lines.
    fn name(&self) -> &'static str;

    /// Called once before the loop starts. Failure aborts the start and the
    /// worker never runs.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// One loop iteration. Errors are reported and followed by a brief
    /// backoff; they do not stop the worker.
    fn process(&mut self, ctx: &WorkerContext) -> Result<Step>;

    /// Reacts to a control message. The default handles `Shutdown` only.
    fn on_control(&mut self, msg: &ControlMessage) -> Step {
        default_control(msg)
    }

    /// Called after the loop exits, on the worker thread.
    fn cleanup(&mut self) {}
}

/// Default control semantics: `Shutdown` terminates, others are no-ops.
pub fn default_control(msg: &ControlMessage) -> Step {
    match msg.signal {
        ControlSignal::Shutdown => Step::Shutdown,
        _ => Step::Continue,
    }
}

/// Handle to a started worker: signal its mailbox, inspect its state, stop
/// and join it.
pub struct WorkerHandle {
    name: &'static str,
    mailbox: Arc<Mailbox>,
    running: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Worker name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Delivers a control signal to the worker's mailbox.
    pub fn signal(&self, signal: ControlSignal) {
        if matches!(
            signal,
            ControlSignal::Shutdown | ControlSignal::Pause | ControlSignal::Resume
        ) {
            log::info!("[{}] control signal: {}", self.name, signal.name());
        }
        self.mailbox.signal(signal);
    }

    /// Whether the worker loop is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Messages processed so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Shared processed-message counter, for stats snapshots.
    pub fn processed_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.processed)
    }

    /// Signals `Shutdown` and joins the thread. Idempotent; a second call
    /// is a no-op.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        self.mailbox.signal(ControlSignal::Shutdown);
        if thread.join().is_err() {
            log::error!("[{}] worker thread panicked", self.name);
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Initializes the worker on the calling thread, then spawns its loop.
///
/// # Errors
///
/// Returns the `initialize` error without spawning; the worker stays
/// not-started.
pub fn spawn_worker<W: Worker>(
    mut worker: W,
    reporter: Arc<dyn ErrorReporter>,
) -> Result<WorkerHandle> {
    worker.initialize()?;

    let name = worker.name();
    let mailbox = Arc::new(Mailbox::new());
    let running = Arc::new(AtomicBool::new(true));
    let processed = Arc::new(AtomicU64::new(0));

    let ctx = WorkerContext {
        mailbox: Arc::clone(&mailbox),
        processed: Arc::clone(&processed),
    };
    let thread_running = Arc::clone(&running);

    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            log::info!("[{name}] started");
            run_loop(&mut worker, &ctx, &thread_running, reporter.as_ref());
            worker.cleanup();
            thread_running.store(false, Ordering::Release);
            log::info!("[{name}] stopped");
        })
        .map_err(|e| VoxError::Pipeline {
            message: format!("failed to spawn {name} thread: {e}"),
        })?;

    Ok(WorkerHandle {
        name,
        mailbox,
        running,
        processed,
        thread: Some(thread),
    })
}

fn run_loop<W: Worker>(
    worker: &mut W,
    ctx: &WorkerContext,
    running: &AtomicBool,
    reporter: &dyn ErrorReporter,
) {
    while running.load(Ordering::Acquire) {
        match worker.process(ctx) {
            Ok(Step::Continue) => {}
            Ok(Step::Shutdown) => return,
            Err(e) => {
                reporter.report(worker.name(), &e);
                thread::sleep(Duration::from_millis(defaults::ERROR_BACKOFF_MS));
            }
        }

        // Drain any control signals that arrived during processing.
        while let Some(msg) = ctx.mailbox.try_recv() {
            if worker.on_control(&msg) == Step::Shutdown {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    struct CountingWorker {
        iterations: Arc<AtomicU64>,
        cleaned_up: Arc<AtomicBool>,
        interrupts_seen: Arc<AtomicU64>,
        fail_init: bool,
    }

    impl CountingWorker {
        fn new() -> Self {
            Self {
                iterations: Arc::new(AtomicU64::new(0)),
                cleaned_up: Arc::new(AtomicBool::new(false)),
                interrupts_seen: Arc::new(AtomicU64::new(0)),
                fail_init: false,
            }
        }
    }

    impl Worker for CountingWorker {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn initialize(&mut self) -> Result<()> {
            if self.fail_init {
                return Err(VoxError::Other("init failed".to_string()));
            }
            Ok(())
        }

        fn process(&mut self, ctx: &WorkerContext) -> Result<Step> {
            self.iterations.fetch_add(1, Ordering::Relaxed);
            ctx.record_processed();
            if let Some(msg) = ctx.mailbox().recv_timeout(Duration::from_millis(10)) {
                return Ok(self.on_control(&msg));
            }
            Ok(Step::Continue)
        }

        fn on_control(&mut self, msg: &ControlMessage) -> Step {
            if msg.signal == ControlSignal::Interrupt {
                self.interrupts_seen.fetch_add(1, Ordering::Relaxed);
                return Step::Continue;
            }
            default_control(msg)
        }

        fn cleanup(&mut self) {
            self.cleaned_up.store(true, Ordering::Release);
        }
    }

    #[test]
    fn test_worker_runs_and_stops() {
        let worker = CountingWorker::new();
        let iterations = Arc::clone(&worker.iterations);
        let cleaned_up = Arc::clone(&worker.cleaned_up);

        let mut handle = spawn_worker(worker, Arc::new(LogReporter)).unwrap();
        assert!(handle.is_running());

        thread::sleep(Duration::from_millis(50));
        assert!(iterations.load(Ordering::Relaxed) > 0);

        handle.stop();
        assert!(!handle.is_running());
        assert!(cleaned_up.load(Ordering::Acquire));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut handle = spawn_worker(CountingWorker::new(), Arc::new(LogReporter)).unwrap();
        handle.stop();
        handle.stop();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_stop_returns_promptly() {
        let mut handle = spawn_worker(CountingWorker::new(), Arc::new(LogReporter)).unwrap();
        thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        handle.stop();
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_initialize_failure_aborts_start() {
        let mut worker = CountingWorker::new();
        worker.fail_init = true;
        let iterations = Arc::clone(&worker.iterations);

        let result = spawn_worker(worker, Arc::new(LogReporter));
        assert!(result.is_err());
        assert_eq!(iterations.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_interrupt_signal_reaches_worker() {
        let worker = CountingWorker::new();
        let interrupts = Arc::clone(&worker.interrupts_seen);

        let mut handle = spawn_worker(worker, Arc::new(LogReporter)).unwrap();
        handle.signal(ControlSignal::Interrupt);

        thread::sleep(Duration::from_millis(100));
        assert!(interrupts.load(Ordering::Relaxed) >= 1);
        handle.stop();
    }

    #[test]
    fn test_processed_counter() {
        let mut handle = spawn_worker(CountingWorker::new(), Arc::new(LogReporter)).unwrap();
        thread::sleep(Duration::from_millis(50));
        handle.stop();
        assert!(handle.processed() > 0);
    }

    struct FailingWorker {
        attempts: Arc<AtomicU64>,
    }

    impl Worker for FailingWorker {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn process(&mut self, _ctx: &WorkerContext) -> Result<Step> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            Err(VoxError::Other("boom".to_string()))
        }
    }

    struct CollectingReporter {
        errors: Mutex<Vec<String>>,
    }

    impl ErrorReporter for CollectingReporter {
        fn report(&self, worker: &str, error: &VoxError) {
            self.errors
                .lock()
                .unwrap()
                .push(format!("{worker}: {error}"));
        }
    }

    #[test]
    fn test_process_errors_are_reported_and_backed_off() {
        let attempts = Arc::new(AtomicU64::new(0));
        let reporter = Arc::new(CollectingReporter {
            errors: Mutex::new(Vec::new()),
        });

        let worker = FailingWorker {
            attempts: Arc::clone(&attempts),
        };
        let dyn_reporter: Arc<dyn ErrorReporter> = reporter.clone() as Arc<dyn ErrorReporter>;
        let mut handle = spawn_worker(worker, dyn_reporter).unwrap();

        thread::sleep(Duration::from_millis(250));
        handle.stop();

        let seen = attempts.load(Ordering::Relaxed);
        // 100ms backoff per failure: a 250ms window fits only a few attempts.
        assert!(seen >= 1, "worker should keep retrying after errors");
        assert!(seen <= 5, "error backoff not applied, saw {seen} attempts");

        let errors = reporter.errors.lock().unwrap();
        assert!(!errors.is_empty());
        assert!(errors[0].contains("failing: boom"));
    }
}
