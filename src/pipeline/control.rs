//! Control signals and per-worker mailboxes.
//!
//! Control messages travel out-of-band: producers push directly into a
//! worker's mailbox instead of the data channels, so an interrupt can
//! overtake data that is already queued.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Pipeline control signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Interrupt current processing (barge-in).
    Interrupt,
    /// Flush downstream queues.
    FlushQueues,
    /// Pause processing.
    Pause,
    /// Resume processing.
    Resume,
    /// Shut down the worker.
    Shutdown,
}

impl ControlSignal {
    /// Signal name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ControlSignal::Interrupt => "INTERRUPT",
            ControlSignal::FlushQueues => "FLUSH_QUEUES",
            ControlSignal::Pause => "PAUSE",
            ControlSignal::Resume => "RESUME",
            ControlSignal::Shutdown => "SHUTDOWN",
        }
    }
}

/// A control signal with its creation timestamp.
#[derive(Debug, Clone, Copy)]
pub struct ControlMessage {
    pub signal: ControlSignal,
    pub sent_at: Instant,
}

impl ControlMessage {
    /// Time elapsed since the signal was sent, for control-latency stats.
    pub fn age(&self) -> Duration {
        self.sent_at.elapsed()
    }
}

/// Per-worker FIFO of control signals.
///
/// Any thread may push; only the owning worker consumes. `recv_timeout`
/// doubles as the worker's interruptible sleep.
#[derive(Default)]
pub struct Mailbox {
    queue: Mutex<VecDeque<ControlMessage>>,
    signal_cv: Condvar,
}

impl Mailbox {
    /// Creates an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a signal and wakes the worker if it is sleeping on the
    /// mailbox.
    pub fn signal(&self, signal: ControlSignal) {
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.push_back(ControlMessage {
                signal,
                sent_at: Instant::now(),
            });
        }
        self.signal_cv.notify_one();
    }

    /// Pops the oldest pending signal without waiting.
    pub fn try_recv(&self) -> Option<ControlMessage> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.pop_front()
    }

    /// Waits up to `timeout` for a signal. Returns `None` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ControlMessage> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(msg) = queue.pop_front() {
                return Some(msg);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .signal_cv
                .wait_timeout(queue, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            queue = guard;
        }
    }

    /// Number of pending signals.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the mailbox is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signal_and_try_recv() {
        let mailbox = Mailbox::new();
        assert!(mailbox.try_recv().is_none());

        mailbox.signal(ControlSignal::Interrupt);
        mailbox.signal(ControlSignal::Shutdown);

        assert_eq!(mailbox.len(), 2);
        assert_eq!(
            mailbox.try_recv().unwrap().signal,
            ControlSignal::Interrupt
        );
        assert_eq!(mailbox.try_recv().unwrap().signal, ControlSignal::Shutdown);
        assert!(mailbox.try_recv().is_none());
    }

    #[test]
    fn test_recv_timeout_times_out() {
        let mailbox = Mailbox::new();
        let start = Instant::now();
        let result = mailbox.recv_timeout(Duration::from_millis(30));
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_recv_timeout_wakes_on_signal() {
        let mailbox = Arc::new(Mailbox::new());
        let producer = Arc::clone(&mailbox);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.signal(ControlSignal::FlushQueues);
        });

        let msg = mailbox.recv_timeout(Duration::from_secs(2));
        handle.join().unwrap();

        assert_eq!(msg.unwrap().signal, ControlSignal::FlushQueues);
    }

    #[test]
    fn test_message_age() {
        let mailbox = Mailbox::new();
        mailbox.signal(ControlSignal::Pause);
        thread::sleep(Duration::from_millis(5));
        let msg = mailbox.try_recv().unwrap();
        assert!(msg.age() >= Duration::from_millis(5));
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(ControlSignal::Interrupt.name(), "INTERRUPT");
        assert_eq!(ControlSignal::FlushQueues.name(), "FLUSH_QUEUES");
        assert_eq!(ControlSignal::Pause.name(), "PAUSE");
        assert_eq!(ControlSignal::Resume.name(), "RESUME");
        assert_eq!(ControlSignal::Shutdown.name(), "SHUTDOWN");
    }
}
