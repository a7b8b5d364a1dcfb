//! Bounded blocking channel connecting pipeline stages.
//!
//! A mutex-guarded FIFO with two condition variables and an atomic
//! shutdown flag. Pushes block for backpressure; pops additionally observe
//! an optional external interrupt flag so a worker blocked on input stays
//! promptly cancellable. Operations return tagged outcomes rather than
//! exposing locks or condition variables.

use crate::defaults;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Outcome of a push operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    /// Item was enqueued.
    Pushed,
    /// No space became available within the timeout; the item is dropped.
    Timeout,
    /// The channel is shut down; the item is dropped.
    Shutdown,
}

/// Outcome of a pop operation.
#[derive(Debug)]
pub enum Pop<T> {
    /// An item was dequeued.
    Item(T),
    /// The channel had no item (non-blocking pop only).
    Empty,
    /// No item arrived within the timeout.
    Timeout,
    /// The external interrupt flag was observed set.
    Interrupted,
    /// The channel is shut down.
    Shutdown,
}

#[cfg(test)]
impl<T> Pop<T> {
    fn outcome_name(&self) -> &'static str {
        match self {
            Pop::Item(_) => "Item",
            Pop::Empty => "Empty",
            Pop::Timeout => "Timeout",
            Pop::Interrupted => "Interrupted",
            Pop::Shutdown => "Shutdown",
        }
    }

    /// Unwraps the item, panicking on any other outcome.
    fn expect_item(self, msg: &str) -> T {
        match self {
            Pop::Item(item) => item,
            other => panic!("{msg}: got {}", other.outcome_name()),
        }
    }
}

/// Bounded FIFO channel with blocking push/pop and tagged outcomes.
pub struct BoundedChannel<T> {
    queue: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    shutdown: AtomicBool,
    /// Observed, never owned or cleared, by the channel.
    interrupt: Option<Arc<AtomicBool>>,
}

impl<T> BoundedChannel<T> {
    /// Creates a channel holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be at least 1");
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            shutdown: AtomicBool::new(false),
            interrupt: None,
        }
    }

    /// Creates a channel whose pops also observe `interrupt`.
    pub fn with_interrupt(capacity: usize, interrupt: Arc<AtomicBool>) -> Self {
        let mut channel = Self::new(capacity);
        channel.interrupt = Some(interrupt);
        channel
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn interrupt_requested(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Blocks until the item is enqueued or the channel shuts down.
    pub fn push_blocking(&self, item: T) -> PushResult {
        let mut queue = self.lock();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return PushResult::Shutdown;
            }
            if queue.len() < self.capacity {
                queue.push_back(item);
                self.not_empty.notify_one();
                return PushResult::Pushed;
            }
            let (guard, _) = self
                .not_full
                .wait_timeout(queue, Duration::from_millis(defaults::CHANNEL_POLL_MS))
                .unwrap_or_else(|e| e.into_inner());
            queue = guard;
        }
    }

    /// As `push_blocking`, but gives up after `timeout`.
    pub fn push_timeout(&self, item: T, timeout: Duration) -> PushResult {
        let deadline = Instant::now() + timeout;
        let mut queue = self.lock();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return PushResult::Shutdown;
            }
            if queue.len() < self.capacity {
                queue.push_back(item);
                self.not_empty.notify_one();
                return PushResult::Pushed;
            }
            let now = Instant::now();
            if now >= deadline {
                return PushResult::Timeout;
            }
            let wait = (deadline - now).min(Duration::from_millis(defaults::CHANNEL_POLL_MS));
            let (guard, _) = self
                .not_full
                .wait_timeout(queue, wait)
                .unwrap_or_else(|e| e.into_inner());
            queue = guard;
        }
    }

    /// Blocks until an item arrives, the channel shuts down, or the
    /// interrupt flag is observed.
    pub fn pop_blocking(&self) -> Pop<T> {
        let mut queue = self.lock();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Pop::Shutdown;
            }
            if self.interrupt_requested() {
                return Pop::Interrupted;
            }
            if let Some(item) = queue.pop_front() {
                self.not_full.notify_one();
                return Pop::Item(item);
            }
            // Bounded wait: a foreign thread may set the interrupt flag
            // without notifying this channel.
            let (guard, _) = self
                .not_empty
                .wait_timeout(queue, Duration::from_millis(defaults::CHANNEL_POLL_MS))
                .unwrap_or_else(|e| e.into_inner());
            queue = guard;
        }
    }

    /// As `pop_blocking`, but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Pop<T> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.lock();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Pop::Shutdown;
            }
            if self.interrupt_requested() {
                return Pop::Interrupted;
            }
            if let Some(item) = queue.pop_front() {
                self.not_full.notify_one();
                return Pop::Item(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return Pop::Timeout;
            }
            let wait = (deadline - now).min(Duration::from_millis(defaults::CHANNEL_POLL_MS));
            let (guard, _) = self
                .not_empty
                .wait_timeout(queue, wait)
                .unwrap_or_else(|e| e.into_inner());
            queue = guard;
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Pop<T> {
        if self.shutdown.load(Ordering::Acquire) {
            return Pop::Shutdown;
        }
        if self.interrupt_requested() {
            return Pop::Interrupted;
        }
        let mut queue = self.lock();
        match queue.pop_front() {
            Some(item) => {
                self.not_full.notify_one();
                Pop::Item(item)
            }
            None => Pop::Empty,
        }
    }

    /// Discards every pending item and returns how many were dropped.
    pub fn flush(&self) -> usize {
        let mut queue = self.lock();
        let count = queue.len();
        queue.clear();
        self.not_full.notify_all();
        count
    }

    /// Discards every pending item.
    pub fn clear(&self) {
        self.flush();
    }

    /// Marks the channel shut down and wakes every waiter. Monotonic and
    /// idempotent: once set it is never cleared.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Whether the channel has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Sampled item count; not usable for synchronization.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Sampled emptiness; not usable for synchronization.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of resident items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
