//! Timer thread for timed waits
//!
//! Instead of polling, the timer thread waits on a condvar until the
//! earliest deadline, then signals `WaitKey::Timer(id)` for every expired
//! entry.

use crate::scheduler::waitset::{WaitKey, WaitSet};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a timer id (the `WaitKey::Timer` payload)
pub(crate) fn next_timer_id() -> u64 {
    NEXT_TIMER_ID.fetch_add(1, AtomicOrdering::Relaxed)
}

/// Entry in the timer heap
struct TimerEntry {
    wake_at: Instant,
    id: u64,
}

// Reverse ordering for min-heap (earliest wake time first)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .wake_at
            .cmp(&self.wake_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.wake_at == other.wake_at && self.id == other.id
    }
}

impl Eq for TimerEntry {}

/// Timer thread signalling timed waits through the wait set
pub(crate) struct TimerThread {
    /// Pending deadlines (min-heap)
    pending: Mutex<BinaryHeap<TimerEntry>>,
    /// Wakes the timer thread when an earlier entry is added or on shutdown
    notify: Condvar,
    shutdown: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerThread {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(BinaryHeap::new()),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    /// Start the timer thread
    pub(crate) fn start(self: &Arc<Self>, wait_set: Arc<WaitSet>) -> std::io::Result<()> {
        let timer = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("weft-timer".to_string())
            .spawn(move || timer.run_loop(wait_set))?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Stop the timer thread, waiting at most two seconds for it to exit
    pub(crate) fn stop(&self) {
        self.shutdown.store(true, AtomicOrdering::Release);
        {
            let _pending = self.pending.lock();
            self.notify.notify_one();
        }

        if let Some(handle) = self.handle.lock().take() {
            join_with_deadline(handle, Duration::from_secs(2));
        }
    }

    /// Arm timer `id` to fire at `wake_at`
    pub(crate) fn register(&self, id: u64, wake_at: Instant) {
        let mut pending = self.pending.lock();
        pending.push(TimerEntry { wake_at, id });
        // The new entry may be earlier than the one the thread sleeps on
        self.notify.notify_one();
    }

    /// Disarm timer `id`; returns false if it already fired or was never armed
    pub(crate) fn cancel(&self, id: u64) -> bool {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|entry| entry.id != id);
        pending.len() != before
    }

    /// Number of armed timers
    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn run_loop(&self, wait_set: Arc<WaitSet>) {
        loop {
            let mut pending = self.pending.lock();

            // Checked under the lock so a stop() notification cannot be lost
            if self.shutdown.load(AtomicOrdering::Acquire) {
                break;
            }

            let now = Instant::now();
            let mut expired = Vec::new();
            while let Some(entry) = pending.peek() {
                if entry.wake_at > now {
                    break;
                }
                if let Some(entry) = pending.pop() {
                    expired.push(entry.id);
                }
            }

            if !expired.is_empty() {
                drop(pending);
                for id in expired {
                    wait_set.signal(&WaitKey::Timer(id));
                }
                continue;
            }

            match pending.peek().map(|next| next.wake_at) {
                Some(wake_at) => {
                    let timeout = wake_at.saturating_duration_since(Instant::now());
                    self.notify.wait_for(&mut pending, timeout);
                }
                None => self.notify.wait(&mut pending),
            }
        }

        tracing::debug!("timer thread shutting down");
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Join `handle`, giving up (and detaching the thread) after `timeout`
pub(crate) fn join_with_deadline(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        if handle.is_finished() {
            let _ = handle.join();
            return true;
        }
        if start.elapsed() > timeout {
            tracing::warn!(
                thread = handle.thread().name().unwrap_or("<unnamed>"),
                "thread did not exit in time, detaching"
            );
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
