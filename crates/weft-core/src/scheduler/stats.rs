//! Scheduler counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Tasks accepted by `submit`
    pub submitted: u64,

    /// Tasks that returned normally
    pub completed: u64,

    /// Tasks whose work unit returned an error or panicked
    pub failed: u64,

    /// Tasks terminated by cancellation
    pub cancelled: u64,

    /// Submissions refused with `CapacityExceeded`
    pub rejected: u64,

    /// Times a Task released its carrier at a blocking call
    pub unmounts: u64,

    /// Blocking calls served on the pinned path
    pub pinned_blocks: u64,

    /// Pinned blocks reported by the health check
    pub carrier_stalls: u64,

    /// Highest number of Tasks observed running at once
    pub peak_running: usize,

    /// Tasks currently in the run queue
    pub queued: usize,

    /// Tasks currently unmounted and waiting
    pub waiting: usize,

    /// Tasks currently mounted
    pub running: usize,
}

/// Live counters behind `SchedulerStats`
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
    unmounts: AtomicU64,
    pinned_blocks: AtomicU64,
    carrier_stalls: AtomicU64,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    waiting: AtomicUsize,
}

impl StatsCounters {
    pub(crate) fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pinned_block(&self) {
        self.pinned_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn carrier_stall(&self) {
        self.carrier_stalls.fetch_add(1, Ordering::Relaxed);
    }

    /// A Task was mounted
    pub(crate) fn mounted(&self) {
        let running = self.running.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_running.fetch_max(running, Ordering::AcqRel);
    }

    /// A Task's poll returned and it left its carrier
    pub(crate) fn left_carrier(&self) {
        self.running.fetch_sub(1, Ordering::AcqRel);
    }

    /// A Task unmounted into the wait set
    pub(crate) fn unmounted(&self) {
        self.unmounts.fetch_add(1, Ordering::Relaxed);
        self.waiting.fetch_add(1, Ordering::AcqRel);
    }

    /// A waiting Task left the wait set (woken or cancelled)
    pub(crate) fn stopped_waiting(&self) {
        self.waiting.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn snapshot(&self, queued: usize) -> SchedulerStats {
        SchedulerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            unmounts: self.unmounts.load(Ordering::Relaxed),
            pinned_blocks: self.pinned_blocks.load(Ordering::Relaxed),
            carrier_stalls: self.carrier_stalls.load(Ordering::Relaxed),
            peak_running: self.peak_running.load(Ordering::Acquire),
            queued,
            waiting: self.waiting.load(Ordering::Acquire),
            running: self.running.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_running_tracks_maximum() {
        let stats = StatsCounters::default();
        stats.mounted();
        stats.mounted();
        stats.left_carrier();
        stats.mounted();
        stats.left_carrier();
        stats.left_carrier();

        let snapshot = stats.snapshot(0);
        assert_eq!(snapshot.peak_running, 2);
        assert_eq!(snapshot.running, 0);
    }

    #[test]
    fn test_waiting_gauge() {
        let stats = StatsCounters::default();
        stats.unmounted();
        stats.unmounted();
        stats.stopped_waiting();

        let snapshot = stats.snapshot(3);
        assert_eq!(snapshot.unmounts, 2);
        assert_eq!(snapshot.waiting, 1);
        assert_eq!(snapshot.queued, 3);
    }
}
