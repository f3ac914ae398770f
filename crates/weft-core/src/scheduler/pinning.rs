//! Pinning monitor and pinned-carrier health check
//!
//! A Task that reaches a blocking call while holding an unmount-hostile lock
//! cannot release its carrier. The carrier blocks in place. One
//! `PinningEvent` is appended when the block starts and completed with its
//! duration when the call returns. Separately, a monitor
//! thread (like Go's sysmon) samples the carriers and reports any carrier
//! that stays pinned while other Tasks are queued.

use crate::blocking::BlockingKind;
use crate::scheduler::carrier::{Carrier, CarrierId};
use crate::scheduler::scheduler::Shared;
use crate::scheduler::task::{Task, TaskId, TaskStatus};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

/// Why a carrier was pinned
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PinReason {
    /// A blocking call made while holding an unmount-hostile lock
    BlockingCall(BlockingKind),
    /// Waiting to acquire a contended unmount-hostile lock
    LockContention,
}

impl fmt::Display for PinReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinReason::BlockingCall(kind) => write!(f, "{} call", kind),
            PinReason::LockContention => write!(f, "hostile lock contention"),
        }
    }
}

/// One pinned block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinningEvent {
    /// Position in the event log
    pub seq: u64,
    pub task_id: TaskId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    pub carrier_id: Option<CarrierId>,
    /// When the pinned block started
    pub timestamp: SystemTime,
    /// Source location of the blocking call
    pub location: String,
    pub reason: PinReason,
    /// How long the carrier stayed pinned, or has been so far
    pub duration: Duration,
    /// The carrier is still pinned
    pub in_progress: bool,
}

/// Append-only log of pinning events
pub(crate) struct PinningMonitor {
    events: RwLock<VecDeque<PinningEvent>>,
    /// Oldest events are dropped beyond this many (None = unbounded)
    capacity: Option<usize>,
    /// Events at least this long are logged at warn
    log_threshold: Duration,
    next_seq: AtomicU64,
}

impl PinningMonitor {
    pub(crate) fn new(log_threshold: Duration, capacity: Option<usize>) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            capacity,
            log_threshold,
            next_seq: AtomicU64::new(0),
        }
    }

    /// Append the event of a pinned block that just started; returns its seq
    fn begin(&self, mut event: PinningEvent) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        event.seq = seq;
        event.in_progress = true;
        event.duration = Duration::ZERO;

        let mut events = self.events.write();
        events.push_back(event);
        if let Some(capacity) = self.capacity {
            while events.len() > capacity {
                events.pop_front();
            }
        }
        seq
    }

    /// Fill in the duration of the block `event.seq` and log it
    fn complete(&self, mut event: PinningEvent) {
        event.in_progress = false;

        if event.duration >= self.log_threshold {
            tracing::warn!(
                task = %event.task_id,
                carrier = ?event.carrier_id,
                location = %event.location,
                reason = %event.reason,
                duration_ms = event.duration.as_millis() as u64,
                "PinningTimeout: carrier pinned by blocking task"
            );
        } else {
            tracing::debug!(
                task = %event.task_id,
                location = %event.location,
                reason = %event.reason,
                duration_us = event.duration.as_micros() as u64,
                "pinned block"
            );
        }

        let mut events = self.events.write();
        // Already evicted if the log is bounded and busy
        if let Some(stored) = events.iter_mut().rev().find(|e| e.seq == event.seq) {
            *stored = event;
        }
    }

    /// Events whose pinned block started at or after `since`
    pub(crate) fn since(&self, since: SystemTime) -> Vec<PinningEvent> {
        self.events
            .read()
            .iter()
            .filter(|event| event.timestamp >= since)
            .map(|event| {
                let mut event = event.clone();
                if event.in_progress {
                    event.duration = event.timestamp.elapsed().unwrap_or_default();
                }
                event
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.events.read().len()
    }
}

/// A pinned block in progress; records its event when dropped
pub(crate) struct PinScope<'a> {
    shared: &'a Shared,
    task: &'a Task,
    carrier: Option<Arc<Carrier>>,
    location: &'static Location<'static>,
    reason: PinReason,
    timestamp: SystemTime,
    started: Instant,
    seq: u64,
}

impl<'a> PinScope<'a> {
    /// Mark `task` PinnedBlocked and its carrier Pinned
    pub(crate) fn enter(
        shared: &'a Shared,
        task: &'a Task,
        location: &'static Location<'static>,
        reason: PinReason,
    ) -> Self {
        let carrier_id = {
            let mut cell = task.cell();
            if cell.status == TaskStatus::Running {
                cell.status = TaskStatus::PinnedBlocked;
            }
            cell.carrier
        };
        let carrier = carrier_id.and_then(|id| shared.carriers().get(id).cloned());
        if let Some(carrier) = &carrier {
            carrier.set_pinned();
        }
        shared.stats().pinned_block();

        let mut scope = Self {
            shared,
            task,
            carrier,
            location,
            reason,
            timestamp: SystemTime::now(),
            started: Instant::now(),
            seq: 0,
        };
        scope.seq = shared.pinning().begin(scope.event(Duration::ZERO));
        scope
    }

    fn event(&self, duration: Duration) -> PinningEvent {
        PinningEvent {
            seq: self.seq,
            task_id: self.task.id(),
            task_name: self.task.name().map(str::to_string),
            carrier_id: self.carrier.as_ref().map(|c| c.id()),
            timestamp: self.timestamp,
            location: self.location.to_string(),
            reason: self.reason,
            duration,
            in_progress: false,
        }
    }
}

impl Drop for PinScope<'_> {
    fn drop(&mut self) {
        let duration = self.started.elapsed();
        if let Some(carrier) = &self.carrier {
            carrier.clear_pinned();
        }
        {
            let mut cell = self.task.cell();
            if cell.status == TaskStatus::PinnedBlocked {
                cell.status = TaskStatus::Running;
            }
        }

        self.shared.pinning().complete(self.event(duration));
    }
}

/// Monitor thread reporting carriers pinned while work is queued
pub(crate) struct HealthCheck {
    handle: Mutex<Option<JoinHandle<()>>>,
    /// Dropping the sender stops the thread
    shutdown: Mutex<Option<Sender<()>>>,
}

impl HealthCheck {
    pub(crate) fn new() -> Self {
        Self {
            handle: Mutex::new(None),
            shutdown: Mutex::new(None),
        }
    }

    /// Start the monitor thread
    pub(crate) fn start(
        &self,
        shared: Weak<Shared>,
        interval: Duration,
        threshold: Duration,
    ) -> std::io::Result<()> {
        let (tx, rx) = channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("weft-pin-monitor".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                check_pinned_carriers(&shared, threshold);
            })?;

        *self.shutdown.lock() = Some(tx);
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    pub(crate) fn stop(&self) {
        self.shutdown.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            crate::scheduler::timer::join_with_deadline(handle, Duration::from_secs(2));
        }
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl Drop for HealthCheck {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One health-check pass; returns the number of newly reported stalls
pub(crate) fn check_pinned_carriers(shared: &Shared, threshold: Duration) -> usize {
    let queued = shared.queued();
    if queued == 0 {
        return 0;
    }

    let mut reported = 0;
    for carrier in shared.carriers().iter() {
        let Some(pinned_for) = carrier.pinned_for() else {
            continue;
        };
        if pinned_for >= threshold && carrier.report_stall_once() {
            tracing::warn!(
                carrier = %carrier.id(),
                task = ?carrier.current_task(),
                pinned_ms = pinned_for.as_millis() as u64,
                queued,
                "carrier pinned while tasks are waiting to run"
            );
            shared.stats().carrier_stall();
            reported += 1;
        }
    }
    reported
}
