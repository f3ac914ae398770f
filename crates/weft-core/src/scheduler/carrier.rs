//! Carrier threads that execute Tasks
//!
//! A carrier receives one Task at a time from the dispatcher, mounts it
//! (moves its continuation in), polls it once, and either terminates it or
//! unmounts it again. Polling returns only at the interceptor boundary or on
//! completion, so a carrier never switches Tasks mid-computation.

use crate::error::TaskFailure;
use crate::scheduler::scheduler::Shared;
use crate::scheduler::task::{Outcome, Task, TaskId, TaskStatus, TaskWaker};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Index of a carrier in the pool
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CarrierId(usize);

impl CarrierId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CarrierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "carrier-{}", self.0)
    }
}

/// Carrier occupancy
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierState {
    /// No Task mounted
    Idle = 0,
    /// Reserved by the dispatcher or running a Task
    Busy = 1,
    /// Blocked in place by a pinned Task
    Pinned = 2,
}

impl CarrierState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Busy,
            _ => Self::Pinned,
        }
    }
}

/// Point-in-time view of a carrier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarrierSnapshot {
    pub id: CarrierId,
    pub state: CarrierState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,
}

/// One carrier slot in the pool
pub(crate) struct Carrier {
    id: CarrierId,
    state: AtomicU8,
    /// Task currently mounted
    current: Mutex<Option<TaskId>>,
    /// When the current pinned block started
    pinned_since: Mutex<Option<Instant>>,
    /// Whether the current pinned block was already reported as a stall
    stall_reported: AtomicBool,
    /// Hand-off channel to the carrier thread (None until started)
    tx: Mutex<Option<Sender<Arc<Task>>>>,
}

impl Carrier {
    fn new(id: usize) -> Self {
        Self {
            id: CarrierId(id),
            state: AtomicU8::new(CarrierState::Idle as u8),
            current: Mutex::new(None),
            pinned_since: Mutex::new(None),
            stall_reported: AtomicBool::new(false),
            tx: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> CarrierId {
        self.id
    }

    pub(crate) fn state(&self) -> CarrierState {
        CarrierState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Reserve an Idle carrier (Idle → Busy)
    fn try_reserve(&self) -> bool {
        self.state
            .compare_exchange(
                CarrierState::Idle as u8,
                CarrierState::Busy as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Return a reserved carrier to Idle
    pub(crate) fn release(&self) {
        self.state.store(CarrierState::Idle as u8, Ordering::Release);
    }

    /// Hand a Task to the carrier thread; gives the Task back if the carrier is stopped
    pub(crate) fn assign(&self, task: Arc<Task>) -> Result<(), Arc<Task>> {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(task).map_err(|err| err.into_inner()),
            None => Err(task),
        }
    }

    pub(crate) fn set_pinned(&self) {
        *self.pinned_since.lock() = Some(Instant::now());
        self.stall_reported.store(false, Ordering::Release);
        self.state.store(CarrierState::Pinned as u8, Ordering::Release);
    }

    pub(crate) fn clear_pinned(&self) {
        *self.pinned_since.lock() = None;
        self.state.store(CarrierState::Busy as u8, Ordering::Release);
    }

    /// How long the carrier has been pinned, if it is
    pub(crate) fn pinned_for(&self) -> Option<Duration> {
        if self.state() != CarrierState::Pinned {
            return None;
        }
        self.pinned_since.lock().map(|since| since.elapsed())
    }

    /// Mark the current pinned block as reported; true the first time
    pub(crate) fn report_stall_once(&self) -> bool {
        !self.stall_reported.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn current_task(&self) -> Option<TaskId> {
        *self.current.lock()
    }

    pub(crate) fn snapshot(&self) -> CarrierSnapshot {
        CarrierSnapshot {
            id: self.id,
            state: self.state(),
            task: self.current_task(),
        }
    }

    /// Carrier thread main loop
    fn run_loop(self: Arc<Self>, rx: Receiver<Arc<Task>>, shared: Arc<Shared>) {
        for task in rx.iter() {
            self.run_task(&shared, task);
            *self.current.lock() = None;
            self.release();
            shared.dispatch();
        }

        tracing::debug!(carrier = %self.id, "carrier shutting down");
    }

    /// Mount `task`, poll it once, then terminate or unmount it
    fn run_task(&self, shared: &Arc<Shared>, task: Arc<Task>) {
        let mut continuation = {
            let mut cell = task.cell();
            if cell.status != TaskStatus::Ready {
                // Cancelled between dequeue and mount
                return;
            }
            let Some(continuation) = task.take_continuation() else {
                drop(cell);
                shared.fatal(&format!("ready task {} has no continuation", task.id()));
            };
            cell.status = TaskStatus::Running;
            cell.carrier = Some(self.id);
            cell.notified = false;
            continuation
        };
        *self.current.lock() = Some(task.id());
        shared.stats().mounted();
        tracing::trace!(carrier = %self.id, task = %task.id(), "mounted");

        let waker = Waker::from(TaskWaker::new(task.clone(), Arc::downgrade(shared)));
        let mut cx = Context::from_waker(&waker);
        let poll = panic::catch_unwind(AssertUnwindSafe(|| continuation.as_mut().poll(&mut cx)));
        shared.stats().left_carrier();

        match poll {
            Ok(Poll::Ready(Ok(()))) => {
                shared.terminate(&task, Outcome::Completed, Some(continuation));
            }
            Ok(Poll::Ready(Err(failure))) => {
                tracing::debug!(task = %task.label(), %failure, "task failed");
                shared.terminate(&task, Outcome::Failed(failure), Some(continuation));
            }
            Err(payload) => {
                let failure = TaskFailure::panic(payload.as_ref());
                tracing::debug!(task = %task.label(), %failure, "task panicked");
                shared.terminate(&task, Outcome::Failed(failure), Some(continuation));
            }
            Ok(Poll::Pending) => {
                tracing::trace!(carrier = %self.id, task = %task.id(), "unmounted");
                shared.unmount(&task, continuation);
            }
        }
    }
}

/// Fixed-size set of carriers
pub(crate) struct CarrierPool {
    carriers: Vec<Arc<Carrier>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl CarrierPool {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            carriers: (0..size).map(|id| Arc::new(Carrier::new(id))).collect(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.carriers.len()
    }

    pub(crate) fn get(&self, id: CarrierId) -> Option<&Arc<Carrier>> {
        self.carriers.get(id.0)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Carrier>> {
        self.carriers.iter()
    }

    /// Reserve the lowest-numbered Idle carrier
    pub(crate) fn acquire_idle_carrier(&self) -> Option<&Arc<Carrier>> {
        self.carriers.iter().find(|carrier| carrier.try_reserve())
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.carriers
            .iter()
            .filter(|c| c.state() == CarrierState::Idle)
            .count()
    }

    /// Spawn one thread per carrier
    pub(crate) fn start(&self, shared: &Arc<Shared>, prefix: &str) -> std::io::Result<()> {
        let mut handles = self.handles.lock();
        for carrier in &self.carriers {
            let (tx, rx) = channel::bounded::<Arc<Task>>(1);
            *carrier.tx.lock() = Some(tx);

            let carrier = carrier.clone();
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", prefix, carrier.id.0))
                .spawn(move || carrier.run_loop(rx, shared))?;
            handles.push(handle);
        }
        Ok(())
    }

    /// Close every hand-off channel and join the carrier threads
    pub(crate) fn stop(&self, timeout: Duration) {
        for carrier in &self.carriers {
            carrier.tx.lock().take();
        }
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            crate::scheduler::timer::join_with_deadline(handle, timeout);
        }
    }
}
